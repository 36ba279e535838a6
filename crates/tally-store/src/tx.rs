//! Optimistic serialisable transactions.
//!
//! A [`Tx`] buffers every write in memory and snapshots the bytes of every
//! row it reads. `commit` re-reads the whole read set under the store-wide
//! commit lock; any row that changed since it was first read aborts the
//! transaction with a serialisation conflict, which [`crate::with_retry`]
//! absorbs. Rows a transaction depends on but does not modify are pinned via
//! the same mechanism — [`Tx::lock_account`] and [`Tx::read_balance`] are the
//! optimistic analogue of `SELECT … FOR UPDATE`.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tally_core::{
    signed_delta, Account, AccountFilter, AccountId, Amount, Balance, BalanceSnapshot,
    ConsistencyReport, Dispute, DisputeFilter, DisputeId, EntryId, Error, FraudReserve, Hold,
    HoldId, HoldStatus, JournalEntry, StateTransition, TransactionId,
};

use chrono::{DateTime, Utc};

use crate::db::{decode, encode, scoped_prefix, scoped_time_key, storage_err, LedgerDb, TreeId};

// ── Deadlines ─────────────────────────────────────────────────────────────────

/// Deadline for transactions touching a handful of rows.
pub const SINGLE_ROW_WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for multi-row validations (double-entry checks, postings that
/// fan out over several rows).
pub const MULTI_ROW_VALIDATION_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for full-table consistency scans.
pub const FULL_SCAN_DEADLINE: Duration = Duration::from_secs(30);

type Key = (TreeId, Vec<u8>);

/// One read-write serialisable transaction over a [`LedgerDb`].
pub struct Tx<'a> {
    db: &'a LedgerDb,
    deadline: Instant,
    /// First-observed byte snapshot of every row read from sled.
    reads: HashMap<Key, Option<Vec<u8>>>,
    /// Staged writes, applied only on successful commit.
    writes: BTreeMap<Key, Vec<u8>>,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(db: &'a LedgerDb, deadline: Duration) -> Self {
        Self {
            db,
            deadline: Instant::now() + deadline,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    fn check_deadline(&self) -> Result<(), Error> {
        if Instant::now() >= self.deadline {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    // ── Raw access ───────────────────────────────────────────────────────────

    fn raw_get(&mut self, tree: TreeId, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let map_key = (tree, key.to_vec());
        if let Some(staged) = self.writes.get(&map_key) {
            return Ok(Some(staged.clone()));
        }
        if let Some(snapshot) = self.reads.get(&map_key) {
            return Ok(snapshot.clone());
        }
        let current = self
            .db
            .tree(tree)
            .get(key)
            .map_err(storage_err)?
            .map(|v| v.to_vec());
        self.reads.insert(map_key, current.clone());
        Ok(current)
    }

    fn raw_put(&mut self, tree: TreeId, key: Vec<u8>, bytes: Vec<u8>) {
        self.writes.insert((tree, key), bytes);
    }

    /// Prefix scan with staged writes overlaid, sorted by key.
    fn raw_scan_prefix(
        &mut self,
        tree: TreeId,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.db.tree(tree).scan_prefix(prefix) {
            let (key, value) = item.map_err(storage_err)?;
            let key = key.to_vec();
            let value = value.to_vec();
            // Rows already in the read set keep their first-observed bytes so
            // the transaction sees one consistent snapshot; a concurrent
            // change surfaces as a conflict at commit.
            let snapshot = self
                .reads
                .entry((tree, key.clone()))
                .or_insert_with(|| Some(value));
            if let Some(bytes) = snapshot {
                rows.insert(key, bytes.clone());
            }
        }
        for ((t, key), value) in &self.writes {
            if *t == tree && key.starts_with(prefix) {
                rows.insert(key.clone(), value.clone());
            }
        }
        Ok(rows.into_iter().collect())
    }

    fn get_typed<T: serde::de::DeserializeOwned>(
        &mut self,
        tree: TreeId,
        key: &[u8],
    ) -> Result<Option<T>, Error> {
        match self.raw_get(tree, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_typed<T: serde::Serialize>(
        &mut self,
        tree: TreeId,
        key: Vec<u8>,
        value: &T,
    ) -> Result<(), Error> {
        let bytes = encode(value)?;
        self.raw_put(tree, key, bytes);
        Ok(())
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    /// Pin the account row into the read set and return it. A concurrent
    /// write to the row between now and commit aborts this transaction.
    pub fn lock_account(&mut self, id: &AccountId) -> Result<Account, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::Accounts, id.as_bytes())?
            .ok_or_else(|| Error::not_found("account", id.as_str()))
    }

    /// Insert a new account. Enforces the schema invariants owned by the
    /// adapter: valid currency, unique id, unique account number.
    pub fn insert_account(&mut self, account: &Account) -> Result<(), Error> {
        self.check_deadline()?;
        if !currency_ok(&account.currency) {
            return Err(Error::InvalidArgument(format!(
                "currency must be three uppercase letters, got {:?}",
                account.currency
            )));
        }
        if self.raw_get(TreeId::Accounts, account.id.as_bytes())?.is_some() {
            return Err(Error::Conflict(format!(
                "account id already exists: {}",
                account.id
            )));
        }
        if self
            .raw_get(TreeId::AccountNumbers, account.account_number.as_bytes())?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "account number already exists: {}",
                account.account_number
            )));
        }
        self.put_typed(TreeId::Accounts, account.id.as_bytes().to_vec(), account)?;
        self.raw_put(
            TreeId::AccountNumbers,
            account.account_number.as_bytes().to_vec(),
            account.id.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub fn read_account_by_id(&mut self, id: &AccountId) -> Result<Option<Account>, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::Accounts, id.as_bytes())
    }

    pub fn read_account_by_number(&mut self, number: &str) -> Result<Option<Account>, Error> {
        self.check_deadline()?;
        match self.raw_get(TreeId::AccountNumbers, number.as_bytes())? {
            Some(id_bytes) => self.get_typed(TreeId::Accounts, &id_bytes),
            None => Ok(None),
        }
    }

    /// Update mutable account fields (activation, name, metadata). The
    /// account's type and currency are immutable; a changed value is a bug in
    /// the caller and is rejected.
    pub fn update_account(&mut self, account: &Account) -> Result<(), Error> {
        self.check_deadline()?;
        let existing: Account = self
            .get_typed(TreeId::Accounts, account.id.as_bytes())?
            .ok_or_else(|| Error::not_found("account", account.id.as_str()))?;
        if existing.account_type != account.account_type {
            return Err(Error::FailedPrecondition(
                "account type is immutable".to_string(),
            ));
        }
        if existing.currency != account.currency {
            return Err(Error::FailedPrecondition(
                "account currency is immutable".to_string(),
            ));
        }
        if existing.account_number != account.account_number {
            return Err(Error::FailedPrecondition(
                "account number is immutable".to_string(),
            ));
        }
        self.put_typed(TreeId::Accounts, account.id.as_bytes().to_vec(), account)
    }

    /// All accounts matching `filter`, in id order, paginated.
    pub fn list_accounts(&mut self, filter: &AccountFilter) -> Result<Vec<Account>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::Accounts, &[])?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let account: Account = decode(&bytes)?;
            if filter.matches(&account) {
                out.push(account);
            }
        }
        let start = filter.offset.min(out.len());
        let end = if filter.limit == 0 {
            out.len()
        } else {
            (start + filter.limit).min(out.len())
        };
        Ok(out[start..end].to_vec())
    }

    // ── Journal entries ──────────────────────────────────────────────────────

    /// Insert an immutable journal entry. The adapter owns these invariants:
    /// amount strictly positive, valid currency, unique entry id and entry
    /// number, and an active referenced account.
    pub fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), Error> {
        self.check_deadline()?;
        if !entry.amount.is_positive() {
            return Err(Error::InvalidArgument(format!(
                "entry amount must be positive, got {}",
                entry.amount
            )));
        }
        if !currency_ok(&entry.currency) {
            return Err(Error::InvalidArgument(format!(
                "currency must be three uppercase letters, got {:?}",
                entry.currency
            )));
        }
        let account: Account = self
            .get_typed(TreeId::Accounts, entry.account_id.as_bytes())?
            .ok_or_else(|| Error::not_found("account", entry.account_id.as_str()))?;
        if !account.is_active {
            return Err(Error::FailedPrecondition(format!(
                "account {} is inactive",
                entry.account_id
            )));
        }
        if self
            .raw_get(TreeId::JournalEntries, entry.id.as_bytes())?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "journal entry already exists: {}",
                entry.id
            )));
        }
        if self
            .raw_get(TreeId::EntryNumbers, entry.entry_number.as_bytes())?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "entry number already exists: {}",
                entry.entry_number
            )));
        }
        self.put_typed(TreeId::JournalEntries, entry.id.as_bytes().to_vec(), entry)?;
        self.raw_put(
            TreeId::EntryNumbers,
            entry.entry_number.as_bytes().to_vec(),
            entry.id.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub fn read_journal_entry(&mut self, id: &EntryId) -> Result<Option<JournalEntry>, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::JournalEntries, id.as_bytes())
    }

    /// Every entry grouped under one transaction id.
    pub fn entries_for_transaction(
        &mut self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<JournalEntry>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::JournalEntries, &[])?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let entry: JournalEntry = decode(&bytes)?;
            if &entry.transaction_id == transaction_id {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn entries_for_account(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Vec<JournalEntry>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::JournalEntries, &[])?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let entry: JournalEntry = decode(&bytes)?;
            if &entry.account_id == account_id {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Every journal entry in the store, in id order.
    pub fn all_journal_entries(&mut self) -> Result<Vec<JournalEntry>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::JournalEntries, &[])?;
        let mut out = Vec::with_capacity(rows.len());
        for (_, bytes) in rows {
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Balances ─────────────────────────────────────────────────────────────

    /// Read the balance row, pinning it in the read set (row-lock analogue).
    pub fn read_balance(&mut self, account_id: &AccountId) -> Result<Balance, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::Balances, account_id.as_bytes())?
            .ok_or_else(|| Error::not_found("balance", account_id.as_str()))
    }

    /// Upsert the balance row. Used both to initialise a fresh account's
    /// balance to zero and to apply sign-rule deltas during posting.
    pub fn update_balance(&mut self, balance: &Balance) -> Result<(), Error> {
        self.check_deadline()?;
        self.put_typed(
            TreeId::Balances,
            balance.account_id.as_bytes().to_vec(),
            balance,
        )
    }

    // ── Balance snapshots ────────────────────────────────────────────────────

    pub fn insert_balance_snapshot(&mut self, snapshot: &BalanceSnapshot) -> Result<(), Error> {
        self.check_deadline()?;
        let key = scoped_time_key(
            snapshot.account_id.as_bytes(),
            &snapshot.snapshot_time,
            snapshot.entry_id.as_bytes(),
        );
        if self.raw_get(TreeId::BalanceSnapshots, &key)?.is_some() {
            return Err(Error::Conflict(format!(
                "balance snapshot already exists for entry {}",
                snapshot.entry_id
            )));
        }
        self.put_typed(TreeId::BalanceSnapshots, key, snapshot)
    }

    /// Snapshots for one account in `[start, end]`, ascending by time.
    pub fn snapshots_for_account(
        &mut self,
        account_id: &AccountId,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<BalanceSnapshot>, Error> {
        self.check_deadline()?;
        let prefix = scoped_prefix(account_id.as_bytes());
        let rows = self.raw_scan_prefix(TreeId::BalanceSnapshots, &prefix)?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let snapshot: BalanceSnapshot = decode(&bytes)?;
            if snapshot.snapshot_time >= *start && snapshot.snapshot_time <= *end {
                out.push(snapshot);
            }
        }
        Ok(out)
    }

    // ── Disputes ─────────────────────────────────────────────────────────────

    pub fn insert_dispute(&mut self, dispute: &Dispute) -> Result<(), Error> {
        self.check_deadline()?;
        if self
            .raw_get(TreeId::Disputes, dispute.dispute_id.as_bytes())?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "dispute already exists: {}",
                dispute.dispute_id
            )));
        }
        self.put_typed(
            TreeId::Disputes,
            dispute.dispute_id.as_bytes().to_vec(),
            dispute,
        )
    }

    /// Read the dispute row, pinning it (this is the lock that serialises
    /// concurrent transitions on one dispute).
    pub fn read_dispute(&mut self, dispute_id: &DisputeId) -> Result<Option<Dispute>, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::Disputes, dispute_id.as_bytes())
    }

    pub fn list_disputes(&mut self, filter: &DisputeFilter) -> Result<Vec<Dispute>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::Disputes, &[])?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let dispute: Dispute = decode(&bytes)?;
            if filter.matches(&dispute) {
                out.push(dispute);
            }
        }
        let start = filter.offset.min(out.len());
        let end = if filter.limit == 0 {
            out.len()
        } else {
            (start + filter.limit).min(out.len())
        };
        Ok(out[start..end].to_vec())
    }

    /// Mirror the latest transition's `to_state` onto the dispute row.
    pub fn update_dispute_status(
        &mut self,
        dispute_id: &DisputeId,
        status: tally_core::DisputeStatus,
    ) -> Result<(), Error> {
        self.check_deadline()?;
        let mut dispute: Dispute = self
            .get_typed(TreeId::Disputes, dispute_id.as_bytes())?
            .ok_or_else(|| Error::not_found("dispute", dispute_id.as_str()))?;
        dispute.status = status;
        self.put_typed(TreeId::Disputes, dispute_id.as_bytes().to_vec(), &dispute)
    }

    pub fn update_dispute_resolution(
        &mut self,
        dispute_id: &DisputeId,
        resolved_at: DateTime<Utc>,
        resolved_by: &str,
    ) -> Result<(), Error> {
        self.check_deadline()?;
        let mut dispute: Dispute = self
            .get_typed(TreeId::Disputes, dispute_id.as_bytes())?
            .ok_or_else(|| Error::not_found("dispute", dispute_id.as_str()))?;
        dispute.resolved_at = Some(resolved_at);
        dispute.resolved_by = Some(resolved_by.to_string());
        self.put_typed(TreeId::Disputes, dispute_id.as_bytes().to_vec(), &dispute)
    }

    /// Record the amount added to the merchant reserve at authorization so
    /// the reverse path can decrement exactly that amount.
    pub fn record_reserve_contribution(
        &mut self,
        dispute_id: &DisputeId,
        contribution: Amount,
    ) -> Result<(), Error> {
        self.check_deadline()?;
        let mut dispute: Dispute = self
            .get_typed(TreeId::Disputes, dispute_id.as_bytes())?
            .ok_or_else(|| Error::not_found("dispute", dispute_id.as_str()))?;
        dispute.reserve_contribution = Some(contribution);
        self.put_typed(TreeId::Disputes, dispute_id.as_bytes().to_vec(), &dispute)
    }

    // ── Holds ────────────────────────────────────────────────────────────────

    pub fn insert_hold(&mut self, hold: &Hold) -> Result<(), Error> {
        self.check_deadline()?;
        if self.raw_get(TreeId::Holds, hold.hold_id.as_bytes())?.is_some() {
            return Err(Error::Conflict(format!(
                "hold already exists: {}",
                hold.hold_id
            )));
        }
        self.put_typed(TreeId::Holds, hold.hold_id.as_bytes().to_vec(), hold)
    }

    pub fn read_hold(&mut self, hold_id: &HoldId) -> Result<Option<Hold>, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::Holds, hold_id.as_bytes())
    }

    pub fn holds_for_dispute(&mut self, dispute_id: &DisputeId) -> Result<Vec<Hold>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::Holds, &[])?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let hold: Hold = decode(&bytes)?;
            if &hold.dispute_id == dispute_id {
                out.push(hold);
            }
        }
        Ok(out)
    }

    /// ACTIVE holds whose expiry has passed.
    pub fn list_expired_holds(&mut self, now: &DateTime<Utc>) -> Result<Vec<Hold>, Error> {
        self.check_deadline()?;
        let rows = self.raw_scan_prefix(TreeId::Holds, &[])?;
        let mut out = Vec::new();
        for (_, bytes) in rows {
            let hold: Hold = decode(&bytes)?;
            if hold.status == HoldStatus::Active && hold.expires_at <= *now {
                out.push(hold);
            }
        }
        Ok(out)
    }

    /// Move an ACTIVE hold to RELEASED or CONVERTED.
    pub fn release_hold(
        &mut self,
        hold_id: &HoldId,
        status: HoldStatus,
        released_at: DateTime<Utc>,
        released_by: &str,
    ) -> Result<(), Error> {
        self.check_deadline()?;
        let mut hold: Hold = self
            .get_typed(TreeId::Holds, hold_id.as_bytes())?
            .ok_or_else(|| Error::not_found("hold", hold_id.as_str()))?;
        if hold.status != HoldStatus::Active {
            return Err(Error::FailedPrecondition(format!(
                "hold {} is not active (status {})",
                hold_id, hold.status
            )));
        }
        if status == HoldStatus::Active {
            return Err(Error::InvalidArgument(
                "a hold cannot be released into ACTIVE".to_string(),
            ));
        }
        hold.status = status;
        hold.released_at = Some(released_at);
        hold.released_by = Some(released_by.to_string());
        self.put_typed(TreeId::Holds, hold_id.as_bytes().to_vec(), &hold)
    }

    // ── Fraud reserves ───────────────────────────────────────────────────────

    pub fn read_fraud_reserve(
        &mut self,
        merchant_id: &str,
    ) -> Result<Option<FraudReserve>, Error> {
        self.check_deadline()?;
        self.get_typed(TreeId::FraudReserves, merchant_id.as_bytes())
    }

    pub fn upsert_fraud_reserve(&mut self, reserve: &FraudReserve) -> Result<(), Error> {
        self.check_deadline()?;
        self.put_typed(
            TreeId::FraudReserves,
            reserve.merchant_id.as_bytes().to_vec(),
            reserve,
        )
    }

    // ── State transitions ────────────────────────────────────────────────────

    /// Append a transition link. The adapter rejects any link that does not
    /// chain onto the dispute's current head.
    pub fn insert_state_transition(&mut self, transition: &StateTransition) -> Result<(), Error> {
        self.check_deadline()?;
        let head = self.read_latest_state_transition(&transition.dispute_id)?;
        let expected_prev = match &head {
            Some(latest) => latest.transition_hash.as_str(),
            None => tally_audit::GENESIS_HASH,
        };
        if transition.prev_hash != expected_prev {
            return Err(Error::FailedPrecondition(format!(
                "transition for dispute {} does not chain onto the current head",
                transition.dispute_id
            )));
        }
        let key = scoped_time_key(
            transition.dispute_id.as_bytes(),
            &transition.created_at,
            transition.id.as_bytes(),
        );
        if self.raw_get(TreeId::DisputeTransitions, &key)?.is_some() {
            return Err(Error::Conflict(format!(
                "state transition already exists: {}",
                transition.id
            )));
        }
        self.put_typed(TreeId::DisputeTransitions, key, transition)
    }

    pub fn read_latest_state_transition(
        &mut self,
        dispute_id: &DisputeId,
    ) -> Result<Option<StateTransition>, Error> {
        self.check_deadline()?;
        let history = self.read_state_transition_history(dispute_id)?;
        Ok(history.into_iter().last())
    }

    /// Full history for one dispute ordered by (created_at, id) ascending.
    pub fn read_state_transition_history(
        &mut self,
        dispute_id: &DisputeId,
    ) -> Result<Vec<StateTransition>, Error> {
        self.check_deadline()?;
        let prefix = scoped_prefix(dispute_id.as_bytes());
        let rows = self.raw_scan_prefix(TreeId::DisputeTransitions, &prefix)?;
        let mut out = Vec::with_capacity(rows.len());
        for (_, bytes) in rows {
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Consistency ──────────────────────────────────────────────────────────

    /// For every account: the signed sum of its journal entries against its
    /// balance row.
    pub fn validate_balance_consistency(&mut self) -> Result<Vec<ConsistencyReport>, Error> {
        self.check_deadline()?;
        let mut expected: BTreeMap<AccountId, Amount> = BTreeMap::new();
        for (_, bytes) in self.raw_scan_prefix(TreeId::Accounts, &[])? {
            let account: Account = decode(&bytes)?;
            expected.insert(account.id, Amount::ZERO);
        }
        for (_, bytes) in self.raw_scan_prefix(TreeId::JournalEntries, &[])? {
            let entry: JournalEntry = decode(&bytes)?;
            let delta = signed_delta(entry.account_type, entry.entry_type, entry.amount);
            let sum = expected.entry(entry.account_id.clone()).or_insert(Amount::ZERO);
            *sum = sum.checked_add(delta)?;
        }

        let mut reports = Vec::with_capacity(expected.len());
        for (account_id, expected_balance) in expected {
            self.check_deadline()?;
            let actual = self
                .get_typed::<Balance>(TreeId::Balances, account_id.as_bytes())?
                .map(|b| b.balance)
                .unwrap_or(Amount::ZERO);
            let drift = actual.checked_sub(expected_balance)?;
            reports.push(ConsistencyReport {
                account_id,
                expected: expected_balance,
                actual,
                drift,
                is_consistent: drift.is_negligible(),
            });
        }
        Ok(reports)
    }

    // ── Commit / rollback ────────────────────────────────────────────────────

    /// Validate the read set and apply staged writes atomically with respect
    /// to every other transaction on this store.
    pub fn commit(self) -> Result<(), Error> {
        self.check_deadline()?;
        let guard = match self.db.commit_lock().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for ((tree, key), snapshot) in &self.reads {
            let current = self
                .db
                .tree(*tree)
                .get(key)
                .map_err(storage_err)?;
            let current_bytes = current.as_ref().map(|v| v.as_ref());
            if current_bytes != snapshot.as_deref() {
                return Err(Error::SerializationConflict);
            }
        }

        for ((tree, key), bytes) in &self.writes {
            self.db
                .tree(*tree)
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(storage_err)?;
        }

        drop(guard);
        Ok(())
    }

    /// Discard all staged state. Dropping the transaction has the same
    /// effect; the explicit form exists for readability at call sites.
    pub fn rollback(self) {}
}

fn currency_ok(currency: &str) -> bool {
    currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase())
}
