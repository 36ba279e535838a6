use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tally_core::{
    Account, AccountId, Balance, Dispute, DisputeId, Error, JournalEntry, LedgerConfig,
    StateTransition,
};

use crate::tx::Tx;

/// Persistent ledger database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   accounts            — account id bytes                  → bincode(Account)
///   account_numbers     — account number bytes              → account id bytes
///   balances            — account id bytes                  → bincode(Balance)
///   journal_entries     — entry id bytes                    → bincode(JournalEntry)
///   entry_numbers       — entry number bytes                → entry id bytes
///   balance_snapshots   — account id ∥ 0 ∥ ts ∥ entry id    → bincode(BalanceSnapshot)
///   disputes            — dispute id bytes                  → bincode(Dispute)
///   holds               — hold id bytes                     → bincode(Hold)
///   fraud_reserves      — merchant id bytes                 → bincode(FraudReserve)
///   dispute_transitions — dispute id ∥ 0 ∥ ts ∥ row id      → bincode(StateTransition)
///   meta                — utf8 key bytes                    → raw bytes
///
/// `journal_entries` and `balance_snapshots` are append-only: no update or
/// delete path exists anywhere in this crate.
pub struct LedgerDb {
    _db: sled::Db,
    accounts: sled::Tree,
    account_numbers: sled::Tree,
    balances: sled::Tree,
    journal_entries: sled::Tree,
    entry_numbers: sled::Tree,
    balance_snapshots: sled::Tree,
    disputes: sled::Tree,
    holds: sled::Tree,
    fraud_reserves: sled::Tree,
    dispute_transitions: sled::Tree,
    meta: sled::Tree,
    /// Commit-time validation and apply run under this lock, which is what
    /// makes the optimistic transactions serialisable.
    commit_lock: Mutex<()>,
}

/// Addresses one tree from transaction code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum TreeId {
    Accounts,
    AccountNumbers,
    Balances,
    JournalEntries,
    EntryNumbers,
    BalanceSnapshots,
    Disputes,
    Holds,
    FraudReserves,
    DisputeTransitions,
    Meta,
}

const CONFIG_KEY: &str = "ledger_config";

impl LedgerDb {
    /// Open or create the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let db = sled::open(path).map_err(storage_err)?;
        let accounts = db.open_tree("accounts").map_err(storage_err)?;
        let account_numbers = db.open_tree("account_numbers").map_err(storage_err)?;
        let balances = db.open_tree("balances").map_err(storage_err)?;
        let journal_entries = db.open_tree("journal_entries").map_err(storage_err)?;
        let entry_numbers = db.open_tree("entry_numbers").map_err(storage_err)?;
        let balance_snapshots = db.open_tree("balance_snapshots").map_err(storage_err)?;
        let disputes = db.open_tree("disputes").map_err(storage_err)?;
        let holds = db.open_tree("holds").map_err(storage_err)?;
        let fraud_reserves = db.open_tree("fraud_reserves").map_err(storage_err)?;
        let dispute_transitions = db.open_tree("dispute_transitions").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            accounts,
            account_numbers,
            balances,
            journal_entries,
            entry_numbers,
            balance_snapshots,
            disputes,
            holds,
            fraud_reserves,
            dispute_transitions,
            meta,
            commit_lock: Mutex::new(()),
        })
    }

    pub(crate) fn tree(&self, id: TreeId) -> &sled::Tree {
        match id {
            TreeId::Accounts => &self.accounts,
            TreeId::AccountNumbers => &self.account_numbers,
            TreeId::Balances => &self.balances,
            TreeId::JournalEntries => &self.journal_entries,
            TreeId::EntryNumbers => &self.entry_numbers,
            TreeId::BalanceSnapshots => &self.balance_snapshots,
            TreeId::Disputes => &self.disputes,
            TreeId::Holds => &self.holds,
            TreeId::FraudReserves => &self.fraud_reserves,
            TreeId::DisputeTransitions => &self.dispute_transitions,
            TreeId::Meta => &self.meta,
        }
    }

    pub(crate) fn commit_lock(&self) -> &Mutex<()> {
        &self.commit_lock
    }

    /// Start a read-write serialisable transaction with the given deadline.
    pub fn begin_serializable(&self, deadline: Duration) -> Tx<'_> {
        Tx::new(self, deadline)
    }

    // ── Direct snapshot reads (outside any transaction) ──────────────────────

    pub fn get_account(&self, id: &AccountId) -> Result<Option<Account>, Error> {
        self.direct_get(&self.accounts, id.as_bytes())
    }

    pub fn get_account_by_number(&self, number: &str) -> Result<Option<Account>, Error> {
        match self.account_numbers.get(number.as_bytes()).map_err(storage_err)? {
            Some(id_bytes) => self.direct_get(&self.accounts, &id_bytes),
            None => Ok(None),
        }
    }

    pub fn get_balance(&self, account_id: &AccountId) -> Result<Option<Balance>, Error> {
        self.direct_get(&self.balances, account_id.as_bytes())
    }

    pub fn get_journal_entry(&self, id: &tally_core::EntryId) -> Result<Option<JournalEntry>, Error> {
        self.direct_get(&self.journal_entries, id.as_bytes())
    }

    pub fn get_dispute(&self, dispute_id: &DisputeId) -> Result<Option<Dispute>, Error> {
        self.direct_get(&self.disputes, dispute_id.as_bytes())
    }

    /// Full transition history for a dispute, chain order.
    pub fn get_transition_history(
        &self,
        dispute_id: &DisputeId,
    ) -> Result<Vec<StateTransition>, Error> {
        let prefix = scoped_prefix(dispute_id.as_bytes());
        let mut out = Vec::new();
        for item in self.dispute_transitions.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    fn direct_get<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, Error> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Config ───────────────────────────────────────────────────────────────

    /// Persist the engine configuration in the meta tree.
    pub fn put_config(&self, config: &LedgerConfig) -> Result<(), Error> {
        let bytes = encode(config)?;
        self.meta
            .insert(CONFIG_KEY.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_config(&self) -> Result<Option<LedgerConfig>, Error> {
        self.direct_get(&self.meta, CONFIG_KEY.as_bytes())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

// ── Encoding helpers ──────────────────────────────────────────────────────────

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn storage_err(e: sled::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Order-preserving big-endian key fragment for a timestamp.
pub(crate) fn ts_key_bytes(ts: &DateTime<Utc>) -> [u8; 8] {
    let nanos = ts.timestamp_nanos_opt().unwrap_or(i64::MAX);
    ((nanos as u64) ^ (1 << 63)).to_be_bytes()
}

/// `scope ∥ 0x00`, the prefix of every key scoped to one parent id. The NUL
/// terminator keeps `acct_a` from matching keys scoped to `acct_ab`.
pub(crate) fn scoped_prefix(scope: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(scope.len() + 1);
    prefix.extend_from_slice(scope);
    prefix.push(0);
    prefix
}

/// `scope ∥ 0x00 ∥ ts ∥ suffix` — time-ordered key under one parent id.
pub(crate) fn scoped_time_key(scope: &[u8], ts: &DateTime<Utc>, suffix: &[u8]) -> Vec<u8> {
    let mut key = scoped_prefix(scope);
    key.extend_from_slice(&ts_key_bytes(ts));
    key.extend_from_slice(suffix);
    key
}
