//! The ledger engine: account lifecycle, double-entry posting, balance
//! reads, reconciliation, and consistency validation.
//!
//! Every mutation runs inside one serialisable transaction via
//! [`with_retry`]: read-lock the touched rows, validate, stage entries,
//! balances and snapshots, commit. Every operation — success or failure — is
//! appended to the audit chain before returning.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use tally_audit::AuditChain;
use tally_core::mask::mask_metadata;
use tally_core::{
    Account, AccountFilter, AccountId, Amount, Balance, BalanceSnapshot, CallContext,
    ConsistencyReport, EntryId, EntryType, Error, ErrorKind, JournalEntry, LedgerConfig, Metadata,
    Reply, TransactionId,
};
use tally_store::{
    with_retry, LedgerDb, Tx, FULL_SCAN_DEADLINE, MULTI_ROW_VALIDATION_DEADLINE,
    SINGLE_ROW_WRITE_DEADLINE,
};

use crate::validate;

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct CreateAccountRequest {
    pub account_number: String,
    pub account_type: tally_core::AccountType,
    pub name: String,
    pub currency: String,
    pub created_by: String,
    pub metadata: Metadata,
}

/// Single-sided posting request. The other leg lands on the counterparty
/// account configured for `reference_type`.
#[derive(Clone, Debug)]
pub struct PostingRequest {
    pub account_id: AccountId,
    pub amount: Amount,
    pub currency: String,
    pub description: String,
    pub reference_type: String,
    pub reference_id: Option<String>,
    pub created_by: String,
    pub metadata: Metadata,
}

#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub currency: String,
    pub description: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub created_by: String,
    pub metadata: Metadata,
}

/// The two legs of a committed posting.
#[derive(Clone, Debug)]
pub struct PostingReceipt {
    pub transaction_id: TransactionId,
    pub debit_entry: JournalEntry,
    pub credit_entry: JournalEntry,
}

/// Snapshot replay for one account plus the drift verdict.
#[derive(Clone, Debug)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub snapshots: Vec<BalanceSnapshot>,
    pub has_drift: bool,
    pub drift_amount: Amount,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct LedgerEngine {
    db: Arc<LedgerDb>,
    audit: Arc<AuditChain>,
    config: LedgerConfig,
}

impl LedgerEngine {
    /// Build an engine with the given configuration, persisting it so later
    /// [`LedgerEngine::load`] calls see the same policy.
    pub fn new(
        db: Arc<LedgerDb>,
        audit: Arc<AuditChain>,
        config: LedgerConfig,
    ) -> Result<Self, Error> {
        db.put_config(&config)?;
        Ok(Self { db, audit, config })
    }

    /// Build an engine from the configuration persisted in the store,
    /// falling back to defaults on a fresh store.
    pub fn load(db: Arc<LedgerDb>, audit: Arc<AuditChain>) -> Result<Self, Error> {
        let config = db.get_config()?.unwrap_or_default();
        Ok(Self { db, audit, config })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Map a reference type to its counterparty account for single-sided
    /// postings. The account must already exist.
    pub fn register_counterparty(
        &mut self,
        reference_type: impl Into<String>,
        account_id: AccountId,
    ) -> Result<(), Error> {
        if self.db.get_account(&account_id)?.is_none() {
            return Err(Error::not_found("account", account_id.as_str()));
        }
        self.config
            .counterparties
            .insert(reference_type.into(), account_id);
        self.db.put_config(&self.config)
    }

    // ── Account lifecycle ────────────────────────────────────────────────────

    pub fn create_account(
        &self,
        ctx: &CallContext,
        req: CreateAccountRequest,
    ) -> Result<Reply<Account>, Error> {
        let result = self.create_account_inner(&req);
        match &result {
            Ok(account) => {
                info!(account_id = %account.id, number = %account.account_number, "account created");
                self.audit_ok(
                    ctx,
                    "create_account",
                    json!({
                        "account_id": account.id.as_str(),
                        "account_number": account.account_number,
                        "account_type": account.account_type.as_str(),
                        "currency": account.currency,
                        "metadata": mask_metadata(&req.metadata),
                    }),
                );
            }
            Err(e) => self.audit_err(ctx, "create_account", e),
        }
        result.map(|account| Reply::new(ctx, account))
    }

    fn create_account_inner(&self, req: &CreateAccountRequest) -> Result<Account, Error> {
        if req.created_by.trim().is_empty() {
            return Err(Error::InvalidArgument("created_by must not be empty".into()));
        }
        validate::validate_currency(&req.currency).gate(Error::InvalidArgument)?;
        validate::validate_account_number_format(&req.account_number)
            .gate(Error::InvalidArgument)?;

        let account = Account {
            id: AccountId::generate(),
            account_number: req.account_number.clone(),
            account_type: req.account_type,
            name: req.name.clone(),
            currency: req.currency.clone(),
            is_active: true,
            created_at: Utc::now(),
            created_by: req.created_by.clone(),
            metadata: req.metadata.clone(),
        };

        with_retry(&self.db, SINGLE_ROW_WRITE_DEADLINE, |tx| {
            validate::validate_account_number(tx, &req.account_number)?
                .gate(Error::Conflict)?;
            tx.insert_account(&account)?;
            tx.update_balance(&Balance {
                account_id: account.id.clone(),
                balance: Amount::ZERO,
                updated_at: account.created_at,
            })
        })?;
        Ok(account)
    }

    /// Deactivate an account: new entries are rejected, reads keep working.
    pub fn deactivate_account(
        &self,
        ctx: &CallContext,
        account_id: &AccountId,
    ) -> Result<Reply<Account>, Error> {
        let result = with_retry(&self.db, SINGLE_ROW_WRITE_DEADLINE, |tx| {
            let mut account = tx.lock_account(account_id)?;
            account.is_active = false;
            tx.update_account(&account)?;
            Ok(account)
        });
        match &result {
            Ok(account) => {
                info!(account_id = %account.id, "account deactivated");
                self.audit_ok(ctx, "deactivate_account", json!({ "account_id": account_id.as_str() }));
            }
            Err(e) => self.audit_err(ctx, "deactivate_account", e),
        }
        result.map(|account| Reply::new(ctx, account))
    }

    pub fn get_account(
        &self,
        ctx: &CallContext,
        account_id: &AccountId,
    ) -> Result<Reply<Account>, Error> {
        let result = self.db.get_account(account_id).and_then(|found| {
            found.ok_or_else(|| Error::not_found("account", account_id.as_str()))
        });
        self.audit_on_err(ctx, "get_account", result)
            .map(|account| Reply::new(ctx, account))
    }

    pub fn list_accounts(
        &self,
        ctx: &CallContext,
        filter: &AccountFilter,
    ) -> Result<Reply<Vec<Account>>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            tx.list_accounts(filter)
        });
        self.audit_on_err(ctx, "list_accounts", result)
            .map(|accounts| Reply::new(ctx, accounts))
    }

    // ── Balances ─────────────────────────────────────────────────────────────

    /// Snapshot read of the balance row, outside any transaction.
    pub fn get_balance(
        &self,
        ctx: &CallContext,
        account_id: &AccountId,
    ) -> Result<Reply<Amount>, Error> {
        let result = self.db.get_balance(account_id).and_then(|found| {
            found.ok_or_else(|| Error::not_found("balance", account_id.as_str()))
        });
        self.audit_on_err(ctx, "get_balance", result)
            .map(|balance| Reply::new(ctx, balance.balance))
    }

    // ── Postings ─────────────────────────────────────────────────────────────

    /// Post a credit entry on `account_id`; the balancing debit lands on the
    /// counterparty configured for the request's reference type.
    pub fn credit(
        &self,
        ctx: &CallContext,
        req: PostingRequest,
    ) -> Result<Reply<PostingReceipt>, Error> {
        let result = self.single_sided(&req, EntryType::Credit);
        self.finish_posting(ctx, "credit", &req.metadata, result)
    }

    /// Post a debit entry on `account_id`; the balancing credit lands on the
    /// counterparty configured for the request's reference type.
    pub fn debit(
        &self,
        ctx: &CallContext,
        req: PostingRequest,
    ) -> Result<Reply<PostingReceipt>, Error> {
        let result = self.single_sided(&req, EntryType::Debit);
        self.finish_posting(ctx, "debit", &req.metadata, result)
    }

    /// Atomic two-entry posting moving `amount` from one account to another:
    /// a credit on the source, a debit on the destination, one transaction
    /// id, two snapshots.
    pub fn transfer(
        &self,
        ctx: &CallContext,
        req: TransferRequest,
    ) -> Result<Reply<PostingReceipt>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            self.post_double_entry(
                tx,
                &PostingArgs {
                    debit_account_id: &req.to_account_id,
                    credit_account_id: &req.from_account_id,
                    amount: req.amount,
                    currency: &req.currency,
                    description: &req.description,
                    reference_type: req.reference_type.as_deref(),
                    reference_id: req.reference_id.as_deref(),
                    created_by: &req.created_by,
                    metadata: &req.metadata,
                },
            )
        });
        self.finish_posting(ctx, "transfer", &req.metadata, result)
    }

    fn single_sided(
        &self,
        req: &PostingRequest,
        side: EntryType,
    ) -> Result<PostingReceipt, Error> {
        if req.created_by.trim().is_empty() {
            return Err(Error::InvalidArgument("created_by must not be empty".into()));
        }
        let counterparty = self
            .config
            .counterparty_for(&req.reference_type)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "no counterparty configured for reference type {:?}",
                    req.reference_type
                ))
            })?
            .clone();

        let (debit_account_id, credit_account_id) = match side {
            EntryType::Debit => (&req.account_id, &counterparty),
            EntryType::Credit => (&counterparty, &req.account_id),
        };

        with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            self.post_double_entry(
                tx,
                &PostingArgs {
                    debit_account_id,
                    credit_account_id,
                    amount: req.amount,
                    currency: &req.currency,
                    description: &req.description,
                    reference_type: Some(&req.reference_type),
                    reference_id: req.reference_id.as_deref(),
                    created_by: &req.created_by,
                    metadata: &req.metadata,
                },
            )
        })
    }

    fn finish_posting(
        &self,
        ctx: &CallContext,
        op: &str,
        metadata: &Metadata,
        result: Result<PostingReceipt, Error>,
    ) -> Result<Reply<PostingReceipt>, Error> {
        match &result {
            Ok(receipt) => {
                info!(
                    transaction_id = %receipt.transaction_id,
                    debit_account = %receipt.debit_entry.account_id,
                    credit_account = %receipt.credit_entry.account_id,
                    amount = %receipt.debit_entry.amount,
                    "{op} posted"
                );
                self.audit_ok(
                    ctx,
                    op,
                    json!({
                        "transaction_id": receipt.transaction_id.as_str(),
                        "debit_account": receipt.debit_entry.account_id.as_str(),
                        "credit_account": receipt.credit_entry.account_id.as_str(),
                        "amount": receipt.debit_entry.amount.to_string(),
                        "currency": receipt.debit_entry.currency,
                        "metadata": mask_metadata(metadata),
                    }),
                );
            }
            Err(e) => {
                warn!(error = %e, "{op} rejected");
                self.audit_err(ctx, op, e);
            }
        }
        result.map(|receipt| Reply::new(ctx, receipt))
    }

    fn post_double_entry(
        &self,
        tx: &mut Tx<'_>,
        args: &PostingArgs<'_>,
    ) -> Result<PostingReceipt, Error> {
        if args.debit_account_id == args.credit_account_id {
            return Err(Error::InvalidArgument(
                "posting requires two distinct accounts".into(),
            ));
        }
        validate::validate_amount(args.amount).gate(Error::InvalidArgument)?;
        validate::validate_currency(args.currency).gate(Error::InvalidArgument)?;

        // Lock in key order: lexicographically smaller id first.
        let (debit_account, credit_account) = if args.debit_account_id < args.credit_account_id {
            let d = tx.lock_account(args.debit_account_id)?;
            let c = tx.lock_account(args.credit_account_id)?;
            (d, c)
        } else {
            let c = tx.lock_account(args.credit_account_id)?;
            let d = tx.lock_account(args.debit_account_id)?;
            (d, c)
        };

        for account in [&debit_account, &credit_account] {
            if !account.is_active {
                return Err(Error::FailedPrecondition(format!(
                    "account {} is inactive",
                    account.id
                )));
            }
            if account.currency != args.currency {
                return Err(Error::FailedPrecondition(format!(
                    "currency mismatch: account {} is {}, posting is {}",
                    account.id, account.currency, args.currency
                )));
            }
        }

        let debit_balance = tx.read_balance(&debit_account.id)?;
        let credit_balance = tx.read_balance(&credit_account.id)?;

        for (account, balance, side) in [
            (&debit_account, &debit_balance, EntryType::Debit),
            (&credit_account, &credit_balance, EntryType::Credit),
        ] {
            let check = validate::validate_overdraft_prevention(
                account,
                balance.balance,
                args.amount,
                side,
                &self.config,
            )?;
            if !check.is_valid {
                return Err(Error::InsufficientBalance {
                    account_id: account.id.to_string(),
                    need: args.amount.to_string(),
                    have: balance.balance.to_string(),
                });
            }
        }

        let now = Utc::now();
        let transaction_id = TransactionId::generate();
        let debit_entry = self.build_entry(&debit_account, &transaction_id, EntryType::Debit, args, now);
        let credit_entry =
            self.build_entry(&credit_account, &transaction_id, EntryType::Credit, args, now);

        tx.insert_journal_entry(&debit_entry)?;
        tx.insert_journal_entry(&credit_entry)?;

        self.apply_leg(tx, &debit_balance, &debit_entry, now)?;
        self.apply_leg(tx, &credit_balance, &credit_entry, now)?;

        Ok(PostingReceipt {
            transaction_id,
            debit_entry,
            credit_entry,
        })
    }

    fn build_entry(
        &self,
        account: &Account,
        transaction_id: &TransactionId,
        entry_type: EntryType,
        args: &PostingArgs<'_>,
        now: DateTime<Utc>,
    ) -> JournalEntry {
        let id = EntryId::generate();
        JournalEntry {
            entry_number: format!("JE-{id}"),
            id,
            transaction_id: transaction_id.clone(),
            entry_type,
            account_id: account.id.clone(),
            account_type: account.account_type,
            amount: args.amount,
            description: args.description.to_string(),
            reference_type: args.reference_type.map(str::to_string),
            reference_id: args.reference_id.map(str::to_string),
            currency: args.currency.to_string(),
            created_at: now,
            created_by: args.created_by.to_string(),
            metadata: args.metadata.clone(),
        }
    }

    /// Apply one entry to its balance row and record the snapshot.
    fn apply_leg(
        &self,
        tx: &mut Tx<'_>,
        balance_before: &Balance,
        entry: &JournalEntry,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let change = entry.signed_amount();
        let after = balance_before.balance.checked_add(change)?;
        tx.update_balance(&Balance {
            account_id: entry.account_id.clone(),
            balance: after,
            updated_at: now,
        })?;
        tx.insert_balance_snapshot(&BalanceSnapshot {
            id: format!("snap_{}", uuid7::uuid7()),
            account_id: entry.account_id.clone(),
            transaction_id: entry.transaction_id.clone(),
            snapshot_time: now,
            balance_before: balance_before.balance,
            balance_after: after,
            balance_change: change,
            account_type: entry.account_type,
            currency: entry.currency.clone(),
            entry_id: entry.id.clone(),
            entry_type: entry.entry_type,
            amount: entry.amount,
            description: entry.description.clone(),
            reference_type: entry.reference_type.clone(),
            reference_id: entry.reference_id.clone(),
        })
    }

    // ── Reconciliation & consistency ─────────────────────────────────────────

    /// Snapshots for `[start, end]` ascending, plus the account's current
    /// drift verdict.
    pub fn reconcile(
        &self,
        ctx: &CallContext,
        account_id: &AccountId,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Reply<Reconciliation>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let account = tx.lock_account(account_id)?;
            let snapshots = tx.snapshots_for_account(account_id, start, end)?;

            let mut expected = Amount::ZERO;
            for entry in tx.entries_for_account(account_id)? {
                expected = expected.checked_add(entry.signed_amount())?;
            }
            let actual = tx.read_balance(&account.id)?.balance;
            let drift = actual.checked_sub(expected)?;
            Ok(Reconciliation {
                account_id: account.id,
                snapshots,
                has_drift: !drift.is_negligible(),
                drift_amount: drift,
            })
        });
        match &result {
            Ok(recon) => {
                if recon.has_drift {
                    warn!(account_id = %recon.account_id, drift = %recon.drift_amount, "reconciliation drift detected");
                }
                self.audit_ok(
                    ctx,
                    "reconcile",
                    json!({
                        "account_id": account_id.as_str(),
                        "snapshots": recon.snapshots.len(),
                        "has_drift": recon.has_drift,
                        "drift_amount": recon.drift_amount.to_string(),
                    }),
                );
            }
            Err(e) => self.audit_err(ctx, "reconcile", e),
        }
        result.map(|recon| Reply::new(ctx, recon))
    }

    /// The per-account balance invariant over the whole store.
    pub fn validate_consistency(
        &self,
        ctx: &CallContext,
    ) -> Result<Reply<Vec<ConsistencyReport>>, Error> {
        let result = with_retry(&self.db, FULL_SCAN_DEADLINE, |tx| {
            tx.validate_balance_consistency()
        });
        match &result {
            Ok(reports) => {
                let drifted = reports.iter().filter(|r| !r.is_consistent).count();
                if drifted > 0 {
                    warn!(drifted, "balance consistency violations detected");
                }
                self.audit_ok(
                    ctx,
                    "validate_consistency",
                    json!({ "accounts": reports.len(), "drifted": drifted }),
                );
            }
            Err(e) => self.audit_err(ctx, "validate_consistency", e),
        }
        result.map(|reports| Reply::new(ctx, reports))
    }

    // ── Audit plumbing ───────────────────────────────────────────────────────

    /// Pass-through that records a failing read on the audit chain.
    fn audit_on_err<T>(
        &self,
        ctx: &CallContext,
        op: &str,
        result: Result<T, Error>,
    ) -> Result<T, Error> {
        if let Err(e) = &result {
            self.audit_err(ctx, op, e);
        }
        result
    }

    fn audit_ok(&self, ctx: &CallContext, op: &str, details: serde_json::Value) {
        self.audit.append(
            json!({
                "op": op,
                "status": "ok",
                "correlation_id": ctx.correlation_id,
                "details": details,
            })
            .to_string(),
        );
    }

    fn audit_err(&self, ctx: &CallContext, op: &str, error: &Error) {
        // Store internals never reach audit payloads verbatim.
        let message = if error.kind() == ErrorKind::Internal {
            "internal error".to_string()
        } else {
            error.to_string()
        };
        self.audit.append(
            json!({
                "op": op,
                "status": "error",
                "correlation_id": ctx.correlation_id,
                "kind": format!("{:?}", error.kind()),
                "message": message,
            })
            .to_string(),
        );
    }
}

struct PostingArgs<'s> {
    debit_account_id: &'s AccountId,
    credit_account_id: &'s AccountId,
    amount: Amount,
    currency: &'s str,
    description: &'s str,
    reference_type: Option<&'s str>,
    reference_id: Option<&'s str>,
    created_by: &'s str,
    metadata: &'s Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::AccountType;

    fn setup() -> (tempfile::TempDir, LedgerEngine) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Arc::new(LedgerDb::open(dir.path().join("ledger")).expect("open db"));
        let audit = Arc::new(AuditChain::new());
        let engine = LedgerEngine::new(db, audit, LedgerConfig::default()).expect("engine");
        (dir, engine)
    }

    fn ctx() -> CallContext {
        CallContext::new("test-corr")
    }

    fn create(
        engine: &LedgerEngine,
        number: &str,
        account_type: AccountType,
        currency: &str,
    ) -> Account {
        engine
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    account_number: number.to_string(),
                    account_type,
                    name: number.to_string(),
                    currency: currency.to_string(),
                    created_by: "tester".to_string(),
                    metadata: Metadata::new(),
                },
            )
            .expect("create account")
            .value
    }

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn transfer_req(from: &Account, to: &Account, value: &str) -> TransferRequest {
        TransferRequest {
            from_account_id: from.id.clone(),
            to_account_id: to.id.clone(),
            amount: amount(value),
            currency: "USD".to_string(),
            description: "test transfer".to_string(),
            reference_type: None,
            reference_id: None,
            created_by: "tester".to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn create_account_initialises_zero_balance() {
        let (_dir, engine) = setup();
        let account = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let balance = engine.get_balance(&ctx(), &account.id).unwrap().value;
        assert_eq!(balance, Amount::ZERO);
    }

    #[test]
    fn duplicate_account_number_is_conflict() {
        let (_dir, engine) = setup();
        create(&engine, "ASSET001", AccountType::Asset, "USD");
        let err = engine
            .create_account(
                &ctx(),
                CreateAccountRequest {
                    account_number: "ASSET001".to_string(),
                    account_type: AccountType::Liability,
                    name: "dup".to_string(),
                    currency: "USD".to_string(),
                    created_by: "tester".to_string(),
                    metadata: Metadata::new(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn bad_currency_is_invalid_argument() {
        let (_dir, engine) = setup();
        for currency in ["usd", "US", "US$"] {
            let err = engine
                .create_account(
                    &ctx(),
                    CreateAccountRequest {
                        account_number: format!("ACC-{currency}"),
                        account_type: AccountType::Asset,
                        name: "x".to_string(),
                        currency: currency.to_string(),
                        created_by: "tester".to_string(),
                        metadata: Metadata::new(),
                    },
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "currency {currency}");
        }
    }

    #[test]
    fn transfer_moves_amount_between_asset_accounts() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let b = create(&engine, "ASSET002", AccountType::Asset, "USD");

        // Fund A so the overdraft gate allows the outflow.
        let funding = LedgerConfig::default().with_overdraft_gate(AccountType::Asset, false);
        let engine_ungated =
            LedgerEngine::new(engine.db.clone(), engine.audit.clone(), funding).unwrap();
        engine_ungated
            .transfer(&ctx(), transfer_req(&b, &a, "1000"))
            .unwrap();

        let receipt = engine
            .transfer(&ctx(), transfer_req(&a, &b, "250"))
            .unwrap()
            .value;
        assert_eq!(receipt.debit_entry.account_id, b.id);
        assert_eq!(receipt.credit_entry.account_id, a.id);
        assert_eq!(
            receipt.debit_entry.transaction_id,
            receipt.credit_entry.transaction_id
        );

        assert_eq!(engine.get_balance(&ctx(), &a.id).unwrap().value, amount("750"));
        // B was overdrawn by the ungated funding leg, then received 250.
        assert_eq!(engine.get_balance(&ctx(), &b.id).unwrap().value, amount("-750"));
    }

    #[test]
    fn transfer_to_self_rejected() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let err = engine
            .transfer(&ctx(), transfer_req(&a, &a, "10"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn transfer_zero_amount_rejected() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let b = create(&engine, "ASSET002", AccountType::Asset, "USD");
        let err = engine
            .transfer(&ctx(), transfer_req(&a, &b, "0"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn transfer_currency_mismatch_rejected() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let b = create(&engine, "EUR001", AccountType::Asset, "EUR");
        let err = engine
            .transfer(&ctx(), transfer_req(&a, &b, "10"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[test]
    fn transfer_from_inactive_account_rejected() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let b = create(&engine, "ASSET002", AccountType::Asset, "USD");
        engine.deactivate_account(&ctx(), &a.id).unwrap();
        let err = engine
            .transfer(&ctx(), transfer_req(&a, &b, "10"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[test]
    fn overdraft_gate_blocks_asset_outflow() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let b = create(&engine, "ASSET002", AccountType::Asset, "USD");

        let audit_before = engine.audit.len();
        let err = engine
            .transfer(&ctx(), transfer_req(&a, &b, "200"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        // The rejection is audited and no balance moved.
        assert!(engine.audit.len() > audit_before);
        assert_eq!(engine.get_balance(&ctx(), &a.id).unwrap().value, Amount::ZERO);
        assert_eq!(engine.get_balance(&ctx(), &b.id).unwrap().value, Amount::ZERO);
    }

    #[test]
    fn liability_accounts_are_not_gated_by_default() {
        let (_dir, engine) = setup();
        let a = create(&engine, "LIAB001", AccountType::Liability, "USD");
        let b = create(&engine, "LIAB002", AccountType::Liability, "USD");
        // Source leg is a credit: liability credit is +a, destination debit
        // is −a, so B goes negative — allowed, liabilities are ungated.
        engine.transfer(&ctx(), transfer_req(&a, &b, "500")).unwrap();
        assert_eq!(engine.get_balance(&ctx(), &a.id).unwrap().value, amount("500"));
        assert_eq!(engine.get_balance(&ctx(), &b.id).unwrap().value, amount("-500"));
    }

    #[test]
    fn single_sided_posting_requires_counterparty_mapping() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let err = engine
            .credit(
                &ctx(),
                PostingRequest {
                    account_id: a.id.clone(),
                    amount: amount("10"),
                    currency: "USD".to_string(),
                    description: "no mapping".to_string(),
                    reference_type: "card_capture".to_string(),
                    reference_id: None,
                    created_by: "tester".to_string(),
                    metadata: Metadata::new(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn credit_then_debit_round_trips_balance() {
        let (_dir, engine) = setup();
        let a = create(&engine, "ASSET001", AccountType::Asset, "USD");
        let settlement = create(&engine, "REV001", AccountType::Revenue, "USD");

        let mut engine = engine;
        engine
            .register_counterparty("card_capture", settlement.id.clone())
            .unwrap();
        // Asset outflows are gated; this test exercises the round-trip only.
        let db = engine.db.clone();
        let audit = engine.audit.clone();
        let config = engine.config.clone().with_overdraft_gate(AccountType::Asset, false);
        let engine = LedgerEngine::new(db, audit, config).unwrap();

        let before = engine.get_balance(&ctx(), &a.id).unwrap().value;
        let req = PostingRequest {
            account_id: a.id.clone(),
            amount: amount("75.5"),
            currency: "USD".to_string(),
            description: "round trip".to_string(),
            reference_type: "card_capture".to_string(),
            reference_id: Some("cap-1".to_string()),
            created_by: "tester".to_string(),
            metadata: Metadata::new(),
        };
        engine.credit(&ctx(), req.clone()).unwrap();
        engine.debit(&ctx(), req).unwrap();
        let after = engine.get_balance(&ctx(), &a.id).unwrap().value;
        assert_eq!(before, after);
    }

    #[test]
    fn consistency_holds_after_postings() {
        let (_dir, engine) = setup();
        let a = create(&engine, "LIAB001", AccountType::Liability, "USD");
        let b = create(&engine, "LIAB002", AccountType::Liability, "USD");
        engine.transfer(&ctx(), transfer_req(&a, &b, "10")).unwrap();
        engine.transfer(&ctx(), transfer_req(&a, &b, "20")).unwrap();

        let reports = engine.validate_consistency(&ctx()).unwrap().value;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.is_consistent));
    }

    #[test]
    fn reconcile_returns_ordered_snapshots_without_drift() {
        let (_dir, engine) = setup();
        let a = create(&engine, "LIAB001", AccountType::Liability, "USD");
        let b = create(&engine, "LIAB002", AccountType::Liability, "USD");
        let start = Utc::now();
        engine.transfer(&ctx(), transfer_req(&a, &b, "10")).unwrap();
        engine.transfer(&ctx(), transfer_req(&a, &b, "5")).unwrap();
        let end = Utc::now();

        let recon = engine
            .reconcile(&ctx(), &a.id, &start, &end)
            .unwrap()
            .value;
        assert_eq!(recon.snapshots.len(), 2);
        assert!(!recon.has_drift);
        assert!(recon.drift_amount.is_negligible());
        assert!(recon.snapshots[0].snapshot_time <= recon.snapshots[1].snapshot_time);
        // Each snapshot's delta matches its entry under the sign rule.
        for snap in &recon.snapshots {
            assert_eq!(
                snap.balance_after.checked_sub(snap.balance_before).unwrap(),
                snap.balance_change
            );
        }
    }

    #[test]
    fn audit_chain_stays_verifiable() {
        let (_dir, engine) = setup();
        let a = create(&engine, "LIAB001", AccountType::Liability, "USD");
        let b = create(&engine, "LIAB002", AccountType::Liability, "USD");
        engine.transfer(&ctx(), transfer_req(&a, &b, "10")).unwrap();
        let _ = engine.transfer(&ctx(), transfer_req(&a, &a, "10"));
        assert!(engine.audit.verify());
        assert!(engine.audit.len() >= 4);
    }
}
