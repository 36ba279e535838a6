//! The dispute service: couples ledger effects (holds, fraud reserves) to
//! the dispute state machine, one serialisable transaction per operation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use tally_audit::AuditChain;
use tally_core::constants::HOLD_VALIDITY_DAYS;
use tally_core::mask::mask_metadata;
use tally_core::{
    AccountId, Amount, CallContext, Dispute, DisputeFilter, DisputeId, DisputeStatus, EntryId,
    EntryType, Error, ErrorKind, FraudReserve, Hold, HoldId, HoldStatus, JournalEntry,
    LedgerConfig, Metadata, Reply, StateTransition,
};
use tally_store::{with_retry, LedgerDb, Tx, MULTI_ROW_VALIDATION_DEADLINE};

use crate::reason;
use crate::state;

// ── Requests / replies ────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct CreateDisputeRequest {
    /// External case id; generated when absent.
    pub dispute_id: Option<DisputeId>,
    pub journal_entry_id: EntryId,
    pub merchant_id: String,
    pub disputed_amount: Amount,
    pub currency: String,
    pub reason_code: String,
    pub created_by: String,
    pub metadata: Metadata,
}

#[derive(Clone, Debug)]
pub struct ConfigureReserveRequest {
    pub merchant_id: String,
    pub reserve_account_id: Option<AccountId>,
    pub reserve_percentage: Decimal,
    pub minimum_reserve_amount: Amount,
    pub currency: String,
}

/// Merchant reserve position as of the read.
#[derive(Clone, Debug)]
pub struct ReserveSummary {
    pub merchant_id: String,
    pub current_reserve_amount: Amount,
    pub minimum_reserve_amount: Amount,
    /// `max(current, minimum)`.
    pub effective_reserve: Amount,
    pub reserve_percentage: Decimal,
    pub currency: String,
    pub is_active: bool,
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct DisputeService {
    db: Arc<LedgerDb>,
    audit: Arc<AuditChain>,
    config: LedgerConfig,
}

impl DisputeService {
    pub fn new(db: Arc<LedgerDb>, audit: Arc<AuditChain>, config: LedgerConfig) -> Self {
        Self { db, audit, config }
    }

    /// Build a service from the configuration persisted in the store.
    pub fn load(db: Arc<LedgerDb>, audit: Arc<AuditChain>) -> Result<Self, Error> {
        let config = db.get_config()?.unwrap_or_default();
        Ok(Self { db, audit, config })
    }

    // ── CreateDispute ────────────────────────────────────────────────────────

    /// Create a dispute in PENDING: validates the request against the
    /// referenced journal entry, masks PII, computes the chargeback fee from
    /// the reason code's fee policy, writes the dispute row plus the genesis
    /// transition, and — for immediate-authorize reason codes — performs the
    /// authorization step in the same transaction.
    pub fn create_dispute(
        &self,
        ctx: &CallContext,
        req: CreateDisputeRequest,
    ) -> Result<Reply<Dispute>, Error> {
        let result = self.create_dispute_inner(&req);
        match &result {
            Ok(dispute) => {
                info!(
                    dispute_id = %dispute.dispute_id,
                    entry = %dispute.journal_entry_id,
                    status = %dispute.status,
                    "dispute created"
                );
                self.audit_ok(
                    ctx,
                    "create_dispute",
                    json!({
                        "dispute_id": dispute.dispute_id.as_str(),
                        "journal_entry_id": dispute.journal_entry_id.as_str(),
                        "merchant_id": dispute.merchant_id,
                        "disputed_amount": dispute.disputed_amount.to_string(),
                        "chargeback_fee": dispute.chargeback_fee.to_string(),
                        "reason_code": dispute.reason_code,
                        "status": dispute.status.as_str(),
                        "metadata": dispute.metadata,
                    }),
                );
            }
            Err(e) => self.audit_err(ctx, "create_dispute", e),
        }
        result.map(|dispute| Reply::new(ctx, dispute))
    }

    fn create_dispute_inner(&self, req: &CreateDisputeRequest) -> Result<Dispute, Error> {
        if req.created_by.trim().is_empty() {
            return Err(Error::InvalidArgument("created_by must not be empty".into()));
        }
        if !req.disputed_amount.is_positive() {
            return Err(Error::InvalidArgument(format!(
                "disputed amount must be positive, got {}",
                req.disputed_amount
            )));
        }
        let reason = reason::lookup(&req.reason_code).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown reason code: {:?}", req.reason_code))
        })?;

        let dispute_id = req
            .dispute_id
            .clone()
            .unwrap_or_else(DisputeId::generate);
        let masked_metadata = mask_metadata(&req.metadata);

        with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let now = Utc::now();
            let entry = tx
                .read_journal_entry(&req.journal_entry_id)?
                .ok_or_else(|| Error::not_found("journal entry", req.journal_entry_id.as_str()))?;

            if req.disputed_amount > entry.amount {
                return Err(Error::FailedPrecondition(format!(
                    "disputed amount {} exceeds original amount {}",
                    req.disputed_amount, entry.amount
                )));
            }
            if req.currency != entry.currency {
                return Err(Error::FailedPrecondition(format!(
                    "dispute currency {} does not match entry currency {}",
                    req.currency, entry.currency
                )));
            }
            if now - entry.created_at > Duration::days(reason.validity_days) {
                return Err(Error::FailedPrecondition(format!(
                    "reason code {} only valid for {} days after the entry",
                    reason.code, reason.validity_days
                )));
            }

            let chargeback_fee = if reason.has_chargeback_fee {
                reason::chargeback_fee(reason.brand, req.disputed_amount)?
            } else {
                Amount::ZERO
            };

            let dispute = Dispute {
                id: format!("d_{}", uuid7::uuid7()),
                dispute_id: dispute_id.clone(),
                journal_entry_id: req.journal_entry_id.clone(),
                merchant_id: req.merchant_id.clone(),
                original_amount: entry.amount,
                disputed_amount: req.disputed_amount,
                currency: req.currency.clone(),
                reason_code: reason.code.to_string(),
                reason_text: reason.description.to_string(),
                status: DisputeStatus::Pending,
                is_fraud: reason.is_fraud,
                chargeback_fee,
                reserve_contribution: None,
                created_at: now,
                created_by: req.created_by.clone(),
                resolved_at: None,
                resolved_by: None,
                metadata: masked_metadata.clone(),
            };
            tx.insert_dispute(&dispute)?;
            state::record_initial_transition(tx, &dispute, &req.created_by, now)?;

            if reason.immediate_authorize {
                state::propose_transition(
                    tx,
                    &dispute.dispute_id,
                    DisputeStatus::Authorized,
                    "authorized on creation",
                    &req.created_by,
                    Metadata::new(),
                    now,
                )?;
                self.apply_authorization(tx, &dispute, &entry, &req.created_by, now)?;
            }

            tx.read_dispute(&dispute.dispute_id)?
                .ok_or_else(|| Error::Internal("dispute vanished within transaction".into()))
        })
    }

    // ── AuthorizeDispute ─────────────────────────────────────────────────────

    /// PENDING → AUTHORIZED: places a 30-day hold for
    /// `disputed_amount + chargeback_fee` on the debited account of the
    /// referenced entry and grows the merchant's fraud reserve by
    /// `disputed_amount × reserve_percentage`.
    pub fn authorize_dispute(
        &self,
        ctx: &CallContext,
        dispute_id: &DisputeId,
        actor: &str,
    ) -> Result<Reply<Dispute>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let now = Utc::now();
            let dispute = tx
                .read_dispute(dispute_id)?
                .ok_or_else(|| Error::not_found("dispute", dispute_id.as_str()))?;
            state::propose_transition(
                tx,
                dispute_id,
                DisputeStatus::Authorized,
                "dispute authorized",
                actor,
                Metadata::new(),
                now,
            )?;
            let entry = tx
                .read_journal_entry(&dispute.journal_entry_id)?
                .ok_or_else(|| {
                    Error::not_found("journal entry", dispute.journal_entry_id.as_str())
                })?;
            self.apply_authorization(tx, &dispute, &entry, actor, now)?;
            tx.read_dispute(dispute_id)?
                .ok_or_else(|| Error::Internal("dispute vanished within transaction".into()))
        });
        self.finish(ctx, "authorize_dispute", dispute_id, result)
    }

    /// The coupled ledger effects of authorization: the hold and the reserve.
    fn apply_authorization(
        &self,
        tx: &mut Tx<'_>,
        dispute: &Dispute,
        entry: &JournalEntry,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Hold, Error> {
        let debited_account = self.debited_account_of(tx, entry)?;
        let held_amount = dispute
            .disputed_amount
            .checked_add(dispute.chargeback_fee)?;

        let hold = Hold {
            id: format!("h_{}", uuid7::uuid7()),
            hold_id: HoldId::generate(),
            dispute_id: dispute.dispute_id.clone(),
            account_id: debited_account,
            held_amount,
            currency: dispute.currency.clone(),
            status: HoldStatus::Active,
            expires_at: now + Duration::days(HOLD_VALIDITY_DAYS),
            created_at: now,
            created_by: actor.to_string(),
            released_at: None,
            released_by: None,
        };
        tx.insert_hold(&hold)?;

        let mut reserve = match tx.read_fraud_reserve(&dispute.merchant_id)? {
            Some(reserve) => reserve,
            None => FraudReserve {
                merchant_id: dispute.merchant_id.clone(),
                reserve_account_id: None,
                reserve_percentage: self.config.default_reserve_percentage,
                minimum_reserve_amount: self.config.default_minimum_reserve,
                current_reserve_amount: Amount::ZERO,
                currency: dispute.currency.clone(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        };
        let contribution = dispute
            .disputed_amount
            .checked_mul_rate(reserve.reserve_percentage)?;
        reserve.current_reserve_amount =
            reserve.current_reserve_amount.checked_add(contribution)?;
        reserve.updated_at = now;
        tx.upsert_fraud_reserve(&reserve)?;
        tx.record_reserve_contribution(&dispute.dispute_id, contribution)?;

        info!(
            dispute_id = %dispute.dispute_id,
            hold_id = %hold.hold_id,
            held = %held_amount,
            reserve_contribution = %contribution,
            "dispute authorized"
        );
        Ok(hold)
    }

    /// The account carrying the debit leg of the disputed posting. When the
    /// referenced entry is itself the credit leg, the sibling debit leg is
    /// resolved through the shared transaction id.
    fn debited_account_of(
        &self,
        tx: &mut Tx<'_>,
        entry: &JournalEntry,
    ) -> Result<AccountId, Error> {
        if entry.entry_type == EntryType::Debit {
            return Ok(entry.account_id.clone());
        }
        let siblings = tx.entries_for_transaction(&entry.transaction_id)?;
        siblings
            .into_iter()
            .find(|e| e.entry_type == EntryType::Debit)
            .map(|e| e.account_id)
            .ok_or_else(|| {
                Error::FailedPrecondition(format!(
                    "transaction {} has no debit leg",
                    entry.transaction_id
                ))
            })
    }

    // ── SettleTransaction ────────────────────────────────────────────────────

    /// Transition every AUTHORIZED dispute on the given entry to SETTLED.
    pub fn settle_transaction(
        &self,
        ctx: &CallContext,
        journal_entry_id: &EntryId,
        actor: &str,
    ) -> Result<Reply<Vec<Dispute>>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let now = Utc::now();
            let authorized = tx.list_disputes(&DisputeFilter {
                journal_entry_id: Some(journal_entry_id.clone()),
                status: Some(DisputeStatus::Authorized),
                ..DisputeFilter::default()
            })?;
            let mut settled = Vec::with_capacity(authorized.len());
            for dispute in authorized {
                state::propose_transition(
                    tx,
                    &dispute.dispute_id,
                    DisputeStatus::Settled,
                    "transaction settled",
                    actor,
                    Metadata::new(),
                    now,
                )?;
                settled.push(
                    tx.read_dispute(&dispute.dispute_id)?
                        .ok_or_else(|| Error::Internal("dispute vanished".into()))?,
                );
            }
            Ok(settled)
        });
        match &result {
            Ok(disputes) => {
                info!(entry = %journal_entry_id, settled = disputes.len(), "transaction settled");
                self.audit_ok(
                    ctx,
                    "settle_transaction",
                    json!({
                        "journal_entry_id": journal_entry_id.as_str(),
                        "settled": disputes.len(),
                    }),
                );
            }
            Err(e) => self.audit_err(ctx, "settle_transaction", e),
        }
        result.map(|disputes| Reply::new(ctx, disputes))
    }

    // ── InitiateDispute ──────────────────────────────────────────────────────

    /// SETTLED → DISPUTED.
    pub fn initiate_dispute(
        &self,
        ctx: &CallContext,
        dispute_id: &DisputeId,
        actor: &str,
    ) -> Result<Reply<Dispute>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            state::propose_transition(
                tx,
                dispute_id,
                DisputeStatus::Disputed,
                "cardholder initiated dispute",
                actor,
                Metadata::new(),
                Utc::now(),
            )?;
            tx.read_dispute(dispute_id)?
                .ok_or_else(|| Error::Internal("dispute vanished within transaction".into()))
        });
        self.finish(ctx, "initiate_dispute", dispute_id, result)
    }

    // ── ReverseDispute ───────────────────────────────────────────────────────

    /// Eject to REVERSED from any non-terminal state: records resolution,
    /// releases the dispute's ACTIVE holds, and takes back the reserve
    /// contribution made at authorization.
    pub fn reverse_dispute(
        &self,
        ctx: &CallContext,
        dispute_id: &DisputeId,
        reason_text: &str,
        actor: &str,
    ) -> Result<Reply<Dispute>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let now = Utc::now();
            let dispute = tx
                .read_dispute(dispute_id)?
                .ok_or_else(|| Error::not_found("dispute", dispute_id.as_str()))?;

            state::propose_transition(
                tx,
                dispute_id,
                DisputeStatus::Reversed,
                reason_text,
                actor,
                Metadata::new(),
                now,
            )?;
            tx.update_dispute_resolution(dispute_id, now, actor)?;

            for hold in tx.holds_for_dispute(dispute_id)? {
                if hold.status == HoldStatus::Active {
                    tx.release_hold(&hold.hold_id, HoldStatus::Released, now, actor)?;
                }
            }

            if let Some(contribution) = dispute.reserve_contribution {
                if let Some(mut reserve) = tx.read_fraud_reserve(&dispute.merchant_id)? {
                    reserve.current_reserve_amount =
                        reserve.current_reserve_amount.checked_sub(contribution)?;
                    reserve.updated_at = now;
                    tx.upsert_fraud_reserve(&reserve)?;
                }
            }

            tx.read_dispute(dispute_id)?
                .ok_or_else(|| Error::Internal("dispute vanished within transaction".into()))
        });
        self.finish(ctx, "reverse_dispute", dispute_id, result)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get_dispute(
        &self,
        ctx: &CallContext,
        dispute_id: &DisputeId,
    ) -> Result<Reply<Dispute>, Error> {
        let result = self.db.get_dispute(dispute_id).and_then(|found| {
            found.ok_or_else(|| Error::not_found("dispute", dispute_id.as_str()))
        });
        self.audit_on_err(ctx, "get_dispute", result)
            .map(|dispute| Reply::new(ctx, dispute))
    }

    pub fn list_disputes(
        &self,
        ctx: &CallContext,
        filter: &DisputeFilter,
    ) -> Result<Reply<Vec<Dispute>>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            tx.list_disputes(filter)
        });
        self.audit_on_err(ctx, "list_disputes", result)
            .map(|disputes| Reply::new(ctx, disputes))
    }

    /// The dispute's full hash-chained transition history, chain order.
    pub fn get_dispute_history(
        &self,
        ctx: &CallContext,
        dispute_id: &DisputeId,
    ) -> Result<Reply<Vec<StateTransition>>, Error> {
        let result = (|| {
            if self.db.get_dispute(dispute_id)?.is_none() {
                return Err(Error::not_found("dispute", dispute_id.as_str()));
            }
            self.db.get_transition_history(dispute_id)
        })();
        self.audit_on_err(ctx, "get_dispute_history", result)
            .map(|history| Reply::new(ctx, history))
    }

    /// Recompute the dispute's transition chain.
    pub fn verify_dispute_chain(&self, dispute_id: &DisputeId) -> Result<bool, Error> {
        if self.db.get_dispute(dispute_id)?.is_none() {
            return Err(Error::not_found("dispute", dispute_id.as_str()));
        }
        let history = self.db.get_transition_history(dispute_id)?;
        Ok(state::verify_chain(&history))
    }

    // ── Reserves ─────────────────────────────────────────────────────────────

    /// Upsert a merchant's reserve configuration.
    pub fn configure_reserve(
        &self,
        ctx: &CallContext,
        req: ConfigureReserveRequest,
    ) -> Result<Reply<FraudReserve>, Error> {
        if req.reserve_percentage < Decimal::ZERO || req.reserve_percentage > Decimal::ONE {
            return Err(Error::InvalidArgument(format!(
                "reserve percentage must be in [0, 1], got {}",
                req.reserve_percentage
            )));
        }
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let now = Utc::now();
            let reserve = match tx.read_fraud_reserve(&req.merchant_id)? {
                Some(mut existing) => {
                    existing.reserve_account_id = req.reserve_account_id.clone();
                    existing.reserve_percentage = req.reserve_percentage;
                    existing.minimum_reserve_amount = req.minimum_reserve_amount;
                    existing.currency = req.currency.clone();
                    existing.updated_at = now;
                    existing
                }
                None => FraudReserve {
                    merchant_id: req.merchant_id.clone(),
                    reserve_account_id: req.reserve_account_id.clone(),
                    reserve_percentage: req.reserve_percentage,
                    minimum_reserve_amount: req.minimum_reserve_amount,
                    current_reserve_amount: Amount::ZERO,
                    currency: req.currency.clone(),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                },
            };
            tx.upsert_fraud_reserve(&reserve)?;
            Ok(reserve)
        });
        match &result {
            Ok(reserve) => self.audit_ok(
                ctx,
                "configure_reserve",
                json!({
                    "merchant_id": reserve.merchant_id,
                    "reserve_percentage": reserve.reserve_percentage.to_string(),
                    "minimum_reserve_amount": reserve.minimum_reserve_amount.to_string(),
                }),
            ),
            Err(e) => self.audit_err(ctx, "configure_reserve", e),
        }
        result.map(|reserve| Reply::new(ctx, reserve))
    }

    /// The merchant's reserve position; the effective reserve is floored at
    /// the configured minimum.
    pub fn calculate_merchant_reserve(
        &self,
        ctx: &CallContext,
        merchant_id: &str,
    ) -> Result<Reply<ReserveSummary>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            tx.read_fraud_reserve(merchant_id)
        })
        .and_then(|found| found.ok_or_else(|| Error::not_found("fraud reserve", merchant_id)));
        let reserve = self.audit_on_err(ctx, "calculate_merchant_reserve", result)?;

        let effective = reserve
            .current_reserve_amount
            .max(reserve.minimum_reserve_amount);
        Ok(Reply::new(
            ctx,
            ReserveSummary {
                merchant_id: reserve.merchant_id,
                current_reserve_amount: reserve.current_reserve_amount,
                minimum_reserve_amount: reserve.minimum_reserve_amount,
                effective_reserve: effective,
                reserve_percentage: reserve.reserve_percentage,
                currency: reserve.currency,
                is_active: reserve.is_active,
            },
        ))
    }

    // ── Hold expiry ──────────────────────────────────────────────────────────

    /// Release every ACTIVE hold whose expiry has passed. Intended to run
    /// from a periodic sweep.
    pub fn release_expired_holds(
        &self,
        ctx: &CallContext,
        actor: &str,
    ) -> Result<Reply<Vec<Hold>>, Error> {
        let result = with_retry(&self.db, MULTI_ROW_VALIDATION_DEADLINE, |tx| {
            let now = Utc::now();
            let expired = tx.list_expired_holds(&now)?;
            let mut released = Vec::with_capacity(expired.len());
            for hold in expired {
                tx.release_hold(&hold.hold_id, HoldStatus::Released, now, actor)?;
                released.push(
                    tx.read_hold(&hold.hold_id)?
                        .ok_or_else(|| Error::Internal("hold vanished".into()))?,
                );
            }
            Ok(released)
        });
        match &result {
            Ok(released) => {
                if !released.is_empty() {
                    info!(count = released.len(), "expired holds released");
                }
                self.audit_ok(
                    ctx,
                    "release_expired_holds",
                    json!({ "released": released.len() }),
                );
            }
            Err(e) => self.audit_err(ctx, "release_expired_holds", e),
        }
        result.map(|released| Reply::new(ctx, released))
    }

    // ── Shared plumbing ──────────────────────────────────────────────────────

    fn finish(
        &self,
        ctx: &CallContext,
        op: &str,
        dispute_id: &DisputeId,
        result: Result<Dispute, Error>,
    ) -> Result<Reply<Dispute>, Error> {
        match &result {
            Ok(dispute) => {
                info!(dispute_id = %dispute.dispute_id, status = %dispute.status, "{op} applied");
                self.audit_ok(
                    ctx,
                    op,
                    json!({
                        "dispute_id": dispute.dispute_id.as_str(),
                        "status": dispute.status.as_str(),
                    }),
                );
            }
            Err(e) => {
                warn!(dispute_id = %dispute_id, error = %e, "{op} rejected");
                self.audit_err(ctx, op, e);
            }
        }
        result.map(|dispute| Reply::new(ctx, dispute))
    }

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
