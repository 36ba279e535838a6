//! Dispute entities: chargeback records, funds holds, merchant fraud
//! reserves, and hash-chained state transitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;
use crate::types::{AccountId, DisputeId, EntryId, HoldId, Metadata};

// ── DisputeStatus ─────────────────────────────────────────────────────────────

/// Dispute lifecycle states. REVERSED is terminal and reachable from every
/// non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Pending,
    Authorized,
    Settled,
    Disputed,
    Reversed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Pending => "PENDING",
            DisputeStatus::Authorized => "AUTHORIZED",
            DisputeStatus::Settled => "SETTLED",
            DisputeStatus::Disputed => "DISPUTED",
            DisputeStatus::Reversed => "REVERSED",
        }
    }

    pub fn parse(s: &str) -> Option<DisputeStatus> {
        match s {
            "PENDING" => Some(DisputeStatus::Pending),
            "AUTHORIZED" => Some(DisputeStatus::Authorized),
            "SETTLED" => Some(DisputeStatus::Settled),
            "DISPUTED" => Some(DisputeStatus::Disputed),
            "REVERSED" => Some(DisputeStatus::Reversed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DisputeStatus::Reversed)
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Dispute ───────────────────────────────────────────────────────────────────

/// One chargeback case against a journal entry.
///
/// `status` mirrors the `to_state` of the latest chained transition; the
/// transition log is the authoritative history. Once REVERSED, the
/// `resolved_*` fields are set and no further transitions are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    /// Internal row id.
    pub id: String,
    /// External case identifier; unique.
    pub dispute_id: DisputeId,
    pub journal_entry_id: EntryId,
    pub merchant_id: String,
    pub original_amount: Amount,
    /// 0 < disputed ≤ original.
    pub disputed_amount: Amount,
    pub currency: String,
    pub reason_code: String,
    pub reason_text: String,
    pub status: DisputeStatus,
    pub is_fraud: bool,
    pub chargeback_fee: Amount,
    /// Amount added to the merchant's fraud reserve at authorization; the
    /// reverse path decrements exactly this value.
    pub reserve_contribution: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub metadata: Metadata,
}

// ── Hold ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Released,
    Converted,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "ACTIVE",
            HoldStatus::Released => "RELEASED",
            HoldStatus::Converted => "CONVERTED",
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reservation of funds against a dispute. Created when the dispute enters
/// AUTHORIZED; released on REVERSED or expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hold {
    pub id: String,
    pub hold_id: HoldId,
    pub dispute_id: DisputeId,
    pub account_id: AccountId,
    pub held_amount: Amount,
    pub currency: String,
    pub status: HoldStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<String>,
}

// ── FraudReserve ──────────────────────────────────────────────────────────────

/// Per-merchant running reserve sized as a percentage of disputed volume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FraudReserve {
    /// Unique per merchant.
    pub merchant_id: String,
    /// Ledger account backing the reserve; None until an operator configures
    /// one (auto-initialised reserves start unbacked).
    pub reserve_account_id: Option<AccountId>,
    /// In [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub reserve_percentage: Decimal,
    pub minimum_reserve_amount: Amount,
    pub current_reserve_amount: Amount,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── StateTransition ───────────────────────────────────────────────────────────

/// One link in a dispute's hash chain.
///
/// `prev_hash` equals the `transition_hash` of the immediately preceding
/// transition for the same dispute (ordered by `created_at`, then id);
/// `transition_hash` is the canonical digest of this record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: String,
    pub dispute_id: DisputeId,
    pub from_state: DisputeStatus,
    pub to_state: DisputeStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub transition_hash: String,
    pub prev_hash: String,
    pub metadata: Metadata,
}

/// Filter for dispute listings.
#[derive(Clone, Debug, Default)]
pub struct DisputeFilter {
    pub merchant_id: Option<String>,
    pub status: Option<DisputeStatus>,
    pub journal_entry_id: Option<EntryId>,
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
}

impl DisputeFilter {
    pub fn matches(&self, dispute: &Dispute) -> bool {
        if let Some(m) = &self.merchant_id {
            if &dispute.merchant_id != m {
                return false;
            }
        }
        if let Some(s) = self.status {
            if dispute.status != s {
                return false;
            }
        }
        if let Some(e) = &self.journal_entry_id {
            if &dispute.journal_entry_id != e {
                return false;
            }
        }
        true
    }
}
