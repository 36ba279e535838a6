//! Ledger entities: accounts, journal entries, balances, snapshots.
//!
//! A [`JournalEntry`] is immutable once inserted; the store exposes no update
//! or delete path for it. A [`Balance`] row is maintained transactionally
//! alongside entry insertion so that at every commit point the balance equals
//! the signed sum of the account's entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;
use crate::types::{AccountId, EntryId, Metadata, TransactionId};

// ── Account type ──────────────────────────────────────────────────────────────

/// The five classical account types. Immutable after account creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub const ALL: [AccountType; 5] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Equity,
        AccountType::Revenue,
        AccountType::Expense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<AccountType> {
        match s {
            "asset" => Some(AccountType::Asset),
            "liability" => Some(AccountType::Liability),
            "equity" => Some(AccountType::Equity),
            "revenue" => Some(AccountType::Revenue),
            "expense" => Some(AccountType::Expense),
            _ => None,
        }
    }

    /// True for types whose balance grows with debits.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Entry type ────────────────────────────────────────────────────────────────

/// The side of a journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }

    pub fn opposite(&self) -> EntryType {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Sign rule ─────────────────────────────────────────────────────────────────

/// The balance delta contributed by one entry.
///
/// | account type                | debit | credit |
/// |-----------------------------|-------|--------|
/// | asset, expense              | +a    | −a     |
/// | liability, equity, revenue  | −a    | +a     |
pub fn signed_delta(account_type: AccountType, entry_type: EntryType, amount: Amount) -> Amount {
    match (account_type.is_debit_normal(), entry_type) {
        (true, EntryType::Debit) | (false, EntryType::Credit) => amount,
        (true, EntryType::Credit) | (false, EntryType::Debit) => -amount,
    }
}

// ── Account ───────────────────────────────────────────────────────────────────

/// One ledger account.
///
/// `account_number` is globally unique; `account_type` and `currency` are
/// immutable after creation. A deactivated account rejects new entries but
/// stays readable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    pub account_type: AccountType,
    pub name: String,
    /// ISO-4217 code, three uppercase letters.
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub metadata: Metadata,
}

// ── JournalEntry ──────────────────────────────────────────────────────────────

/// One half of a double-entry posting. Immutable after insertion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    /// Globally unique, human-facing entry number.
    pub entry_number: String,
    /// Groups the debit and credit halves of one posting.
    pub transaction_id: TransactionId,
    pub entry_type: EntryType,
    pub account_id: AccountId,
    /// Denormalised snapshot of the account's type at insertion time.
    pub account_type: AccountType,
    /// Strictly positive.
    pub amount: Amount,
    pub description: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub metadata: Metadata,
}

impl JournalEntry {
    /// Balance delta this entry contributes under the sign rule.
    pub fn signed_amount(&self) -> Amount {
        signed_delta(self.account_type, self.entry_type, self.amount)
    }
}

// ── Balance ───────────────────────────────────────────────────────────────────

/// The authoritative current balance of one account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: AccountId,
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
}

// ── BalanceSnapshot ───────────────────────────────────────────────────────────

/// Historical record of one balance change. Append-only; exactly one snapshot
/// per entry per account, with `balance_after − balance_before` equal to the
/// entry's signed amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub id: String,
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub snapshot_time: DateTime<Utc>,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub balance_change: Amount,
    pub account_type: AccountType,
    pub currency: String,
    pub entry_id: EntryId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub description: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
}

// ── ConsistencyReport ─────────────────────────────────────────────────────────

/// Result of checking one account's balance against the signed sum of its
/// journal entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub account_id: AccountId,
    /// Signed sum of the account's journal entries.
    pub expected: Amount,
    /// The balance row's value.
    pub actual: Amount,
    /// `actual − expected`.
    pub drift: Amount,
    /// True iff `|drift| < ε`.
    pub is_consistent: bool,
}

// ── AccountFilter ─────────────────────────────────────────────────────────────

/// Filter and page spec for account listings.
#[derive(Clone, Debug, Default)]
pub struct AccountFilter {
    pub account_type: Option<AccountType>,
    pub is_active: Option<bool>,
    pub currency: Option<String>,
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
}

impl AccountFilter {
    pub fn matches(&self, account: &Account) -> bool {
        if let Some(t) = self.account_type {
            if account.account_type != t {
                return false;
            }
        }
        if let Some(active) = self.is_active {
            if account.is_active != active {
                return false;
            }
        }
        if let Some(c) = &self.currency {
            if &account.currency != c {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_rule_debit_normal() {
        let a: Amount = "10".parse().unwrap();
        assert_eq!(signed_delta(AccountType::Asset, EntryType::Debit, a), a);
        assert_eq!(signed_delta(AccountType::Asset, EntryType::Credit, a), -a);
        assert_eq!(signed_delta(AccountType::Expense, EntryType::Debit, a), a);
    }

    #[test]
    fn sign_rule_credit_normal() {
        let a: Amount = "10".parse().unwrap();
        assert_eq!(signed_delta(AccountType::Liability, EntryType::Credit, a), a);
        assert_eq!(signed_delta(AccountType::Liability, EntryType::Debit, a), -a);
        assert_eq!(signed_delta(AccountType::Revenue, EntryType::Credit, a), a);
        assert_eq!(signed_delta(AccountType::Equity, EntryType::Debit, a), -a);
    }

    #[test]
    fn account_type_round_trips_through_str() {
        for t in AccountType::ALL {
            assert_eq!(AccountType::parse(t.as_str()), Some(t));
        }
        assert_eq!(AccountType::parse("crypto"), None);
    }
}
