//! Structured validators over accounts, amounts, and postings.
//!
//! Each validator returns a [`ValidationResult`] rather than an error so
//! callers can run them as checks (consistency sweeps, admin tooling) as well
//! as gates. The engine converts a failed gate into the matching
//! [`tally_core::Error`] variant.

use serde::Serialize;
use serde_json::json;

use tally_core::constants::{ACCOUNT_NUMBER_MAX_LEN, ACCOUNT_NUMBER_MIN_LEN, CURRENCY_CODE_LEN};
use tally_core::{
    signed_delta, Account, AccountType, Amount, EntryType, Error, LedgerConfig, TransactionId,
};
use tally_store::Tx;

/// Which rule a validation result speaks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    AccountType,
    CurrencyFormat,
    AccountNumber,
    AmountBounds,
    DoubleEntry,
    BalanceConsistency,
    OverdraftPrevention,
    EntryImmutability,
}

/// Outcome of one validation rule.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub kind: ValidationKind,
    pub message: String,
    pub details: serde_json::Value,
}

impl ValidationResult {
    fn ok(kind: ValidationKind) -> Self {
        Self {
            is_valid: true,
            kind,
            message: String::new(),
            details: serde_json::Value::Null,
        }
    }

    fn fail(kind: ValidationKind, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            is_valid: false,
            kind,
            message: message.into(),
            details,
        }
    }

    /// Turn a failed gate into the given error; a passing result is `Ok`.
    pub fn gate<E: FnOnce(String) -> Error>(self, to_error: E) -> Result<(), Error> {
        if self.is_valid {
            Ok(())
        } else {
            Err(to_error(self.message))
        }
    }
}

// ── Field validators ──────────────────────────────────────────────────────────

/// Account type must parse into the fixed five-member set.
pub fn validate_account_type(raw: &str) -> ValidationResult {
    match AccountType::parse(raw) {
        Some(_) => ValidationResult::ok(ValidationKind::AccountType),
        None => ValidationResult::fail(
            ValidationKind::AccountType,
            format!("unknown account type: {raw:?}"),
            json!({ "allowed": AccountType::ALL.map(|t| t.as_str()) }),
        ),
    }
}

/// Currency must match `^[A-Z]{3}$`.
pub fn validate_currency(code: &str) -> ValidationResult {
    let well_formed =
        code.len() == CURRENCY_CODE_LEN && code.chars().all(|c| c.is_ascii_uppercase());
    if well_formed {
        ValidationResult::ok(ValidationKind::CurrencyFormat)
    } else {
        ValidationResult::fail(
            ValidationKind::CurrencyFormat,
            format!("currency must be three uppercase letters, got {code:?}"),
            json!({ "got": code }),
        )
    }
}

/// Account number: 1–50 chars drawn from `[A-Za-z0-9_-]`.
pub fn validate_account_number_format(number: &str) -> ValidationResult {
    let length_ok =
        number.len() >= ACCOUNT_NUMBER_MIN_LEN && number.len() <= ACCOUNT_NUMBER_MAX_LEN;
    let charset_ok = number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if length_ok && charset_ok {
        ValidationResult::ok(ValidationKind::AccountNumber)
    } else {
        ValidationResult::fail(
            ValidationKind::AccountNumber,
            format!("malformed account number: {number:?}"),
            json!({ "got": number, "max_len": ACCOUNT_NUMBER_MAX_LEN }),
        )
    }
}

/// Format plus uniqueness against the store.
pub fn validate_account_number(tx: &mut Tx<'_>, number: &str) -> Result<ValidationResult, Error> {
    let format = validate_account_number_format(number);
    if !format.is_valid {
        return Ok(format);
    }
    if tx.read_account_by_number(number)?.is_some() {
        return Ok(ValidationResult::fail(
            ValidationKind::AccountNumber,
            format!("account number already exists: {number}"),
            json!({ "got": number }),
        ));
    }
    Ok(ValidationResult::ok(ValidationKind::AccountNumber))
}

/// Amount must satisfy `0 < a ≤ 10^12 − 10^-8`.
pub fn validate_amount(amount: Amount) -> ValidationResult {
    if !amount.is_positive() {
        return ValidationResult::fail(
            ValidationKind::AmountBounds,
            format!("amount must be positive, got {amount}"),
            json!({ "got": amount.to_string() }),
        );
    }
    if amount > Amount::MAX {
        return ValidationResult::fail(
            ValidationKind::AmountBounds,
            format!("amount exceeds maximum, got {amount}"),
            json!({ "got": amount.to_string(), "max": Amount::MAX.to_string() }),
        );
    }
    ValidationResult::ok(ValidationKind::AmountBounds)
}

// ── Posting validators ────────────────────────────────────────────────────────

/// For one transaction id, the debit total must equal the credit total
/// within ε.
pub fn validate_double_entry(
    tx: &mut Tx<'_>,
    transaction_id: &TransactionId,
) -> Result<ValidationResult, Error> {
    let entries = tx.entries_for_transaction(transaction_id)?;
    let mut total_debits = Amount::ZERO;
    let mut total_credits = Amount::ZERO;
    for entry in &entries {
        match entry.entry_type {
            EntryType::Debit => total_debits = total_debits.checked_add(entry.amount)?,
            EntryType::Credit => total_credits = total_credits.checked_add(entry.amount)?,
        }
    }
    let difference = total_debits.checked_sub(total_credits)?;
    if difference.is_negligible() {
        Ok(ValidationResult::ok(ValidationKind::DoubleEntry))
    } else {
        Ok(ValidationResult::fail(
            ValidationKind::DoubleEntry,
            format!("transaction {transaction_id} is unbalanced"),
            json!({
                "total_debits": total_debits.to_string(),
                "total_credits": total_credits.to_string(),
                "difference": difference.to_string(),
            }),
        ))
    }
}

/// Per-account balance-vs-entries invariant over the whole store.
pub fn validate_balance_consistency(tx: &mut Tx<'_>) -> Result<ValidationResult, Error> {
    let reports = tx.validate_balance_consistency()?;
    let inconsistent: Vec<_> = reports
        .iter()
        .filter(|r| !r.is_consistent)
        .map(|r| {
            json!({
                "account_id": r.account_id.as_str(),
                "expected": r.expected.to_string(),
                "actual": r.actual.to_string(),
                "drift": r.drift.to_string(),
            })
        })
        .collect();
    if inconsistent.is_empty() {
        Ok(ValidationResult::ok(ValidationKind::BalanceConsistency))
    } else {
        Ok(ValidationResult::fail(
            ValidationKind::BalanceConsistency,
            format!("{} account(s) have drifted", inconsistent.len()),
            json!({ "accounts": inconsistent }),
        ))
    }
}

/// Project the balance after applying one entry side and reject if a gated
/// account type would fall below −ε. Only balance-decreasing legs are gated,
/// so an overdrawn account can still receive funds. The policy set comes
/// from persisted configuration; only `asset` is gated by default.
pub fn validate_overdraft_prevention(
    account: &Account,
    current_balance: Amount,
    amount: Amount,
    side: EntryType,
    config: &LedgerConfig,
) -> Result<ValidationResult, Error> {
    let delta = signed_delta(account.account_type, side, amount);
    let projected = current_balance.checked_add(delta)?;
    let gated = config.overdraft_gated(account.account_type);
    if gated && delta.is_negative() && projected < -Amount::EPSILON {
        Ok(ValidationResult::fail(
            ValidationKind::OverdraftPrevention,
            format!(
                "account {} would be overdrawn: balance {current_balance}, projected {projected}",
                account.id
            ),
            json!({
                "account_id": account.id.as_str(),
                "balance": current_balance.to_string(),
                "projected": projected.to_string(),
            }),
        ))
    } else {
        Ok(ValidationResult::ok(ValidationKind::OverdraftPrevention))
    }
}

/// Necessary (not sufficient) check for append-only behaviour: no two
/// journal entries may share an entry number.
pub fn validate_entry_immutability(tx: &mut Tx<'_>) -> Result<ValidationResult, Error> {
    use std::collections::BTreeMap;
    let mut seen: BTreeMap<String, u32> = BTreeMap::new();
    for entry in tx.all_journal_entries()? {
        *seen.entry(entry.entry_number).or_insert(0) += 1;
    }
    let duplicates: Vec<_> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(number, count)| json!({ "entry_number": number, "count": count }))
        .collect();
    if duplicates.is_empty() {
        Ok(ValidationResult::ok(ValidationKind::EntryImmutability))
    } else {
        Ok(ValidationResult::fail(
            ValidationKind::EntryImmutability,
            format!("{} duplicated entry number(s)", duplicates.len()),
            json!({ "duplicates": duplicates }),
        ))
    }
}
