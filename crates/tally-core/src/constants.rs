//! ─── Tally Ledger Constants ─────────────────────────────────────────────────
//!
//! Fixed numeric and policy constants shared across the workspace. Deadlines
//! and the retry budget live in `tally-store`; fee schedules live in
//! `tally-disputes`.

// ── Amounts ──────────────────────────────────────────────────────────────────

/// Fractional digits carried by every amount.
pub const AMOUNT_SCALE: u32 = 8;

// ── Account numbers ──────────────────────────────────────────────────────────

/// Minimum length of an account number.
pub const ACCOUNT_NUMBER_MIN_LEN: usize = 1;

/// Maximum length of an account number.
pub const ACCOUNT_NUMBER_MAX_LEN: usize = 50;

// ── Currencies ───────────────────────────────────────────────────────────────

/// ISO-4217 alphabetic code length.
pub const CURRENCY_CODE_LEN: usize = 3;

// ── Holds ────────────────────────────────────────────────────────────────────

/// Validity of a dispute hold from the moment of authorization.
pub const HOLD_VALIDITY_DAYS: i64 = 30;
