//! Fixed-scale decimal money.
//!
//! Every amount in the ledger carries exactly [`SCALE`](Amount::SCALE)
//! fractional digits. Comparisons that tolerate accumulated drift use
//! [`Amount::EPSILON`] (one minor unit, 1e-8).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use crate::error::Error;

/// A monetary amount with exactly 8 fractional digits.
///
/// The inner [`Decimal`] is always rescaled to scale 8, so `Display` output
/// and byte-level serialisation are canonical. Arithmetic that could overflow
/// goes through the `checked_*` methods and surfaces `Error::Internal` rather
/// than panicking.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Amount {
    /// Fractional digits carried by every amount.
    pub const SCALE: u32 = 8;

    /// One minor unit. Drift below this threshold is considered zero.
    pub const EPSILON: Amount = Amount(dec!(0.00000001));

    /// Largest representable amount: 10^12 − 10^-8.
    pub const MAX: Amount = Amount(dec!(999999999999.99999999));

    pub const ZERO: Amount = Amount(dec!(0.00000000));

    /// Wrap a decimal, rejecting values that cannot be represented at scale 8.
    pub fn new(value: Decimal) -> Result<Self, Error> {
        if value.round_dp(Self::SCALE) != value {
            return Err(Error::InvalidArgument(format!(
                "amount {value} exceeds {} fractional digits",
                Self::SCALE
            )));
        }
        let mut canonical = value;
        canonical.rescale(Self::SCALE);
        Ok(Self(canonical))
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// True iff `|self| < EPSILON`.
    pub fn is_negligible(&self) -> bool {
        self.0.abs() < Self::EPSILON.0
    }

    pub fn checked_add(self, other: Self) -> Result<Self, Error> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| Error::Internal("amount addition overflow".into()))
    }

    pub fn checked_sub(self, other: Self) -> Result<Self, Error> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or_else(|| Error::Internal("amount subtraction overflow".into()))
    }

    /// Multiply by a dimensionless factor (fee rate, reserve percentage),
    /// rounding the product back to scale 8.
    pub fn checked_mul_rate(self, rate: Decimal) -> Result<Self, Error> {
        let product = self
            .0
            .checked_mul(rate)
            .ok_or_else(|| Error::Internal("amount multiplication overflow".into()))?;
        let mut canonical = product.round_dp(Self::SCALE);
        canonical.rescale(Self::SCALE);
        Ok(Self(canonical))
    }

    /// Clamp into `[lo, hi]`.
    pub fn clamp(self, lo: Self, hi: Self) -> Self {
        if self < lo {
            lo
        } else if self > hi {
            hi
        } else {
            self
        }
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let raw = Decimal::from_str(s)
            .map_err(|_| Error::InvalidArgument(format!("malformed amount: {s}")))?;
        Self::new(raw)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        let mut d = Decimal::from(value);
        d.rescale(Self::SCALE);
        Self(d)
    }
}
