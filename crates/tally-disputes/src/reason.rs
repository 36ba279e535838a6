//! Static reason-code catalogue and chargeback fee schedule.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::fmt;

use tally_core::{Amount, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardBrand::Visa => "visa",
            CardBrand::Mastercard => "mastercard",
            CardBrand::Amex => "amex",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisputeCategory {
    Fraud,
    ConsumerDispute,
    ProcessingError,
    Authorization,
}

/// One catalogue entry. The catalogue is static configuration, not data:
/// codes are added by deployment, never at runtime.
#[derive(Clone, Debug)]
pub struct ReasonCode {
    pub code: &'static str,
    pub description: &'static str,
    pub brand: CardBrand,
    pub category: DisputeCategory,
    pub is_fraud: bool,
    pub has_chargeback_fee: bool,
    /// Days after the original entry during which this code may be raised.
    pub validity_days: i64,
    /// Codes the network pre-authorizes: the dispute is authorized (hold and
    /// reserve applied) in the same transaction that creates it.
    pub immediate_authorize: bool,
}

static CATALOGUE: Lazy<BTreeMap<&'static str, ReasonCode>> = Lazy::new(|| {
    let codes = [
        ReasonCode {
            code: "10.4",
            description: "Other Fraud - Card-Absent Environment",
            brand: CardBrand::Visa,
            category: DisputeCategory::Fraud,
            is_fraud: true,
            has_chargeback_fee: true,
            validity_days: 120,
            immediate_authorize: false,
        },
        ReasonCode {
            code: "12.5",
            description: "Incorrect Amount",
            brand: CardBrand::Visa,
            category: DisputeCategory::ProcessingError,
            is_fraud: false,
            has_chargeback_fee: false,
            validity_days: 120,
            immediate_authorize: false,
        },
        ReasonCode {
            code: "13.1",
            description: "Merchandise/Services Not Received",
            brand: CardBrand::Visa,
            category: DisputeCategory::ConsumerDispute,
            is_fraud: false,
            has_chargeback_fee: true,
            validity_days: 120,
            immediate_authorize: false,
        },
        ReasonCode {
            code: "14.1",
            description: "Fraudulent Card-Present Transaction",
            brand: CardBrand::Visa,
            category: DisputeCategory::Fraud,
            is_fraud: true,
            has_chargeback_fee: true,
            validity_days: 120,
            immediate_authorize: false,
        },
        ReasonCode {
            code: "4837",
            description: "No Cardholder Authorization",
            brand: CardBrand::Mastercard,
            category: DisputeCategory::Fraud,
            is_fraud: true,
            has_chargeback_fee: true,
            validity_days: 120,
            immediate_authorize: false,
        },
        ReasonCode {
            code: "4853",
            description: "Cardholder Dispute - Not as Described",
            brand: CardBrand::Mastercard,
            category: DisputeCategory::ConsumerDispute,
            is_fraud: false,
            has_chargeback_fee: true,
            validity_days: 120,
            immediate_authorize: false,
        },
        ReasonCode {
            code: "4870",
            description: "Chargeback Authorization",
            brand: CardBrand::Mastercard,
            category: DisputeCategory::Authorization,
            is_fraud: true,
            has_chargeback_fee: true,
            validity_days: 90,
            immediate_authorize: true,
        },
        ReasonCode {
            code: "F29",
            description: "Card Not Present",
            brand: CardBrand::Amex,
            category: DisputeCategory::Fraud,
            is_fraud: true,
            has_chargeback_fee: true,
            validity_days: 120,
            immediate_authorize: false,
        },
    ];
    codes.into_iter().map(|rc| (rc.code, rc)).collect()
});

/// Resolve a reason code, or `None` for unknown codes.
pub fn lookup(code: &str) -> Option<&'static ReasonCode> {
    CATALOGUE.get(code)
}

/// Fee schedule per brand:
/// Visa `clamp(2% × amount, 5, 15)`, Mastercard `clamp(2.5% × amount, 8, 25)`,
/// anything else a flat 10. Units follow the dispute currency.
pub fn chargeback_fee(brand: CardBrand, amount: Amount) -> Result<Amount, Error> {
    let (rate, lo, hi): (Decimal, Amount, Amount) = match brand {
        CardBrand::Visa => (dec!(0.02), Amount::from(5), Amount::from(15)),
        CardBrand::Mastercard => (dec!(0.025), Amount::from(8), Amount::from(25)),
        CardBrand::Amex => return Ok(Amount::from(10)),
    };
    Ok(amount.checked_mul_rate(rate)?.clamp(lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn known_codes_resolve() {
        let rc = lookup("14.1").unwrap();
        assert_eq!(rc.brand, CardBrand::Visa);
        assert!(rc.is_fraud);
        assert!(rc.has_chargeback_fee);
        assert!(lookup("9999").is_none());
    }

    #[test]
    fn visa_fee_clamps_to_floor_and_ceiling() {
        // 2% of 250 = 5.00, exactly the floor.
        assert_eq!(chargeback_fee(CardBrand::Visa, amount("250")).unwrap(), amount("5"));
        // 2% of 100 = 2.00 → clamped up to 5.
        assert_eq!(chargeback_fee(CardBrand::Visa, amount("100")).unwrap(), amount("5"));
        // 2% of 2000 = 40 → clamped down to 15.
        assert_eq!(chargeback_fee(CardBrand::Visa, amount("2000")).unwrap(), amount("15"));
    }

    #[test]
    fn mastercard_fee_clamps() {
        assert_eq!(chargeback_fee(CardBrand::Mastercard, amount("100")).unwrap(), amount("8"));
        assert_eq!(
            chargeback_fee(CardBrand::Mastercard, amount("400")).unwrap(),
            amount("10")
        );
        assert_eq!(
            chargeback_fee(CardBrand::Mastercard, amount("5000")).unwrap(),
            amount("25")
        );
    }

    #[test]
    fn other_brands_pay_flat_fee() {
        assert_eq!(chargeback_fee(CardBrand::Amex, amount("99999")).unwrap(), amount("10"));
    }
}
