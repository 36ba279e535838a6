//! PII masking for metadata maps.
//!
//! Applied before any metadata reaches the audit chain or an error message.
//! Matching is by key name, case-insensitive; unknown fields pass through
//! unchanged.

use crate::types::Metadata;

/// Mask all recognised PII fields of a metadata map.
pub fn mask_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), mask_field(k, v)))
        .collect()
}

/// Mask one field by key name. Unknown keys return the value unchanged.
pub fn mask_field(key: &str, value: &str) -> String {
    match key.to_ascii_lowercase().as_str() {
        "card_number" | "card_pan" | "pan" => mask_pan(value),
        "cvv" | "cvc" | "card_cvv" => "***".to_string(),
        "expiry" | "card_expiry" | "expiry_date" => mask_expiry(value),
        "cardholder" | "cardholder_name" | "card_holder" => mask_cardholder(value),
        "email" | "customer_email" => mask_email(value),
        "phone" | "phone_number" | "customer_phone" => mask_phone(value),
        "ip" | "ip_address" | "client_ip" => mask_ip(value),
        _ => value.to_string(),
    }
}

/// `4111111111111111` → `****1111`.
fn mask_pan(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    let last4 = if digits.len() >= 4 {
        &digits[digits.len() - 4..]
    } else {
        digits.as_str()
    };
    format!("****{last4}")
}

/// `12/26` → `**/26`.
fn mask_expiry(value: &str) -> String {
    let year = value.rsplit('/').next().unwrap_or("");
    let yy = if year.len() >= 2 {
        &year[year.len() - 2..]
    } else {
        "**"
    };
    format!("**/{yy}")
}

/// `John Michael Smith` → `John * Smith`. One- and two-token names are left
/// unchanged (the first and last tokens are the kept ones).
fn mask_cardholder(value: &str) -> String {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.len() <= 2 {
        return value.to_string();
    }
    let mut masked = Vec::with_capacity(tokens.len());
    masked.push(tokens[0]);
    for _ in 1..tokens.len() - 1 {
        masked.push("*");
    }
    masked.push(tokens[tokens.len() - 1]);
    masked.join(" ")
}

/// `alice@example.com` → `a***@example.com`.
fn mask_email(value: &str) -> String {
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = &local[..local.chars().next().map(char::len_utf8).unwrap_or(0)];
            format!("{first}***@{domain}")
        }
        _ => value.to_string(),
    }
}

/// `+1-555-123-4567` → `***4567`.
fn mask_phone(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    let last4 = if digits.len() >= 4 {
        &digits[digits.len() - 4..]
    } else {
        digits.as_str()
    };
    format!("***{last4}")
}

/// `203.0.113.9` → `203.0.113.*`.
fn mask_ip(value: &str) -> String {
    let octets: Vec<&str> = value.split('.').collect();
    if octets.len() == 4 {
        format!("{}.{}.{}.*", octets[0], octets[1], octets[2])
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pan_keeps_last_four() {
        assert_eq!(mask_field("card_number", "4111111111111111"), "****1111");
        assert_eq!(mask_field("PAN", "5500 0000 0000 0004"), "****0004");
    }

    #[test]
    fn cvv_fully_masked() {
        assert_eq!(mask_field("cvv", "123"), "***");
        assert_eq!(mask_field("CVC", "9876"), "***");
    }

    #[test]
    fn expiry_keeps_two_digit_year() {
        assert_eq!(mask_field("expiry", "12/26"), "**/26");
        assert_eq!(mask_field("expiry", "12/2026"), "**/26");
    }

    #[test]
    fn cardholder_keeps_first_and_last_tokens() {
        assert_eq!(mask_field("cardholder", "John Michael Smith"), "John * Smith");
        assert_eq!(mask_field("cardholder_name", "Jane Doe"), "Jane Doe");
        assert_eq!(mask_field("cardholder", "Prince"), "Prince");
    }

    #[test]
    fn email_keeps_first_local_char() {
        assert_eq!(mask_field("email", "alice@example.com"), "a***@example.com");
        assert_eq!(mask_field("email", "not-an-email"), "not-an-email");
    }

    #[test]
    fn phone_keeps_last_four_digits() {
        assert_eq!(mask_field("phone", "+1-555-123-4567"), "***4567");
    }

    #[test]
    fn ip_keeps_first_three_octets() {
        assert_eq!(mask_field("ip_address", "203.0.113.9"), "203.0.113.*");
        assert_eq!(mask_field("ip_address", "::1"), "::1");
    }

    #[test]
    fn unknown_fields_pass_through() {
        assert_eq!(mask_field("order_ref", "ORD-1"), "ORD-1");
    }

    #[test]
    fn map_masking_preserves_keys() {
        let mut md = Metadata::new();
        md.insert("card_number".into(), "4111111111111111".into());
        md.insert("order_ref".into(), "ORD-1".into());
        let masked = mask_metadata(&md);
        assert_eq!(masked["card_number"], "****1111");
        assert_eq!(masked["order_ref"], "ORD-1");
    }
}
