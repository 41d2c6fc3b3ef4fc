use std::sync::LazyLock;

use regex::Regex;

const COUNTRY_CODE: &str = "254";

// +2547XXXXXXXX, +2541XXXXXXXX, 07XXXXXXXX or 01XXXXXXXX
static PAYER_PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\+254|0)[17]\d{8}$").expect("valid phone regex"));

/// Check applied to payer numbers before any I/O happens. Stricter than
/// [`normalize_phone_number`], which also takes `2547XXXXXXXX` and bare subscriber numbers.
pub fn is_valid_payer_phone(raw: &str) -> bool {
    PAYER_PHONE_PATTERN.is_match(raw.trim())
}

/// Converts a phone number into the provider's `2547XXXXXXXX` digits-only format.
///
/// Accepts `07XXXXXXXX`, `+2547XXXXXXXX`, `2547XXXXXXXX` and bare `7XXXXXXXX` subscriber
/// numbers. Anything else is returned unchanged (trimmed) and left for the provider to reject.
pub fn normalize_phone_number(raw: &str) -> String {
    let phone = raw.trim();
    let all_digits = |value: &str| !value.is_empty() && value.chars().all(|c| c.is_ascii_digit());

    if let Some(rest) = phone.strip_prefix('+') {
        if rest.len() == 12 && rest.starts_with(COUNTRY_CODE) && all_digits(rest) {
            return rest.to_string();
        }
        return phone.to_string();
    }

    if !all_digits(phone) {
        return phone.to_string();
    }

    match phone.len() {
        12 if phone.starts_with(COUNTRY_CODE) => phone.to_string(),
        10 if phone.starts_with('0') => format!("{COUNTRY_CODE}{}", &phone[1..]),
        9 => format!("{COUNTRY_CODE}{phone}"),
        _ => phone.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_international_and_normalized_forms_agree() {
        let expected = "254712345678";
        assert_eq!(normalize_phone_number("0712345678"), expected);
        assert_eq!(normalize_phone_number("+254712345678"), expected);
        assert_eq!(normalize_phone_number("254712345678"), expected);
        assert_eq!(normalize_phone_number("712345678"), expected);
        assert_eq!(normalize_phone_number("  0712345678 "), expected);
    }

    #[test]
    fn unrecognised_numbers_are_left_unchanged() {
        for raw in ["12345", "+1 555 0100", "07123456789", "+25571234567", "abc"] {
            assert_eq!(normalize_phone_number(raw), raw);
        }
    }

    #[test]
    fn payer_phone_validation() {
        for valid in [
            "0712345678",
            "0112345678",
            "+254712345678",
            "+254112345678",
        ] {
            assert!(is_valid_payer_phone(valid), "{valid} should be accepted");
        }
        for invalid in [
            "",
            "254712345678",
            "712345678",
            "0812345678",
            "812345678",
            "25471234567",
            "071234567",
            "+2547123456789",
        ] {
            assert!(!is_valid_payer_phone(invalid), "{invalid} should be rejected");
        }
    }
}
