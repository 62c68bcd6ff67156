//! Recipient address normalization

use crate::error::{AssistantError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PHONE_SEPARATORS: Regex = Regex::new(r"[\s\-().]").unwrap();
    static ref EMAIL: Regex = Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
}

fn valid_e164_digits(digits: &str) -> bool {
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Normalizes a phone number to E.164 (`+` then 7-15 digits).
///
/// Separators are stripped, a `00` prefix becomes `+`, and a bare run of
/// 10-15 digits is assumed to carry its country code.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let phone = PHONE_SEPARATORS.replace_all(raw.trim(), "");
    if phone.is_empty() {
        return Err(AssistantError::Dispatch("empty phone number".into()));
    }

    if let Some(digits) = phone.strip_prefix('+') {
        return if valid_e164_digits(digits) {
            Ok(phone.to_string())
        } else {
            Err(AssistantError::Dispatch(format!("invalid E.164 format: {}", phone)))
        };
    }

    if let Some(digits) = phone.strip_prefix("00") {
        return if valid_e164_digits(digits) {
            Ok(format!("+{}", digits))
        } else {
            Err(AssistantError::Dispatch(format!("invalid format after 00 removal: +{}", digits)))
        };
    }

    if phone.chars().all(|c| c.is_ascii_digit()) {
        return match phone.len() {
            10..=15 => Ok(format!("+{}", phone)),
            7..=9 => Err(AssistantError::Dispatch(format!(
                "phone too short, possibly missing country code: {}",
                phone
            ))),
            n => Err(AssistantError::Dispatch(format!("invalid phone length: {} digits", n))),
        };
    }

    Err(AssistantError::Dispatch(format!("contains invalid characters: {}", raw)))
}

pub fn validate_email(raw: &str) -> bool {
    EMAIL.is_match(raw.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_formats() {
        assert_eq!(normalize_phone("+91 98765-43210").unwrap(), "+919876543210");
        assert_eq!(normalize_phone("00441234567890").unwrap(), "+441234567890");
        assert_eq!(normalize_phone("(415) 555.0100").unwrap(), "+4155550100");
    }

    #[test]
    fn test_phone_rejections() {
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("5550100").is_err());
        assert!(normalize_phone("+12").is_err());
        assert!(normalize_phone("call me").is_err());
    }

    #[test]
    fn test_email_validation() {
        assert!(validate_email("riya@example.com"));
        assert!(validate_email(" a.b+c@mail.co.in "));
        assert!(!validate_email("riya@example"));
        assert!(!validate_email(""));
    }
}
