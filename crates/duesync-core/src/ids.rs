use serde::{Deserialize, Serialize};
use std::fmt;

/// A fiscal invoice access key: fixed 44-character numeric string.
///
/// Immutable once seeded by the SAP importer; never reassigned once a
/// link to a DUE number exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvoiceKey(String);

/// A DUE (export declaration) number: up to 14 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DueNumber(String);

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("invoice key must be exactly 44 characters, got {0}")]
    InvoiceKeyLength(usize),
    #[error("invoice key must be numeric: {0:?}")]
    InvoiceKeyNotNumeric(String),
    #[error("DUE number must be 1-14 characters, got {0}")]
    DueNumberLength(usize),
    #[error("DUE number must be empty-free and alphanumeric: {0:?}")]
    DueNumberInvalid(String),
}

const INVOICE_KEY_LEN: usize = 44;
const DUE_NUMBER_MAX_LEN: usize = 14;

impl InvoiceKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.len() != INVOICE_KEY_LEN {
            return Err(IdError::InvoiceKeyLength(raw.len()));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvoiceKeyNotNumeric(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for InvoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl DueNumber {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > DUE_NUMBER_MAX_LEN {
            return Err(IdError::DueNumberLength(raw.len()));
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(IdError::DueNumberInvalid(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_key_accepts_44_digit_string() {
        let key = "1".repeat(44);
        assert!(InvoiceKey::new(key).is_ok());
    }

    #[test]
    fn invoice_key_rejects_wrong_length() {
        assert!(matches!(
            InvoiceKey::new("123"),
            Err(IdError::InvoiceKeyLength(3))
        ));
    }

    #[test]
    fn invoice_key_rejects_non_numeric() {
        let key = "a".repeat(44);
        assert!(matches!(
            InvoiceKey::new(key),
            Err(IdError::InvoiceKeyNotNumeric(_))
        ));
    }

    #[test]
    fn due_number_accepts_typical_value() {
        assert!(DueNumber::new("24BR0000000001").is_ok());
    }

    #[test]
    fn due_number_rejects_too_long() {
        assert!(matches!(
            DueNumber::new("123456789012345"),
            Err(IdError::DueNumberLength(15))
        ));
    }

    #[test]
    fn due_number_rejects_empty() {
        assert!(matches!(DueNumber::new(""), Err(IdError::DueNumberLength(0))));
    }

    #[test]
    fn display_round_trips_the_raw_string() {
        let due = DueNumber::new("24BR0000000001").unwrap();
        assert_eq!(due.to_string(), "24BR0000000001");
        assert_eq!(due.as_str(), "24BR0000000001");
    }
}
