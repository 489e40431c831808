use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::money::Money;

/// Why a matched substring could not be turned into a typed value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty value")]
    Empty,
    #[error("no digits in '{0}'")]
    NoDigits(String),
    #[error("unexpected character '{0}' in amount")]
    InvalidCharacter(char),
    #[error("malformed amount '{0}'")]
    MalformedAmount(String),
    #[error("negative amount '{0}'")]
    Negative(String),
    #[error("unrecognized date format '{0}'")]
    UnrecognizedDate(String),
    #[error("not a calendar date '{0}'")]
    InvalidDate(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

/// A typed field value after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Amount(Money),
}

impl FieldValue {
    pub fn as_amount(&self) -> Option<Money> {
        match self {
            FieldValue::Amount(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Canonical string form: ISO dates, two-decimal amounts, text as-is.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Amount(m) => write!(f, "{m}"),
        }
    }
}

/// Clean up a document identifier such as a receipt or invoice number.
pub fn normalize_identifier(raw: &str) -> Result<String, NormalizeError> {
    let cleaned = raw
        .trim()
        .trim_start_matches('#')
        .trim_end_matches(['.', ',', ':', ';'])
        .trim();
    if cleaned.is_empty() {
        return Err(NormalizeError::Empty);
    }
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/')
    {
        return Err(NormalizeError::InvalidIdentifier(cleaned.to_string()));
    }
    Ok(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical() {
        let d = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(d.to_string(), "2024-03-12");
        assert_eq!(FieldValue::Amount(Money::from_cents(500)).to_string(), "5.00");
        assert_eq!(FieldValue::Text("A1234".into()).to_string(), "A1234");
    }

    #[test]
    fn accessors() {
        let v = FieldValue::Amount(Money::from_cents(1));
        assert_eq!(v.as_amount(), Some(Money::from_cents(1)));
        assert!(v.as_date().is_none());
        assert!(v.as_text().is_none());
    }

    #[test]
    fn identifier_cleanup() {
        assert_eq!(normalize_identifier(" #A1234. ").unwrap(), "A1234");
        assert_eq!(normalize_identifier("INV-2024/07").unwrap(), "INV-2024/07");
        assert!(normalize_identifier("#").is_err());
        assert!(matches!(
            normalize_identifier("AB CD"),
            Err(NormalizeError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn serializes_tagged() {
        let v = FieldValue::Text("x".into());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"kind":"text","value":"x"}"#);
    }
}
