use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::value::NormalizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::from(cents) / Decimal::from(100))
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn amount(self) -> Decimal {
        self.0
    }

    /// Absolute difference, used for tolerance comparisons.
    pub fn abs_diff(self, other: Money) -> Money {
        Money((self.0 - other.0).abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

// ── OCR amount parsing ────────────────────────────────────────────────────────

/// Map a character that OCR commonly confuses with a digit.
fn digit_lookalike(c: char) -> Option<char> {
    match c {
        '0'..='9' => Some(c),
        'O' | 'o' | 'Q' | 'D' => Some('0'),
        'S' | 's' => Some('5'),
        'l' | 'I' | '|' | 'i' => Some('1'),
        'B' => Some('8'),
        'Z' | 'z' => Some('2'),
        _ => None,
    }
}

fn is_currency_mark(c: char) -> bool {
    matches!(c, '$' | '€' | '£' | '¥')
}

/// Parse a currency string as printed on a receipt, tolerating thousands
/// separators, decimal commas and OCR letter/digit confusions.
///
/// Negative amounts are rejected rather than returned.
pub fn parse_ocr_amount(raw: &str) -> Result<Money, NormalizeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::Empty);
    }
    if trimmed.starts_with(['-', '−', '('])
        || trimmed.ends_with(['-', '−', ')'])
    {
        return Err(NormalizeError::Negative(trimmed.to_string()));
    }
    if !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return Err(NormalizeError::NoDigits(trimmed.to_string()));
    }

    let mut cleaned = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_whitespace() || is_currency_mark(c) {
            continue;
        }
        if c == ',' || c == '.' {
            cleaned.push(c);
            continue;
        }
        match digit_lookalike(c) {
            Some(d) => cleaned.push(d),
            None => return Err(NormalizeError::InvalidCharacter(c)),
        }
    }

    let (integer, fraction) = match cleaned.rfind([',', '.']) {
        Some(pos) => {
            let tail = &cleaned[pos + 1..];
            match tail.len() {
                1 | 2 => (&cleaned[..pos], tail),
                // A trailing group of three is a thousands separator.
                3 => (cleaned.as_str(), ""),
                _ => return Err(NormalizeError::MalformedAmount(trimmed.to_string())),
            }
        }
        None => (cleaned.as_str(), ""),
    };

    let integer: String = integer.chars().filter(|c| c.is_ascii_digit()).collect();
    if integer.is_empty() && fraction.is_empty() {
        return Err(NormalizeError::MalformedAmount(trimmed.to_string()));
    }
    let literal = format!(
        "{}.{}",
        if integer.is_empty() { "0" } else { &integer },
        if fraction.is_empty() { "0" } else { fraction }
    );
    let dec = Decimal::from_str(&literal)
        .map_err(|_| NormalizeError::MalformedAmount(trimmed.to_string()))?;
    Ok(Money::from_decimal(dec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_two_decimals() {
        assert_eq!(Money::from_cents(1500).to_string(), "15.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn arithmetic() {
        let a = Money::from_cents(2000);
        let b = Money::from_cents(1500);
        assert_eq!(a - b, Money::from_cents(500));
        assert_eq!(a + b, Money::from_cents(3500));
        assert_eq!(b.abs_diff(a), Money::from_cents(500));
    }

    #[test]
    fn parses_plain_amounts() {
        assert_eq!(parse_ocr_amount("15.00").unwrap(), Money::from_cents(1500));
        assert_eq!(parse_ocr_amount("$ 20.00").unwrap(), Money::from_cents(2000));
        assert_eq!(parse_ocr_amount("0.01").unwrap(), Money::from_cents(1));
    }

    #[test]
    fn parses_thousands_separators() {
        assert_eq!(parse_ocr_amount("1,234.56").unwrap(), Money::from_cents(123456));
        assert_eq!(parse_ocr_amount("1.234,56").unwrap(), Money::from_cents(123456));
        assert_eq!(parse_ocr_amount("1,234").unwrap(), Money::from_cents(123400));
    }

    #[test]
    fn decimal_comma() {
        assert_eq!(parse_ocr_amount("€12,50").unwrap(), Money::from_cents(1250));
    }

    #[test]
    fn recovers_ocr_confusions() {
        assert_eq!(parse_ocr_amount("$1O.5S").unwrap().to_string(), "10.55");
        assert_eq!(parse_ocr_amount("l2.B0").unwrap(), Money::from_cents(1280));
    }

    #[test]
    fn rejects_negative() {
        assert!(matches!(parse_ocr_amount("-5.00"), Err(NormalizeError::Negative(_))));
        assert!(matches!(parse_ocr_amount("(5.00)"), Err(NormalizeError::Negative(_))));
        assert!(matches!(parse_ocr_amount("5.00-"), Err(NormalizeError::Negative(_))));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_ocr_amount("").is_err());
        assert!(matches!(parse_ocr_amount("SOS.OO"), Err(NormalizeError::NoDigits(_))));
        assert!(matches!(parse_ocr_amount("1x.00"), Err(NormalizeError::InvalidCharacter('x'))));
        assert!(parse_ocr_amount("12.3456").is_err());
    }
}
