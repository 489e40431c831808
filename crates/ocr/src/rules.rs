//! Field rules: for each output field, a ranked list of matchers plus the
//! normalizer and validity check its matches go through.
//!
//! Matcher order is data. Index 0 is the most specific pattern (a label
//! right next to the value); later entries are progressively looser.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tillscan_core::{
    normalize_identifier, parse_ocr_amount, parse_receipt_date, DateContext, FieldValue,
    NormalizeError,
};

use crate::config::ConfigError;

pub const RECEIPT_ID: &str = "receipt_id";
pub const DATE: &str = "date";
pub const TOTAL: &str = "total";
pub const CHANGE: &str = "change";
pub const PAYMENT: &str = "payment";

/// State shared by every normalizer and validator during one extraction.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext {
    pub date: DateContext,
}

pub type Normalizer = fn(&str, &FieldContext) -> Result<FieldValue, NormalizeError>;
pub type Validator = fn(&FieldValue, &FieldContext) -> bool;

/// Which normalizer/validator pair a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Identifier,
    Date,
    Amount,
    Text,
}

impl ValueKind {
    pub fn normalizer(self) -> Normalizer {
        match self {
            ValueKind::Identifier => |raw, _| normalize_identifier(raw).map(FieldValue::Text),
            ValueKind::Date => |raw, ctx| parse_receipt_date(raw, &ctx.date).map(FieldValue::Date),
            ValueKind::Amount => |raw, _| parse_ocr_amount(raw).map(FieldValue::Amount),
            ValueKind::Text => |raw, _| {
                let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed.is_empty() {
                    Err(NormalizeError::Empty)
                } else {
                    Ok(FieldValue::Text(collapsed))
                }
            },
        }
    }

    pub fn validator(self) -> Validator {
        match self {
            ValueKind::Identifier => |value, _| {
                value.as_text().is_some_and(|id| {
                    (3..=32).contains(&id.len()) && id.chars().any(|c| c.is_ascii_digit())
                })
            },
            ValueKind::Date => |value, ctx| value.as_date().is_some_and(|d| ctx.date.is_plausible(d)),
            ValueKind::Amount => |value, _| value.as_amount().is_some_and(|m| !m.is_negative()),
            ValueKind::Text => |value, _| value.as_text().is_some_and(|t| !t.is_empty()),
        }
    }
}

/// One tier of a field's cascade.
#[derive(Debug, Clone)]
pub struct Matcher {
    /// Short tag for logs and diagnostics, e.g. `labeled` or `bare-hash`.
    pub label: String,
    /// The value is capture group 1 when present, else the whole match.
    pub pattern: Regex,
    /// Trust in a value found by this tier before OCR and consistency adjustments.
    pub confidence: f32,
}

impl Matcher {
    pub fn new(label: impl Into<String>, pattern: &str, confidence: f32) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.into(),
            pattern: Regex::new(pattern)?,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: String,
    pub kind: ValueKind,
    pub matchers: Vec<Matcher>,
    pub normalizer: Normalizer,
    pub validator: Validator,
    /// Auxiliary rules feed cross-field checks but are left out of the result.
    pub reported: bool,
}

impl FieldRule {
    pub fn new(field: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            field: field.into(),
            kind,
            matchers: vec![],
            normalizer: kind.normalizer(),
            validator: kind.validator(),
            reported: true,
        }
    }

    /// Append the next (less specific) tier.
    pub fn tier(mut self, label: &str, pattern: &str, confidence: f32) -> Result<Self, ConfigError> {
        let matcher = Matcher::new(label, pattern, confidence).map_err(|source| {
            ConfigError::Pattern { field: self.field.clone(), source }
        })?;
        self.matchers.push(matcher);
        Ok(self)
    }

    pub fn auxiliary(mut self) -> Self {
        self.reported = false;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }
}

/// A field rule as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub field: String,
    pub kind: ValueKind,
    /// Most specific first.
    pub patterns: Vec<String>,
    /// Per-pattern confidence; missing entries fall back to a descending default.
    #[serde(default)]
    pub confidences: Vec<f32>,
    #[serde(default = "default_reported")]
    pub reported: bool,
}

fn default_reported() -> bool {
    true
}

/// 0.95 for the first tier, then 0.15 less per tier, never below 0.3.
pub fn default_tier_confidence(rank: usize) -> f32 {
    (0.95 - 0.15 * rank as f32).max(0.3)
}

impl RuleSpec {
    pub fn compile(&self) -> Result<FieldRule, ConfigError> {
        if self.patterns.is_empty() {
            return Err(ConfigError::Rule {
                field: self.field.clone(),
                reason: "no patterns".into(),
            });
        }
        let mut rule = FieldRule::new(&self.field, self.kind);
        rule.reported = self.reported;
        for (rank, pattern) in self.patterns.iter().enumerate() {
            let confidence = self
                .confidences
                .get(rank)
                .copied()
                .unwrap_or_else(|| default_tier_confidence(rank));
            rule = rule.tier(&format!("tier-{rank}"), pattern, confidence)?;
        }
        Ok(rule)
    }
}

/// The ordered collection of rules an engine evaluates.
#[derive(Debug, Clone, Default)]
pub struct FieldRuleSet {
    rules: Vec<FieldRule>,
}

impl FieldRuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a rule, replacing any rule for the same field in place.
    pub fn register(&mut self, rule: FieldRule) {
        match self.rules.iter_mut().find(|r| r.field == rule.field) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Receipt defaults with configured rules registered on top.
    pub fn with_specs(specs: &[RuleSpec]) -> Result<Self, ConfigError> {
        let mut set = Self::receipt_defaults()?;
        for spec in specs {
            set.register(spec.compile()?);
        }
        Ok(set)
    }

    /// receipt_id, date, total and change, plus the auxiliary payment rule.
    pub fn receipt_defaults() -> Result<Self, ConfigError> {
        let mut set = Self::empty();
        set.register(receipt_id_rule()?);
        set.register(date_rule()?);
        set.register(total_rule()?);
        set.register(change_rule()?);
        set.register(payment_rule()?);
        Ok(set)
    }
}

// ── Default patterns ──────────────────────────────────────────────────────────

/// A currency amount whose digits may be OCR look-alikes. Capture group 1.
/// Either separator may group thousands, so "1.234,56" and "1,234.56" both
/// match whole.
const AMOUNT: &str =
    r"((?:[\$€£][ \t]*)?[0-9OoSsIlB][0-9OoSsIlB.,]*[.,][ \t]?[0-9OoSs]{2})\b";

/// A character that cannot continue a number. Placed before [`AMOUNT`] after
/// a lazy prefix so the capture never starts in the middle of an amount.
const AMOUNT_START: &str = r"(?:^|[^0-9A-Za-z.,])";

/// Like [`AMOUNT`] but the currency symbol is mandatory.
const SYMBOL_AMOUNT: &str =
    r"(?:^|[^0-9A-Za-z.,])([\$€£][ \t]*[0-9OoSsIlB][0-9OoSsIlB.,]*[.,][ \t]?[0-9OoSs]{2})\b";

/// Any supported date spelling. Capture group 1.
const DATE_ANY: &str = concat!(
    r"(\d{4}[-/.]\d{1,2}[-/.]\d{1,2}",
    r"|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}",
    r"|[A-Za-z]{3,9}\.?[ \t]+\d{1,2}(?:st|nd|rd|th)?,?[ \t]+\d{4}",
    r"|\d{1,2}(?:st|nd|rd|th)?[ \t\-]+[A-Za-z]{3,9}\.?[ \t\-,]+\d{2,4})\b",
);

const ID: &str = r"([A-Z0-9][A-Z0-9\-/]{2,31})\b";

fn receipt_id_rule() -> Result<FieldRule, ConfigError> {
    FieldRule::new(RECEIPT_ID, ValueKind::Identifier)
        .tier(
            "labeled",
            &format!(
                r"(?i)\b(?:receipt|invoice|order|transaction|trans|ticket|bill)[ \t]*(?:no\.?|number|num|id)?[ \t]*[:#\-]?[ \t]*#?[ \t]*{ID}"
            ),
            0.95,
        )?
        .tier("short-label", &format!(r"(?i)\b(?:no|nr|ref|inv)\.?[ \t]*[:#][ \t]*{ID}"), 0.75)?
        .tier("bare-hash", &format!(r"(?i)#[ \t]*{ID}"), 0.5)
}

fn date_rule() -> Result<FieldRule, ConfigError> {
    FieldRule::new(DATE, ValueKind::Date)
        .tier(
            "labeled",
            &format!(r"(?i)\b(?:date|dated|issued|purchased)\b[ \t]*[:\-]?[ \t]*{DATE_ANY}"),
            0.95,
        )?
        .tier("iso", r"\b(\d{4}[-/.]\d{1,2}[-/.]\d{1,2})\b", 0.85)?
        .tier(
            "month-name",
            r"(?i)\b([A-Za-z]{3,9}\.?[ \t]+\d{1,2}(?:st|nd|rd|th)?,?[ \t]+\d{4}|\d{1,2}(?:st|nd|rd|th)?[ \t\-]+[A-Za-z]{3,9}\.?[ \t\-,]+\d{2,4})\b",
            0.8,
        )?
        .tier("numeric", r"\b(\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4})\b", 0.6)
}

fn total_rule() -> Result<FieldRule, ConfigError> {
    FieldRule::new(TOTAL, ValueKind::Amount)
        .tier(
            "labeled",
            &format!(
                r"(?i)\b(?:grand[ \t]*total|total[ \t]*(?:amount|due)|amount[ \t]*due|balance[ \t]*due|total)[ \t]*[:\-=]?[ \t]*{AMOUNT}"
            ),
            0.95,
        )?
        .tier("same-line", &format!(r"(?i)\btotal\b[^\n]*?{AMOUNT_START}{AMOUNT}"), 0.75)?
        .tier("currency", SYMBOL_AMOUNT, 0.3)
}

fn change_rule() -> Result<FieldRule, ConfigError> {
    FieldRule::new(CHANGE, ValueKind::Amount)
        .tier(
            "labeled",
            &format!(r"(?i)\bchange[ \t]*(?:due)?[ \t]*[:\-=]?[ \t]*{AMOUNT}"),
            0.95,
        )?
        .tier("same-line", &format!(r"(?i)\bchange\b[^\n]*?{AMOUNT_START}{AMOUNT}"), 0.7)
}

fn payment_rule() -> Result<FieldRule, ConfigError> {
    Ok(FieldRule::new(PAYMENT, ValueKind::Amount)
        .tier(
            "labeled",
            &format!(
                r"(?i)\b(?:amount[ \t]*tendered|amount[ \t]*paid|tendered|cash|paid|payment)\b[ \t]*[:\-=]?[ \t]*{AMOUNT}"
            ),
            0.9,
        )?
        .auxiliary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ctx() -> FieldContext {
        FieldContext { date: DateContext::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()) }
    }

    fn first_capture<'a>(rule: &FieldRule, tier: usize, text: &'a str) -> Option<&'a str> {
        let caps = rule.matchers[tier].pattern.captures(text)?;
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
    }

    #[test]
    fn defaults_are_ordered_and_payment_is_auxiliary() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let names: Vec<&str> = set.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(names, vec![RECEIPT_ID, DATE, TOTAL, CHANGE, PAYMENT]);
        assert!(!set.get(PAYMENT).unwrap().reported);
        for rule in set.iter() {
            let confs: Vec<f32> = rule.matchers.iter().map(|m| m.confidence).collect();
            assert!(confs.windows(2).all(|w| w[0] > w[1]), "{} tiers not descending", rule.field);
        }
    }

    #[test]
    fn receipt_id_tiers() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let rule = set.get(RECEIPT_ID).unwrap();
        assert_eq!(first_capture(rule, 0, "Receipt #A1234\n"), Some("A1234"));
        assert_eq!(first_capture(rule, 0, "Invoice No: INV-77"), Some("INV-77"));
        assert_eq!(first_capture(rule, 1, "Ref: 99812"), Some("99812"));
        assert_eq!(first_capture(rule, 2, "Table 4   #5521"), Some("5521"));
    }

    #[test]
    fn label_patterns_stay_on_one_line() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let total = set.get(TOTAL).unwrap();
        assert_eq!(first_capture(total, 0, "Total\n$15.00"), None);
        assert_eq!(first_capture(total, 0, "Total: $15.00"), Some("$15.00"));
        assert_eq!(first_capture(total, 0, "Subtotal 12.00"), None);
        assert_eq!(first_capture(total, 1, "TOTAL (incl. tax) .... 15.00"), Some("15.00"));
    }

    #[test]
    fn dot_grouped_amounts_match_whole() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let total = set.get(TOTAL).unwrap();
        assert_eq!(first_capture(total, 0, "Total: 1.234,56"), Some("1.234,56"));
        assert_eq!(first_capture(total, 0, "Total: $1,234.56"), Some("$1,234.56"));
        assert_eq!(first_capture(total, 1, "Total EUR 1.234,56"), Some("1.234,56"));
        assert_eq!(first_capture(total, 2, "Summe €1.234,56"), Some("€1.234,56"));
        let change = set.get(CHANGE).unwrap();
        assert_eq!(first_capture(change, 1, "Change given 2.500,00"), Some("2.500,00"));
    }

    #[test]
    fn amount_pattern_admits_ocr_confusions() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let total = set.get(TOTAL).unwrap();
        assert_eq!(first_capture(total, 0, "TOTAL $1O.5S"), Some("$1O.5S"));
    }

    #[test]
    fn currency_tier_requires_symbol() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let total = set.get(TOTAL).unwrap();
        assert_eq!(first_capture(total, 2, "Qty 2 at 3.50"), None);
        assert_eq!(first_capture(total, 2, "Coffee $3.50"), Some("$3.50"));
    }

    #[test]
    fn date_tiers() {
        let set = FieldRuleSet::receipt_defaults().unwrap();
        let rule = set.get(DATE).unwrap();
        assert_eq!(first_capture(rule, 0, "Date: 03/12/2024 14:22"), Some("03/12/2024"));
        assert_eq!(first_capture(rule, 0, "Dated March 12, 2024"), Some("March 12, 2024"));
        assert_eq!(first_capture(rule, 1, "order 2024-03-12"), Some("2024-03-12"));
        assert_eq!(first_capture(rule, 3, "12.03.24 POS"), Some("12.03.24"));
    }

    #[test]
    fn kinds_normalize_and_validate() {
        let c = ctx();
        let amount = (ValueKind::Amount.normalizer())("$1,234.50", &c).unwrap();
        assert_eq!(amount.to_string(), "1234.50");
        assert!((ValueKind::Amount.validator())(&amount, &c));

        let date = (ValueKind::Date.normalizer())("2024-03-12", &c).unwrap();
        assert!((ValueKind::Date.validator())(&date, &c));
        let future = (ValueKind::Date.normalizer())("2031-01-01", &c).unwrap();
        assert!(!(ValueKind::Date.validator())(&future, &c));

        let id = (ValueKind::Identifier.normalizer())("Date", &c).unwrap();
        assert!(!(ValueKind::Identifier.validator())(&id, &c));

        let text = (ValueKind::Text.normalizer())("  ACME   Store ", &c).unwrap();
        assert_eq!(text, FieldValue::Text("ACME Store".into()));
    }

    #[test]
    fn register_replaces_in_place() {
        let mut set = FieldRuleSet::receipt_defaults().unwrap();
        let replacement = FieldRule::new(DATE, ValueKind::Date)
            .tier("only", r"\b(\d{4}-\d{2}-\d{2})\b", 0.9)
            .unwrap();
        set.register(replacement);
        assert_eq!(set.len(), 5);
        assert_eq!(set.iter().nth(1).unwrap().matchers.len(), 1);

        set.register(FieldRule::new("vendor", ValueKind::Text));
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn rule_spec_compiles_with_default_confidences() {
        let spec = RuleSpec {
            field: "vat_number".into(),
            kind: ValueKind::Identifier,
            patterns: vec![r"VAT:\s*(\w+)".into(), r"(\w+)".into()],
            confidences: vec![0.9],
            reported: true,
        };
        let rule = spec.compile().unwrap();
        assert_eq!(rule.matchers[0].confidence, 0.9);
        assert_eq!(rule.matchers[1].confidence, default_tier_confidence(1));
    }

    #[test]
    fn rule_spec_errors() {
        let empty = RuleSpec {
            field: "x".into(),
            kind: ValueKind::Text,
            patterns: vec![],
            confidences: vec![],
            reported: true,
        };
        assert!(matches!(empty.compile(), Err(ConfigError::Rule { .. })));

        let bad = RuleSpec { patterns: vec!["(unclosed".into()], ..empty };
        assert!(matches!(bad.compile(), Err(ConfigError::Pattern { .. })));
    }
}
