use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, TimeDelta};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::value::NormalizeError;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_iso, r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})$");
re!(re_numeric, r"^(\d{1,2})[-/.](\d{1,2})[-/.](\d{4}|\d{2})$");
re!(re_month_first,
    r"^([A-Za-z]{3,9})\.?[ \t]+(\d{1,2})(?:st|nd|rd|th)?,?[ \t]+(\d{4})$");
re!(re_day_first,
    r"^(\d{1,2})(?:st|nd|rd|th)?[ \t\-]+([A-Za-z]{3,9})\.?[ \t\-,]+(\d{4}|\d{2})$");

/// How to read an all-numeric date whose first two parts could both be months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    MonthFirst,
    DayFirst,
    /// Drop readings past the plausibility horizon, then take the earliest.
    #[default]
    EarliestPlausible,
}

/// Inputs that make date normalization and plausibility deterministic.
#[derive(Debug, Clone, Copy)]
pub struct DateContext {
    /// "Today" from the caller's point of view.
    pub reference: NaiveDate,
    /// How far past `reference` a receipt date may lie.
    pub max_future_days: i64,
    pub order: DateOrder,
}

impl DateContext {
    pub fn new(reference: NaiveDate) -> Self {
        Self { reference, max_future_days: 1, order: DateOrder::default() }
    }

    /// Earliest and latest dates a receipt may carry.
    pub fn is_plausible(&self, date: NaiveDate) -> bool {
        date.year() >= 1970 && self.horizon().map_or(self.max_future_days > 0, |h| date <= h)
    }

    /// Latest plausible date, or `None` when `max_future_days` runs past the
    /// calendar in either direction.
    fn horizon(&self) -> Option<NaiveDate> {
        TimeDelta::try_days(self.max_future_days)
            .and_then(|delta| self.reference.checked_add_signed(delta))
    }
}

/// Normalize any supported date spelling into a calendar date.
///
/// Supported: `2024-03-12`, `2024/03/12`, `12/03/2024`, `03-12-24`,
/// `12.03.2024`, `March 12, 2024`, `Mar 12 2024`, `12 Mar 2024`, `12-Mar-24`.
pub fn parse_receipt_date(raw: &str, ctx: &DateContext) -> Result<NaiveDate, NormalizeError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(NormalizeError::Empty);
    }

    if let Some(c) = re_iso().captures(s) {
        let y: i32 = c[1].parse().map_err(|_| invalid(s))?;
        let m: u32 = c[2].parse().map_err(|_| invalid(s))?;
        let d: u32 = c[3].parse().map_err(|_| invalid(s))?;
        return NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| invalid(s));
    }

    if let Some(c) = re_numeric().captures(s) {
        let a: u32 = c[1].parse().map_err(|_| invalid(s))?;
        let b: u32 = c[2].parse().map_err(|_| invalid(s))?;
        let y = expand_year(c[3].parse().map_err(|_| invalid(s))?);
        return resolve_numeric(a, b, y, ctx).ok_or_else(|| invalid(s));
    }

    if let Some(c) = re_month_first().captures(s) {
        let m = month_from_name(&c[1]).ok_or_else(|| unrecognized(s))?;
        let d: u32 = c[2].parse().map_err(|_| invalid(s))?;
        let y: i32 = c[3].parse().map_err(|_| invalid(s))?;
        return NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| invalid(s));
    }

    if let Some(c) = re_day_first().captures(s) {
        let d: u32 = c[1].parse().map_err(|_| invalid(s))?;
        let m = month_from_name(&c[2]).ok_or_else(|| unrecognized(s))?;
        let y = expand_year(c[3].parse().map_err(|_| invalid(s))?);
        return NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| invalid(s));
    }

    Err(unrecognized(s))
}

fn resolve_numeric(a: u32, b: u32, year: i32, ctx: &DateContext) -> Option<NaiveDate> {
    let month_first = NaiveDate::from_ymd_opt(year, a, b);
    let day_first = NaiveDate::from_ymd_opt(year, b, a);

    match (month_first, day_first) {
        (Some(mf), Some(df)) if mf != df => Some(match ctx.order {
            DateOrder::MonthFirst => mf,
            DateOrder::DayFirst => df,
            DateOrder::EarliestPlausible => {
                match (ctx.is_plausible(mf), ctx.is_plausible(df)) {
                    (true, false) => mf,
                    (false, true) => df,
                    _ => mf.min(df),
                }
            }
        }),
        (Some(mf), _) => Some(mf),
        (None, df) => df,
    }
}

fn expand_year(y: i32) -> i32 {
    match y {
        0..=69 => 2000 + y,
        70..=99 => 1900 + y,
        _ => y,
    }
}

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];

/// Full month names and any prefix of at least three letters ("Sept", "Mar").
fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(lower.as_str()))
        .map(|i| i as u32 + 1)
}

fn invalid(s: &str) -> NormalizeError {
    NormalizeError::InvalidDate(s.to_string())
}

fn unrecognized(s: &str) -> NormalizeError {
    NormalizeError::UnrecognizedDate(s.to_string())
}
