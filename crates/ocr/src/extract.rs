use std::collections::BTreeMap;
use std::ops::Range;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tillscan_core::{DateContext, DateOrder, Money};
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::rules::{FieldContext, FieldRule, FieldRuleSet, CHANGE, PAYMENT, TOTAL};
use crate::types::{Consistency, ExtractionResult, FieldCandidate, FieldOutcome, RecognizedText, Token};

/// Inserted between pages so single-line patterns never join two pages.
const PAGE_BREAK: &str = "\n\u{000C}\n";

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub consistency_tolerance: Decimal,
    pub mismatch_penalty: f32,
    pub max_future_days: i64,
    pub date_order: DateOrder,
    /// Fixed "today" for date plausibility; the current UTC date when unset.
    pub reference_date: Option<NaiveDate>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

impl From<&ExtractionConfig> for EngineOptions {
    fn from(cfg: &ExtractionConfig) -> Self {
        Self {
            consistency_tolerance: cfg.consistency_tolerance,
            mismatch_penalty: cfg.mismatch_penalty.clamp(0.0, 1.0),
            max_future_days: cfg.max_future_days,
            date_order: cfg.date_order,
            reference_date: None,
        }
    }
}

impl EngineOptions {
    fn field_context(&self) -> FieldContext {
        let reference = self
            .reference_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        FieldContext {
            date: DateContext {
                reference,
                max_future_days: self.max_future_days,
                order: self.date_order,
            },
        }
    }
}

// ── Document text ─────────────────────────────────────────────────────────────

struct PageSpan<'a> {
    page: &'a RecognizedText,
    start: usize,
    end: usize,
    /// Page-local byte range and confidence of each token found in the text.
    tokens: Vec<(Range<usize>, f32)>,
}

impl PageSpan<'_> {
    /// Mean recognizer confidence of the tokens overlapping `range`
    /// (page-local). 1.0 when no token covers it.
    fn ocr_factor(&self, range: Range<usize>) -> f32 {
        let (sum, count) = self
            .tokens
            .iter()
            .filter(|(r, _)| r.start < range.end && range.start < r.end)
            .fold((0.0f32, 0usize), |(s, n), (_, c)| (s + c, n + 1));
        if count == 0 {
            1.0
        } else {
            sum / count as f32
        }
    }
}

/// Places tokens on the page text by searching forward from the previous one.
/// Tokens that cannot be found are skipped.
fn token_ranges(text: &str, tokens: &[Token]) -> Vec<(Range<usize>, f32)> {
    let mut cursor = 0;
    let mut ranges = Vec::with_capacity(tokens.len());
    for token in tokens.iter().filter(|t| !t.text.is_empty()) {
        if let Some(at) = text[cursor..].find(token.text.as_str()) {
            let start = cursor + at;
            cursor = start + token.text.len();
            ranges.push((start..cursor, token.confidence));
        }
    }
    ranges
}

/// All page texts joined in page order, with a map back to page offsets.
struct DocumentText<'a> {
    text: String,
    spans: Vec<PageSpan<'a>>,
}

impl<'a> DocumentText<'a> {
    fn assemble(pages: &'a [RecognizedText]) -> Self {
        let mut ordered: Vec<&RecognizedText> = pages.iter().collect();
        ordered.sort_by_key(|p| p.page_index);

        let mut text = String::new();
        let mut spans = Vec::with_capacity(ordered.len());
        for (i, page) in ordered.into_iter().enumerate() {
            if i > 0 {
                text.push_str(PAGE_BREAK);
            }
            let start = text.len();
            text.push_str(&page.text);
            spans.push(PageSpan {
                page,
                start,
                end: text.len(),
                tokens: token_ranges(&page.text, &page.tokens),
            });
        }
        Self { text, spans }
    }

    /// The page holding the captured `value`, or `None` when the whole match
    /// reaches into another page's text. A match may start inside the break
    /// before its page, as a boundary character of a pattern.
    fn locate(&self, whole: Range<usize>, value: Range<usize>) -> Option<&PageSpan<'a>> {
        let idx = self.spans.partition_point(|s| s.start <= value.start).checked_sub(1)?;
        let span = &self.spans[idx];
        let after_previous = idx
            .checked_sub(1)
            .map_or(true, |prev| self.spans[prev].end <= whole.start);
        (after_previous && whole.end <= span.end).then_some(span)
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Turns recognized page text into a structured [`ExtractionResult`].
#[derive(Debug, Clone)]
pub struct FieldEngine {
    rules: FieldRuleSet,
    options: EngineOptions,
}

impl FieldEngine {
    pub fn new(rules: FieldRuleSet, options: EngineOptions) -> Self {
        Self { rules, options }
    }

    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.options.reference_date = Some(date);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn rules(&self) -> &FieldRuleSet {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut FieldRuleSet {
        &mut self.rules
    }

    pub fn extract_fields(&self, pages: &[RecognizedText]) -> ExtractionResult {
        let ctx = self.options.field_context();
        let doc = DocumentText::assemble(pages);

        let mut chosen: Vec<(&FieldRule, Option<FieldCandidate>)> = self
            .rules
            .iter()
            .map(|rule| (rule, select(rule, &doc, &ctx)))
            .collect();

        let consistency = self.check_consistency(&mut chosen);

        let mut fields = BTreeMap::new();
        let mut missing_fields = Vec::new();
        let mut overall: Option<f32> = None;
        for (rule, candidate) in chosen.into_iter().filter(|(r, _)| r.reported) {
            let outcome = match candidate {
                Some(c) => FieldOutcome::found(c),
                None => {
                    missing_fields.push(rule.field.clone());
                    FieldOutcome::not_found()
                }
            };
            if outcome.found {
                overall = Some(overall.map_or(outcome.confidence, |o| o.min(outcome.confidence)));
            }
            fields.insert(rule.field.clone(), outcome);
        }

        let mut failed_pages: Vec<usize> = pages
            .iter()
            .filter(|p| p.failure.is_some())
            .map(|p| p.page_index)
            .collect();
        failed_pages.sort_unstable();

        ExtractionResult {
            fields,
            overall_confidence: overall.unwrap_or(0.0),
            missing_fields,
            consistency,
            failed_pages,
            raw_text: doc.text,
        }
    }

    /// `payment - total == change`, within tolerance. Penalizes rather than drops.
    fn check_consistency(&self, chosen: &mut [(&FieldRule, Option<FieldCandidate>)]) -> Consistency {
        let (Some(total), Some(change), Some(payment)) = (
            chosen_amount(chosen, TOTAL),
            chosen_amount(chosen, CHANGE),
            chosen_amount(chosen, PAYMENT),
        )
        else {
            return Consistency::NotChecked;
        };

        let expected_change = payment - total;
        if expected_change.abs_diff(change).amount() <= self.options.consistency_tolerance {
            return Consistency::Consistent;
        }

        warn!(%payment, %total, %change, %expected_change, "payment, total and change disagree");
        for (rule, candidate) in chosen.iter_mut() {
            if rule.field == TOTAL || rule.field == CHANGE {
                if let Some(c) = candidate {
                    c.confidence *= self.options.mismatch_penalty;
                }
            }
        }
        Consistency::Mismatch { expected_change, found_change: change }
    }
}

fn chosen_amount(chosen: &[(&FieldRule, Option<FieldCandidate>)], field: &str) -> Option<Money> {
    chosen
        .iter()
        .find(|(r, _)| r.field == field)?
        .1
        .as_ref()?
        .value
        .as_ref()?
        .as_amount()
}

/// Most specific tier with a valid candidate wins; inside it, earliest page
/// then earliest offset.
fn select(rule: &FieldRule, doc: &DocumentText<'_>, ctx: &FieldContext) -> Option<FieldCandidate> {
    for (rank, matcher) in rule.matchers.iter().enumerate() {
        let mut rejected = 0usize;
        let mut best: Option<FieldCandidate> = None;
        for caps in matcher.pattern.captures_iter(&doc.text) {
            let Some(whole) = caps.get(0) else { continue };
            let m = caps.get(1).unwrap_or(whole);
            let Some(span) = doc.locate(whole.range(), m.range()) else {
                continue;
            };
            let raw = m.as_str().trim();
            if raw.is_empty() {
                continue;
            }

            let value = (rule.normalizer)(raw, ctx)
                .ok()
                .filter(|v| (rule.validator)(v, ctx));
            if value.is_none() {
                rejected += 1;
                continue;
            }

            let candidate = FieldCandidate {
                field: rule.field.clone(),
                raw: raw.to_string(),
                value,
                page_index: span.page.page_index,
                offset: m.start() - span.start,
                rank,
                confidence: matcher.confidence
                    * span.ocr_factor(m.start() - span.start..m.end() - span.start),
            };
            let earlier = best
                .as_ref()
                .map_or(true, |b| (candidate.page_index, candidate.offset) < (b.page_index, b.offset));
            if earlier {
                best = Some(candidate);
            }
        }

        if let Some(c) = best {
            debug!(
                field = %rule.field,
                tier = %matcher.label,
                rank,
                page = c.page_index,
                raw = %c.raw,
                confidence = c.confidence,
                "field selected"
            );
            return Some(c);
        }
        if rejected > 0 {
            debug!(field = %rule.field, tier = %matcher.label, rejected, "tier had only invalid matches");
        }
    }
    debug!(field = %rule.field, "field not found");
    None
}
