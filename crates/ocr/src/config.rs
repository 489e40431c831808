use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tillscan_core::DateOrder;

use crate::preprocess::NormalizerOptions;
use crate::rules::RuleSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid pattern for field '{field}': {source}")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid rule '{field}': {reason}")]
    Rule { field: String, reason: String },
}

/// Everything a pipeline run can be tuned with. Every field has a default,
/// so an empty TOML document is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub ocr: OcrConfig,
    pub normalizer: NormalizerOptions,
    pub extraction: ExtractionConfig,
    /// Extra or replacement field rules, applied on top of the receipt defaults.
    pub rules: Vec<RuleSpec>,
}

impl PipelineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub max_document_bytes: usize,
    /// PDFs longer than this are truncated.
    pub max_pages: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { max_document_bytes: 20 * 1024 * 1024, max_pages: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language code(s), e.g. `eng` or `eng+deu`.
    pub language: String,
    pub tessdata_path: Option<String>,
    pub page_timeout_ms: u64,
}

impl OcrConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { language: "eng".into(), tessdata_path: None, page_timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Allowed gap in `payment - total == change`.
    pub consistency_tolerance: Decimal,
    /// Confidence multiplier for total and change when the check fails.
    pub mismatch_penalty: f32,
    pub max_future_days: i64,
    pub date_order: DateOrder,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            consistency_tolerance: Decimal::new(1, 2),
            mismatch_penalty: 0.5,
            max_future_days: 1,
            date_order: DateOrder::EarliestPlausible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ValueKind;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = PipelineConfig::from_toml("").unwrap();
        assert_eq!(cfg.ocr.language, "eng");
        assert_eq!(cfg.ocr.page_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.input.max_document_bytes, 20 * 1024 * 1024);
        assert_eq!(cfg.extraction.consistency_tolerance, Decimal::new(1, 2));
        assert_eq!(cfg.normalizer, NormalizerOptions::default());
        assert!(cfg.rules.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = PipelineConfig::from_toml(
            r#"
            [input]
            max_document_bytes = 1024

            [ocr]
            language = "deu"
            page_timeout_ms = 500

            [normalizer]
            deskew = false
            binarize_block_radius = 8

            [extraction]
            date_order = "day_first"
            mismatch_penalty = 0.25

            [[rules]]
            field = "vat_number"
            kind = "identifier"
            patterns = ['(?i)\bvat\s*no\.?\s*:?\s*([A-Z0-9]+)']
            reported = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.input.max_document_bytes, 1024);
        assert_eq!(cfg.input.max_pages, 20);
        assert_eq!(cfg.ocr.language, "deu");
        assert_eq!(cfg.ocr.page_timeout(), Duration::from_millis(500));
        assert!(!cfg.normalizer.deskew);
        assert_eq!(cfg.normalizer.binarize_block_radius, 8);
        assert!(cfg.normalizer.crop);
        assert_eq!(cfg.extraction.date_order, DateOrder::DayFirst);
        assert_eq!(cfg.extraction.mismatch_penalty, 0.25);
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.rules[0].kind, ValueKind::Identifier);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            PipelineConfig::from_toml("[ocr\nlanguage = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tillscan.toml");
        std::fs::write(&path, "[ocr]\nlanguage = \"fra\"\n").unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().ocr.language, "fra");
        assert!(matches!(
            PipelineConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
