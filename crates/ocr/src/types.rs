use std::collections::BTreeMap;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tillscan_core::{FieldValue, Money};

use crate::hash;

/// Declared media type of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Any raster format the `image` crate can decode; the subtype is kept for logs.
    Image(String),
    Pdf,
}

impl MediaType {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        if essence == "application/pdf" {
            return Some(MediaType::Pdf);
        }
        essence
            .strip_prefix("image/")
            .filter(|sub| !sub.is_empty())
            .map(|sub| MediaType::Image(sub.to_string()))
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(MediaType::Pdf),
            "jpg" | "jpeg" => Some(MediaType::Image("jpeg".into())),
            e @ ("png" | "webp" | "gif" | "bmp" | "tif" | "tiff") => {
                Some(MediaType::Image(e.to_string()))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Image(sub) => write!(f, "image/{sub}"),
            MediaType::Pdf => write!(f, "application/pdf"),
        }
    }
}

/// An uploaded payload as received. Never modified by the pipeline.
#[derive(Debug, Clone)]
pub struct RawDocument {
    bytes: Vec<u8>,
    media_type: MediaType,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: MediaType) -> Self {
        Self { bytes: bytes.into(), media_type }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 hex of the payload, used to correlate log lines for one document.
    pub fn digest(&self) -> String {
        hash::to_hex(&hash::sha256_bytes(&self.bytes))
    }
}

/// One decoded page, in document order.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub index: usize,
    pub image: DynamicImage,
}

impl PageImage {
    pub fn new(index: usize, image: DynamicImage) -> Self {
        Self { index, image }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resize,
    Grayscale,
    Denoise,
    Binarize,
    Deskew,
    Crop,
}

/// A page after the normalization stages. Replaces the page image downstream.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub page_index: usize,
    pub image: GrayImage,
    /// Stages that changed (or confirmed) the image, in order.
    pub applied: Vec<Stage>,
    /// Stages that were disabled, unnecessary or failed, with the reason.
    pub skipped: Vec<(Stage, String)>,
    /// Rotation applied by the deskew stage, in degrees.
    pub skew_degrees: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A recognized word with position and engine confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub bbox: Option<BoundingBox>,
    pub confidence: f32,
}

impl Token {
    pub fn new(text: impl Into<String>, bbox: Option<BoundingBox>, confidence: f32) -> Self {
        Self { text: text.into(), bbox, confidence: confidence.clamp(0.0, 1.0) }
    }
}

/// Recognizer output for one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognizedText {
    pub page_index: usize,
    pub text: String,
    pub tokens: Vec<Token>,
    /// Set when recognition failed and `text` is empty as a result.
    pub failure: Option<String>,
}

impl RecognizedText {
    pub fn new(page_index: usize, text: impl Into<String>) -> Self {
        Self { page_index, text: text.into(), tokens: vec![], failure: None }
    }

    pub fn with_tokens(mut self, tokens: Vec<Token>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn failed(page_index: usize, reason: impl Into<String>) -> Self {
        Self { page_index, failure: Some(reason.into()), ..Default::default() }
    }
}

/// One match of one matcher tier, before or after acceptance.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub field: String,
    /// The matched substring exactly as recognized.
    pub raw: String,
    /// `None` when normalization or validation rejected the raw text.
    pub value: Option<FieldValue>,
    pub page_index: usize,
    /// Byte offset of `raw` within its page's text.
    pub offset: usize,
    /// Matcher tier; 0 is the most specific.
    pub rank: usize,
    pub confidence: f32,
}

/// Final state of one reported field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldOutcome {
    pub value: Option<String>,
    pub confidence: f32,
    pub found: bool,
    #[serde(skip)]
    pub candidate: Option<FieldCandidate>,
}

impl FieldOutcome {
    pub fn found(candidate: FieldCandidate) -> Self {
        Self {
            value: candidate.value.as_ref().map(ToString::to_string),
            confidence: candidate.confidence.clamp(0.0, 1.0),
            found: true,
            candidate: Some(candidate),
        }
    }

    pub fn not_found() -> Self {
        Self { value: None, confidence: 0.0, found: false, candidate: None }
    }

    pub fn typed_value(&self) -> Option<&FieldValue> {
        self.candidate.as_ref()?.value.as_ref()
    }
}

/// Outcome of the payment/total/change arithmetic check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Consistency {
    /// Not all of payment, total and change were found.
    NotChecked,
    Consistent,
    Mismatch { expected_change: Money, found_change: Money },
}

/// The structured answer for one document.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub fields: BTreeMap<String, FieldOutcome>,
    pub overall_confidence: f32,
    pub missing_fields: Vec<String>,
    pub consistency: Consistency,
    /// Pages whose recognition failed and contributed no text.
    pub failed_pages: Vec<usize>,
    /// Recognized text in page order, pages separated by a form feed line.
    pub raw_text: String,
}

impl ExtractionResult {
    pub fn field(&self, name: &str) -> Option<&FieldOutcome> {
        self.fields.get(name)
    }

    pub fn value_of(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)?.typed_value()
    }

    /// Whether a human should look at this before it is trusted.
    pub fn needs_review(&self) -> bool {
        self.overall_confidence < 0.7
            || !self.missing_fields.is_empty()
            || matches!(self.consistency, Consistency::Mismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_from_mime() {
        assert_eq!(MediaType::from_mime("application/pdf"), Some(MediaType::Pdf));
        assert_eq!(
            MediaType::from_mime("image/png; charset=binary"),
            Some(MediaType::Image("png".into()))
        );
        assert_eq!(MediaType::from_mime("image/"), None);
        assert_eq!(MediaType::from_mime("text/plain"), None);
    }

    #[test]
    fn media_type_from_extension() {
        assert_eq!(MediaType::from_extension("PDF"), Some(MediaType::Pdf));
        assert_eq!(MediaType::from_extension("jpg"), Some(MediaType::Image("jpeg".into())));
        assert_eq!(MediaType::from_extension("docx"), None);
    }

    #[test]
    fn token_clamps_confidence() {
        assert_eq!(Token::new("x", None, 1.5).confidence, 1.0);
        assert_eq!(Token::new("x", None, -0.1).confidence, 0.0);
    }

    #[test]
    fn digest_is_stable() {
        let a = RawDocument::new(b"abc".to_vec(), MediaType::Pdf);
        let b = RawDocument::new(b"abc".to_vec(), MediaType::Image("png".into()));
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn outcome_serializes_without_candidate() {
        let outcome = FieldOutcome::not_found();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"value": null, "confidence": 0.0, "found": false}));
    }

    #[test]
    fn needs_review_threshold() {
        let low = ExtractionResult {
            fields: BTreeMap::new(),
            overall_confidence: 0.5,
            missing_fields: vec![],
            consistency: Consistency::NotChecked,
            failed_pages: vec![],
            raw_text: String::new(),
        };
        assert!(low.needs_review());

        let high = ExtractionResult { overall_confidence: 0.9, ..low.clone() };
        assert!(!high.needs_review());

        let missing = ExtractionResult { missing_fields: vec!["date".into()], ..high };
        assert!(missing.needs_review());
    }
}
