use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::preprocess::encode_as_png;
use crate::types::{NormalizedImage, RecognizedText, Token};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
    #[error("recognition task aborted: {0}")]
    Aborted(String),
}

/// What a recognizer returns for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub tokens: Vec<Token>,
}

impl Recognition {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self { text: text.into(), tokens: vec![] }
    }
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG image bytes and return the recognized text.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image_png: &[u8]) -> Result<Recognition, OcrError>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Arc<T> {
    fn recognize(&self, image_png: &[u8]) -> Result<Recognition, OcrError> {
        (**self).recognize(image_png)
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// Runs the recognizer for one normalized page under a time limit.
///
/// Any failure becomes an empty page so the rest of the document still counts.
/// A timed-out call is abandoned on the blocking pool, not cancelled.
pub struct TextExtractor<R> {
    recognizer: Arc<R>,
    timeout: Duration,
}

impl<R> Clone for TextExtractor<R> {
    fn clone(&self) -> Self {
        Self { recognizer: Arc::clone(&self.recognizer), timeout: self.timeout }
    }
}

impl<R: TextRecognizer + 'static> TextExtractor<R> {
    pub fn new(recognizer: R, timeout: Duration) -> Self {
        Self { recognizer: Arc::new(recognizer), timeout }
    }

    pub async fn extract(&self, image: &NormalizedImage) -> RecognizedText {
        let page = image.page_index;
        match self.try_extract(image).await {
            Ok(rec) => RecognizedText::new(page, rec.text).with_tokens(rec.tokens),
            Err(e) => {
                warn!(page, error = %e, "page recognition failed, continuing without it");
                RecognizedText::failed(page, e.to_string())
            }
        }
    }

    async fn try_extract(&self, image: &NormalizedImage) -> Result<Recognition, OcrError> {
        let png = encode_as_png(&image.image).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
        let recognizer = Arc::clone(&self.recognizer);
        let task = tokio::task::spawn_blocking(move || recognizer.recognize(&png));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(OcrError::Aborted(join.to_string())),
            Err(_) => Err(OcrError::Timeout(self.timeout)),
        }
    }
}

// ── Mock backends (always available, used for tests) ─────────────────────────

/// Returns a pre-set string, useful for unit testing the extraction pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
    pub tokens: Vec<Token>,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), tokens: vec![] }
    }

    /// Emit one token per whitespace-separated word, all at `confidence`.
    pub fn with_uniform_confidence(mut self, confidence: f32) -> Self {
        self.tokens = self
            .text
            .split_whitespace()
            .map(|w| Token::new(w, None, confidence))
            .collect();
        self
    }
}

impl TextRecognizer for MockRecognizer {
    fn recognize(&self, _image_png: &[u8]) -> Result<Recognition, OcrError> {
        Ok(Recognition { text: self.text.clone(), tokens: self.tokens.clone() })
    }
}

/// Replays one scripted response per call, in call order.
///
/// Pages are recognized concurrently, so tests that need a specific page to
/// get a specific text should key on something stable; this is for
/// single-page or order-insensitive scenarios.
pub struct ScriptedRecognizer {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<Recognition, String>>>,
    delay: Option<Duration>,
}

impl ScriptedRecognizer {
    pub fn new(responses: Vec<Result<Recognition, String>>) -> Self {
        Self { responses: std::sync::Mutex::new(responses.into()), delay: None }
    }

    /// Sleep before every answer, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, _image_png: &[u8]) -> Result<Recognition, OcrError> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let next = self
            .responses
            .lock()
            .map_err(|e| OcrError::Engine(e.to_string()))?
            .pop_front();
        match next {
            Some(Ok(rec)) => Ok(rec),
            Some(Err(msg)) => Err(OcrError::Engine(msg)),
            None => Err(OcrError::Engine("no scripted response left".into())),
        }
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrError, Recognition, TextRecognizer};
    use crate::types::{BoundingBox, Token};
    use leptess::LepTess;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn recognize(&self, image_png: &[u8]) -> Result<Recognition, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let tokens = lt
                .get_tsv_text(0)
                .map(|tsv| parse_tsv_tokens(&tsv))
                .unwrap_or_default();
            Ok(Recognition { text, tokens })
        }
    }

    /// Word rows (level 5) of Tesseract's TSV output:
    /// `level page block par line word left top width height conf text`.
    pub(crate) fn parse_tsv_tokens(tsv: &str) -> Vec<Token> {
        tsv.lines()
            .filter_map(|line| {
                let cols: Vec<&str> = line.split('\t').collect();
                if cols.len() < 12 || cols[0] != "5" {
                    return None;
                }
                let word = cols[11].trim();
                let conf: f32 = cols[10].parse().ok()?;
                if word.is_empty() || conf < 0.0 {
                    return None;
                }
                let bbox = BoundingBox {
                    x: cols[6].parse().ok()?,
                    y: cols[7].parse().ok()?,
                    width: cols[8].parse().ok()?,
                    height: cols[9].parse().ok()?,
                };
                Some(Token::new(word, Some(bbox), conf / 100.0))
            })
            .collect()
    }

}
