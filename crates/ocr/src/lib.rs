//! Receipt OCR field extraction: page images in, structured receipt fields out.
//!
//! ```text
//! RawDocument ─ decode ─► PageImage ─ ImageNormalizer ─► NormalizedImage
//!     ─ TextExtractor ─► RecognizedText ─ FieldEngine ─► ExtractionResult
//! ```

pub mod config;
pub mod extract;
pub mod hash;
pub mod pipeline;
pub mod preprocess;
pub mod raster;
pub mod recognizer;
pub mod rules;
pub mod transforms;
pub mod types;

pub use config::{ConfigError, ExtractionConfig, InputConfig, OcrConfig, PipelineConfig};
pub use extract::{EngineOptions, FieldEngine};
pub use hash::{sha256_bytes, to_hex};
pub use pipeline::{DecodeError, ReceiptPipeline};
pub use preprocess::{ImageNormalizer, NormalizerOptions};
pub use raster::{PdfRasterizer, RasterError, StaticRasterizer};
pub use recognizer::{MockRecognizer, OcrError, Recognition, ScriptedRecognizer, TextExtractor, TextRecognizer};
pub use rules::{FieldRule, FieldRuleSet, Matcher, RuleSpec, ValueKind};
pub use transforms::{ImageTransforms, PixelTransforms, TransformError};
pub use types::{
    Consistency, ExtractionResult, FieldCandidate, FieldOutcome, MediaType, NormalizedImage, PageImage,
    RawDocument, RecognizedText, Stage, Token,
};

#[cfg(feature = "pdfium")]
pub use raster::pdfium_backend::PdfiumRasterizer;
#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
