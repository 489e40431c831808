use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::task::{self, JoinSet};
use tracing::{info, warn};

use crate::config::{ConfigError, InputConfig, PipelineConfig};
use crate::extract::{EngineOptions, FieldEngine};
use crate::hash;
use crate::preprocess::{decode_image, ImageNormalizer};
use crate::raster::{PdfRasterizer, RasterError};
use crate::recognizer::{TextExtractor, TextRecognizer};
use crate::rules::FieldRuleSet;
use crate::types::{ExtractionResult, MediaType, PageImage, RawDocument, RecognizedText};

/// The only failures that reach a caller: the document could not be turned into pages.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("document is empty")]
    Empty,
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("PDF rasterization failed: {0}")]
    Pdf(#[from] RasterError),
    #[error("PDF input needs a rasterizer, none is configured")]
    NoRasterizer,
    #[error("PDF has no pages")]
    NoPages,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode task aborted: {0}")]
    Aborted(String),
}

/// Raw bytes to page images. Cheap to clone into a blocking task.
#[derive(Clone)]
struct Decoder {
    input: InputConfig,
    rasterizer: Option<Arc<dyn PdfRasterizer>>,
}

impl Decoder {
    fn decode(&self, doc: &RawDocument) -> Result<Vec<PageImage>, DecodeError> {
        if doc.is_empty() {
            return Err(DecodeError::Empty);
        }
        if doc.len() > self.input.max_document_bytes {
            return Err(DecodeError::TooLarge { size: doc.len(), limit: self.input.max_document_bytes });
        }

        let mut images = match doc.media_type() {
            MediaType::Image(sub) => match decode_image(doc.bytes()) {
                Ok(img) => vec![img],
                // Unrecognizable bytes under a known format are corrupt, not unsupported.
                Err(image::ImageError::Unsupported(_))
                    if image::ImageFormat::from_mime_type(format!("image/{sub}")).is_none() =>
                {
                    return Err(DecodeError::UnsupportedMediaType(doc.media_type().to_string()))
                }
                Err(e) => return Err(e.into()),
            },
            MediaType::Pdf => {
                let rasterizer = self.rasterizer.as_ref().ok_or(DecodeError::NoRasterizer)?;
                let pages = rasterizer.rasterize(doc.bytes())?;
                if pages.is_empty() {
                    return Err(DecodeError::NoPages);
                }
                pages
            }
        };

        if images.len() > self.input.max_pages {
            warn!(pages = images.len(), max = self.input.max_pages, "truncating long document");
            images.truncate(self.input.max_pages);
        }
        Ok(images
            .into_iter()
            .enumerate()
            .map(|(index, image)| PageImage::new(index, image))
            .collect())
    }
}

/// Concurrent per-page work that remembers which page each task serves.
#[derive(Default)]
struct PageTasks {
    set: JoinSet<RecognizedText>,
    pages: HashMap<task::Id, usize>,
}

impl PageTasks {
    fn spawn<F>(&mut self, index: usize, work: F)
    where
        F: Future<Output = RecognizedText> + Send + 'static,
    {
        let id = self.set.spawn(work).id();
        self.pages.insert(id, index);
    }

    /// Waits for every page. A task that panicked or was cancelled becomes a
    /// failed page rather than disappearing.
    async fn join_in_page_order(mut self) -> Vec<RecognizedText> {
        let mut texts = Vec::with_capacity(self.pages.len());
        while let Some(joined) = self.set.join_next_with_id().await {
            match joined {
                Ok((_, text)) => texts.push(text),
                Err(e) => match self.pages.get(&e.id()) {
                    Some(&index) => {
                        warn!(page = index, error = %e, "page task aborted");
                        texts.push(RecognizedText::failed(index, e.to_string()));
                    }
                    None => warn!(error = %e, "untracked page task aborted"),
                },
            }
        }
        texts.sort_by_key(|t| t.page_index);
        texts
    }
}

/// Orchestrates: decode → (normalize → recognize) per page → extract fields.
///
/// Holds no per-document state; one instance can serve concurrent runs.
pub struct ReceiptPipeline<R> {
    decoder: Decoder,
    normalizer: ImageNormalizer,
    extractor: TextExtractor<R>,
    engine: Arc<FieldEngine>,
}

impl<R: TextRecognizer + 'static> ReceiptPipeline<R> {
    pub fn new(recognizer: R, config: &PipelineConfig) -> Result<Self, ConfigError> {
        let rules = FieldRuleSet::with_specs(&config.rules)?;
        Ok(Self {
            decoder: Decoder { input: config.input.clone(), rasterizer: None },
            normalizer: ImageNormalizer::new(config.normalizer.clone()),
            extractor: TextExtractor::new(recognizer, config.ocr.page_timeout()),
            engine: Arc::new(FieldEngine::new(rules, EngineOptions::from(&config.extraction))),
        })
    }

    /// Enables PDF input.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.decoder.rasterizer = Some(rasterizer);
        self
    }

    pub fn with_normalizer(mut self, normalizer: ImageNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_engine(mut self, engine: FieldEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    /// Pin "today" for date plausibility, e.g. for reproducible runs.
    pub fn with_reference_date(self, date: NaiveDate) -> Self {
        let engine = self.engine.as_ref().clone().with_reference_date(date);
        self.with_engine(engine)
    }

    pub fn supports_pdf(&self) -> bool {
        self.decoder.rasterizer.is_some()
    }

    pub fn max_document_bytes(&self) -> usize {
        self.decoder.input.max_document_bytes
    }

    /// Split a document into page images without recognizing them.
    pub fn decode(&self, doc: &RawDocument) -> Result<Vec<PageImage>, DecodeError> {
        self.decoder.decode(doc)
    }

    #[tracing::instrument(skip_all, fields(media = %doc.media_type(), bytes = doc.len()))]
    pub async fn run(&self, doc: RawDocument) -> Result<ExtractionResult, DecodeError> {
        let digest = doc.digest();
        let decoder = self.decoder.clone();
        let pages = tokio::task::spawn_blocking(move || decoder.decode(&doc))
            .await
            .map_err(|e| DecodeError::Aborted(e.to_string()))??;
        let page_count = pages.len();

        let mut tasks = PageTasks::default();
        for page in pages {
            let normalizer = self.normalizer.clone();
            let extractor = self.extractor.clone();
            let index = page.index;
            tasks.spawn(index, async move {
                match task::spawn_blocking(move || normalizer.normalize(&page)).await {
                    Ok(normalized) => extractor.extract(&normalized).await,
                    Err(e) => {
                        warn!(page = index, error = %e, "normalization aborted");
                        RecognizedText::failed(index, e.to_string())
                    }
                }
            });
        }
        let texts = tasks.join_in_page_order().await;

        let result = self.engine.extract_fields(&texts);
        info!(
            document = hash::short_id(&digest),
            pages = page_count,
            failed_pages = result.failed_pages.len(),
            overall_confidence = result.overall_confidence,
            missing = ?result.missing_fields,
            "document extracted"
        );
        Ok(result)
    }

    /// Read a file and infer its media type from the extension.
    pub async fn run_path(&self, path: &Path) -> Result<ExtractionResult, DecodeError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let media_type = MediaType::from_extension(ext)
            .ok_or_else(|| DecodeError::UnsupportedMediaType(format!(".{ext}")))?;
        let bytes = tokio::fs::read(path).await?;
        self.run(RawDocument::new(bytes, media_type)).await
    }
}
