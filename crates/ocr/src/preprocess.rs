use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transforms::{is_binary, ImageTransforms, PixelTransforms, TransformError};
use crate::types::{NormalizedImage, PageImage, Stage};

/// Per-stage switches and strengths. Defaults suit phone photos of receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerOptions {
    /// Larger pages are scaled down first (Tesseract works best around 300 DPI / ~2000 px).
    pub max_dimension: Option<u32>,
    pub denoise: bool,
    pub denoise_sigma: f32,
    pub binarize: bool,
    pub binarize_block_radius: u32,
    pub binarize_offset: i32,
    pub deskew: bool,
    pub max_skew_degrees: f32,
    pub skew_step_degrees: f32,
    pub crop: bool,
    pub crop_padding: u32,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            max_dimension: Some(2800),
            denoise: true,
            denoise_sigma: 1.0,
            binarize: true,
            binarize_block_radius: 15,
            binarize_offset: 10,
            deskew: true,
            max_skew_degrees: 15.0,
            skew_step_degrees: 0.5,
            crop: true,
            crop_padding: 10,
        }
    }
}

/// Runs resize → grayscale → denoise → binarize → deskew → crop.
///
/// Never fails: a stage that errors is recorded as skipped and the previous
/// image carries on. A page that is already pure black/white skips the tone
/// stages, which makes a second pass over normalized output a no-op.
#[derive(Clone)]
pub struct ImageNormalizer {
    options: NormalizerOptions,
    transforms: Arc<dyn PixelTransforms>,
}

impl ImageNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self::with_transforms(options, Arc::new(ImageTransforms))
    }

    pub fn with_transforms(options: NormalizerOptions, transforms: Arc<dyn PixelTransforms>) -> Self {
        Self { options, transforms }
    }

    pub fn options(&self) -> &NormalizerOptions {
        &self.options
    }

    pub fn normalize(&self, page: &PageImage) -> NormalizedImage {
        let opts = &self.options;
        let mut log = StageLog::default();

        let resized;
        let source = match opts.max_dimension {
            Some(max) if page.image.width() > max || page.image.height() > max => {
                resized = page.image.resize(max, max, image::imageops::FilterType::Lanczos3);
                log.applied.push(Stage::Resize);
                &resized
            }
            _ => &page.image,
        };

        let mut gray = self.transforms.to_grayscale(source);
        log.applied.push(Stage::Grayscale);

        if is_binary(&gray) {
            log.skip(Stage::Denoise, "input already binary");
            log.skip(Stage::Binarize, "input already binary");
        } else {
            gray = log.run(Stage::Denoise, opts.denoise, gray, |img| {
                self.transforms.denoise(img, opts.denoise_sigma)
            });
            gray = log.run(Stage::Binarize, opts.binarize, gray, |img| {
                self.transforms
                    .binarize(img, opts.binarize_block_radius, opts.binarize_offset)
            });
        }

        let mut skew_degrees = 0.0;
        if opts.deskew {
            match self
                .transforms
                .deskew(&gray, opts.max_skew_degrees, opts.skew_step_degrees)
            {
                Ok(d) if d.degrees != 0.0 => {
                    skew_degrees = d.degrees;
                    gray = d.image;
                    log.applied.push(Stage::Deskew);
                }
                Ok(_) => log.skip(Stage::Deskew, "already aligned"),
                Err(e) => log.failed(Stage::Deskew, &e),
            }
        } else {
            log.skip(Stage::Deskew, "disabled");
        }

        gray = log.run(Stage::Crop, opts.crop, gray, |img| {
            self.transforms.crop_to_content(img, opts.crop_padding)
        });

        debug!(
            page = page.index,
            width = gray.width(),
            height = gray.height(),
            skew_degrees,
            applied = ?log.applied,
            "page normalized"
        );

        NormalizedImage {
            page_index: page.index,
            image: gray,
            applied: log.applied,
            skipped: log.skipped,
            skew_degrees,
        }
    }
}

#[derive(Default)]
struct StageLog {
    applied: Vec<Stage>,
    skipped: Vec<(Stage, String)>,
}

impl StageLog {
    fn run<F>(&mut self, stage: Stage, enabled: bool, image: GrayImage, f: F) -> GrayImage
    where
        F: FnOnce(&GrayImage) -> Result<GrayImage, TransformError>,
    {
        if !enabled {
            self.skip(stage, "disabled");
            return image;
        }
        match f(&image) {
            Ok(out) => {
                self.applied.push(stage);
                out
            }
            Err(e) => {
                self.failed(stage, &e);
                image
            }
        }
    }

    fn skip(&mut self, stage: Stage, reason: &str) {
        self.skipped.push((stage, reason.to_string()));
    }

    fn failed(&mut self, stage: Stage, err: &TransformError) {
        debug!(?stage, error = %err, "normalization stage skipped");
        self.skipped.push((stage, err.to_string()));
    }
}

/// Decode any raster format `image` understands.
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(data)
}

/// PNG bytes for handing a normalized page to the recognizer.
pub fn encode_as_png(img: &GrayImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img.clone()).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
