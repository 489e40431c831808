use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("PDF backend unavailable: {0}")]
    Backend(String),
    #[error("failed to open PDF: {0}")]
    Open(String),
    #[error("failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },
}

/// Turns a PDF into one image per page, in page order.
pub trait PdfRasterizer: Send + Sync {
    fn rasterize(&self, pdf: &[u8]) -> Result<Vec<DynamicImage>, RasterError>;
}

/// Hands back fixed pages regardless of input. For tests and fixtures.
pub struct StaticRasterizer {
    pages: Vec<DynamicImage>,
}

impl StaticRasterizer {
    pub fn new(pages: Vec<DynamicImage>) -> Self {
        Self { pages }
    }
}

impl PdfRasterizer for StaticRasterizer {
    fn rasterize(&self, _pdf: &[u8]) -> Result<Vec<DynamicImage>, RasterError> {
        Ok(self.pages.clone())
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::{PdfRasterizer, RasterError};
    use image::DynamicImage;
    use pdfium_render::prelude::*;

    pub const RENDER_DPI: f32 = 300.0;

    /// Renders with a system-installed pdfium library.
    pub struct PdfiumRasterizer {
        dpi: f32,
        max_pages: usize,
    }

    impl PdfiumRasterizer {
        pub fn new(max_pages: usize) -> Self {
            Self { dpi: RENDER_DPI, max_pages }
        }
    }

    impl PdfRasterizer for PdfiumRasterizer {
        fn rasterize(&self, pdf: &[u8]) -> Result<Vec<DynamicImage>, RasterError> {
            let pdfium = Pdfium::new(
                Pdfium::bind_to_system_library()
                    .map_err(|e| RasterError::Backend(e.to_string()))?,
            );
            let doc = pdfium
                .load_pdf_from_byte_slice(pdf, None)
                .map_err(|e| RasterError::Open(e.to_string()))?;

            let count = (doc.pages().len() as usize).min(self.max_pages);
            let mut images = Vec::with_capacity(count);
            for index in 0..count {
                let page = doc.pages().get(index as u16).map_err(|e| RasterError::Render {
                    page: index,
                    reason: e.to_string(),
                })?;
                let width = (page.width().value * self.dpi / 72.0) as i32;
                let height = (page.height().value * self.dpi / 72.0) as i32;
                let bitmap = page
                    .render_with_config(
                        &PdfRenderConfig::new()
                            .set_target_width(width)
                            .set_target_height(height),
                    )
                    .map_err(|e| RasterError::Render { page: index, reason: e.to_string() })?;
                images.push(bitmap.as_image());
            }
            Ok(images)
        }
    }
}
