//! Pixel-level transform primitives used by the normalizer.
//!
//! The normalizer only sequences these; any implementation of
//! [`PixelTransforms`] can be swapped in (tests use the default one on
//! synthetic images).

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use thiserror::Error;

/// Pixels darker than this count as ink.
pub const INK_THRESHOLD: u8 = 128;

/// Below this many ink pixels there is no baseline to measure.
const MIN_INK_PIXELS: usize = 32;

/// Skew estimation samples at most this many ink pixels.
const MAX_SKEW_SAMPLES: usize = 60_000;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("image has no pixels")]
    EmptyImage,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("skew undetectable: {0}")]
    SkewUndetectable(String),
    #[error("no content found")]
    NoContent,
}

/// Result of a deskew pass.
#[derive(Debug, Clone)]
pub struct Deskewed {
    pub image: GrayImage,
    /// Estimated skew of the input in degrees; 0.0 means no rotation was done.
    pub degrees: f32,
}

/// Capability contract for the primitives the normalizer sequences.
pub trait PixelTransforms: Send + Sync {
    fn to_grayscale(&self, image: &DynamicImage) -> GrayImage;
    fn denoise(&self, image: &GrayImage, sigma: f32) -> Result<GrayImage, TransformError>;
    fn binarize(
        &self,
        image: &GrayImage,
        block_radius: u32,
        offset: i32,
    ) -> Result<GrayImage, TransformError>;
    fn deskew(
        &self,
        image: &GrayImage,
        max_degrees: f32,
        step_degrees: f32,
    ) -> Result<Deskewed, TransformError>;
    fn crop_to_content(&self, image: &GrayImage, padding: u32) -> Result<GrayImage, TransformError>;
}

/// Default primitives built on `image` and `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTransforms;

impl PixelTransforms for ImageTransforms {
    fn to_grayscale(&self, image: &DynamicImage) -> GrayImage {
        image.to_luma8()
    }

    fn denoise(&self, image: &GrayImage, sigma: f32) -> Result<GrayImage, TransformError> {
        ensure_non_empty(image)?;
        if !(sigma > 0.0) {
            return Err(TransformError::InvalidParameter(format!("sigma {sigma}")));
        }
        Ok(image::imageops::blur(image, sigma))
    }

    /// Local mean thresholding: a pixel is ink when it is more than `offset`
    /// darker than the mean of its `(2r+1)²` neighbourhood.
    fn binarize(
        &self,
        image: &GrayImage,
        block_radius: u32,
        offset: i32,
    ) -> Result<GrayImage, TransformError> {
        ensure_non_empty(image)?;
        if block_radius == 0 {
            return Err(TransformError::InvalidParameter("block radius 0".into()));
        }

        let (w, h) = image.dimensions();
        let integral = integral_image(image);
        let stride = w as usize + 1;
        let at = |x: u32, y: u32| integral[y as usize * stride + x as usize];

        Ok(ImageBuffer::from_fn(w, h, |x, y| {
            let x0 = x.saturating_sub(block_radius);
            let y0 = y.saturating_sub(block_radius);
            let x1 = (x + block_radius + 1).min(w);
            let y1 = (y + block_radius + 1).min(h);
            let sum = at(x1, y1) + at(x0, y0) - at(x0, y1) - at(x1, y0);
            let count = u64::from((x1 - x0) * (y1 - y0));
            let mean = (sum / count) as i32;
            if i32::from(image.get_pixel(x, y)[0]) < mean - offset {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        }))
    }

    fn deskew(
        &self,
        image: &GrayImage,
        max_degrees: f32,
        step_degrees: f32,
    ) -> Result<Deskewed, TransformError> {
        let degrees = estimate_skew(image, max_degrees, step_degrees)?;
        if degrees == 0.0 {
            return Ok(Deskewed { image: image.clone(), degrees });
        }
        // Nearest-neighbour keeps a binarized page binary.
        let image = rotate_about_center(
            image,
            -degrees.to_radians(),
            Interpolation::Nearest,
            Luma([255u8]),
        );
        Ok(Deskewed { image, degrees })
    }

    fn crop_to_content(&self, image: &GrayImage, padding: u32) -> Result<GrayImage, TransformError> {
        ensure_non_empty(image)?;
        let (w, h) = image.dimensions();
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in image.enumerate_pixels() {
            if p[0] < INK_THRESHOLD {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        let (min_x, min_y, max_x, max_y) = bounds.ok_or(TransformError::NoContent)?;

        let x0 = min_x.saturating_sub(padding);
        let y0 = min_y.saturating_sub(padding);
        let x1 = max_x.saturating_add(padding).saturating_add(1).min(w);
        let y1 = max_y.saturating_add(padding).saturating_add(1).min(h);
        Ok(image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
    }
}

/// True when every pixel is pure black or pure white.
pub fn is_binary(image: &GrayImage) -> bool {
    image.pixels().all(|p| p[0] == 0 || p[0] == 255)
}

/// Estimate the dominant text-line angle by projection profiles.
///
/// Each candidate angle projects the ink pixels onto the vertical axis along
/// that slope; the angle with the sharpest profile (largest sum of squared
/// bin counts) wins. Candidates are tried from 0° outward, and ties keep the
/// smaller angle, so an aligned page reports exactly 0.0.
pub fn estimate_skew(
    image: &GrayImage,
    max_degrees: f32,
    step_degrees: f32,
) -> Result<f32, TransformError> {
    ensure_non_empty(image)?;
    if !(step_degrees > 0.0) || max_degrees < 0.0 {
        return Err(TransformError::InvalidParameter(format!(
            "skew range ±{max_degrees}° step {step_degrees}°"
        )));
    }

    let ink: Vec<(f32, f32)> = image
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] < INK_THRESHOLD)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if ink.len() < MIN_INK_PIXELS {
        return Err(TransformError::SkewUndetectable(format!(
            "only {} ink pixels",
            ink.len()
        )));
    }
    let stride = (ink.len() / MAX_SKEW_SAMPLES).max(1);
    let samples: Vec<(f32, f32)> = ink.into_iter().step_by(stride).collect();

    let steps = (max_degrees / step_degrees).floor() as i32;
    let mut best = (0.0f32, projection_score(&samples, 0.0, image.width(), image.height()));
    for k in 1..=steps {
        for sign in [1.0f32, -1.0] {
            let degrees = sign * k as f32 * step_degrees;
            let score = projection_score(&samples, degrees, image.width(), image.height());
            if score > best.1 {
                best = (degrees, score);
            }
        }
    }
    Ok(best.0)
}

fn projection_score(points: &[(f32, f32)], degrees: f32, width: u32, height: u32) -> f64 {
    let slope = degrees.to_radians().tan();
    let shift = (width as f32 * slope.abs()).ceil();
    let bins = (height as f32 + 2.0 * shift) as usize + 2;
    let mut histogram = vec![0u32; bins];
    for &(x, y) in points {
        let projected = (y - x * slope + shift).round();
        if projected >= 0.0 && (projected as usize) < bins {
            histogram[projected as usize] += 1;
        }
    }
    histogram.iter().map(|&c| f64::from(c) * f64::from(c)).sum()
}

fn integral_image(image: &GrayImage) -> Vec<u64> {
    let (w, h) = image.dimensions();
    let stride = w as usize + 1;
    let mut integral = vec![0u64; stride * (h as usize + 1)];
    for y in 0..h as usize {
        let mut row = 0u64;
        for x in 0..w as usize {
            row += u64::from(image.get_pixel(x as u32, y as u32)[0]);
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }
    integral
}

fn ensure_non_empty(image: &GrayImage) -> Result<(), TransformError> {
    if image.width() == 0 || image.height() == 0 {
        Err(TransformError::EmptyImage)
    } else {
        Ok(())
    }
}
