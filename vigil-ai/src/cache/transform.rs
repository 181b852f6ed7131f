//! Deterministic artifact transforms
//!
//! A transform must be a pure function of (source bytes, `params()`): the
//! preprocessing cache keys its output on exactly those two inputs.

use crate::error::CacheError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, Rgb, RgbImage, RgbaImage};

/// Encoded transform output
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    /// File extension without dot ("jpg", "png")
    pub extension: &'static str,
}

/// Content transform run on cache misses
pub trait Transform: Send + Sync + 'static {
    /// Canonical parameter string, part of the cache key
    fn params(&self) -> String;

    /// Extensions `apply` can produce, checked on cache lookup
    fn output_extensions(&self) -> &'static [&'static str];

    /// Transform source bytes; CPU-bound, called from a blocking thread
    fn apply(&self, source: &[u8]) -> Result<TransformOutput, CacheError>;
}

/// Canonical resize/re-encode for vision model input
///
/// - alpha flattened onto white
/// - longest edge shrunk to `max_size` (Lanczos3, aspect preserved, never upscaled)
/// - grayscale sources → PNG, everything else → JPEG at `jpeg_quality`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStandardizer {
    pub max_size: u32,
    pub jpeg_quality: u8,
}

impl Default for ImageStandardizer {
    fn default() -> Self {
        Self {
            max_size: 896,
            jpeg_quality: 95,
        }
    }
}

impl ImageStandardizer {
    pub fn new(max_size: u32, jpeg_quality: u8) -> Self {
        Self { max_size, jpeg_quality }
    }
}

fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn map_image_error(err: ImageError) -> CacheError {
    match err {
        ImageError::Unsupported(e) => CacheError::UnsupportedArtifact(e.to_string()),
        ImageError::Decoding(e) => {
            CacheError::UnsupportedArtifact(format!("Undecodable image: {}", e))
        }
        ImageError::IoError(e) => CacheError::Io(e),
        other => CacheError::Transform(other.to_string()),
    }
}

impl Transform for ImageStandardizer {
    fn params(&self) -> String {
        format!(
            "image-standardizer/v1;max_size={};jpeg_quality={}",
            self.max_size, self.jpeg_quality
        )
    }

    fn output_extensions(&self) -> &'static [&'static str] {
        &["jpg", "png"]
    }

    fn apply(&self, source: &[u8]) -> Result<TransformOutput, CacheError> {
        let img = image::load_from_memory(source).map_err(map_image_error)?;
        let grayscale = !img.color().has_color();

        let img = if img.color().has_alpha() {
            DynamicImage::ImageRgb8(flatten_on_white(&img.to_rgba8()))
        } else {
            img
        };

        let img = if img.width().max(img.height()) > self.max_size {
            img.resize(self.max_size, self.max_size, FilterType::Lanczos3)
        } else {
            img
        };

        let mut bytes = Vec::new();
        if grayscale {
            DynamicImage::ImageLuma8(img.to_luma8())
                .write_with_encoder(PngEncoder::new(&mut bytes))
                .map_err(map_image_error)?;
            Ok(TransformOutput { bytes, extension: "png" })
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality))
                .map_err(map_image_error)?;
            Ok(TransformOutput { bytes, extension: "jpg" })
        }
    }
}
