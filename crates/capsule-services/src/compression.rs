//! Image compression for moderation resubmits

use anyhow::{Context, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use std::io::Cursor;

const DEFAULT_MAX_DIMENSION: u32 = 2048;
const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Shrinks an image so an external service will accept it.
///
/// Implementations are CPU-bound and synchronous; async callers should run them on
/// the blocking pool.
pub trait ImageCompressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Bytes>;
}

/// Downscales to a maximum edge length and re-encodes as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct JpegCompressor {
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for JpegCompressor {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ImageCompressor for JpegCompressor {
    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        let mut img = image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .context("Failed to detect image format")?
            .decode()
            .context("Failed to decode image")?;

        let (width, height) = img.dimensions();
        if width.max(height) > self.max_dimension {
            img = img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
        }

        // JPEG has no alpha channel
        let rgb = img.to_rgb8();
        let mut buffer = Vec::with_capacity(data.len() / 2);
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder
            .encode_image(&rgb)
            .context("Failed to encode JPEG")?;

        tracing::debug!(
            original_bytes = data.len(),
            compressed_bytes = buffer.len(),
            original_width = width,
            original_height = height,
            "Image compressed"
        );

        Ok(Bytes::from(buffer))
    }
}
