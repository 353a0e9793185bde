pub mod credentials;
pub mod mock;
pub mod vision;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Text recognition capability for a cropped plate image.
///
/// Returns the primary recognized text, or `None` when the service found no
/// text at all.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize_text(&self, image: &DynamicImage) -> Result<Option<String>>;

    /// Health check - verify the recognizer can be used
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Encode an image as JPEG. JPEG has no alpha channel, so the image is
/// flattened to RGB first.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)
        .context("Failed to encode image as JPEG")?;
    Ok(buffer.into_inner())
}
