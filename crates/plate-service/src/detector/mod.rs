pub mod mock;
pub mod yolov8;

use anyhow::Result;
use async_trait::async_trait;
use common::plates::BoundingBox;
use image::DynamicImage;

/// Object detection capability: an image in, candidate boxes out.
///
/// Boxes are in the pixel space of the image passed in. Confidence
/// thresholding and ordering are owned by the implementation; an empty
/// vector means nothing was found and is not an error.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Short label used in logs and metrics (e.g. "vehicle", "plate")
    fn label(&self) -> &str;

    async fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>>;

    /// Health check - verify the detector is operational
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
