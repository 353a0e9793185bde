//! Shared contracts for the plate reading service.
//!
//! These types cross the boundary between the detection pipeline and the HTTP
//! layer, so they carry the wire field names the upload clients expect.

use crate::plate_text::PlateString;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates of the image it was detected in.
///
/// `x2`/`y2` are exclusive. A well-formed box has `x2 > x1` and `y2 > y1`;
/// detectors may still emit boxes that spill over the image edge, which is why
/// every crop goes through [`BoundingBox::clamp_to`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Build a box, returning `None` unless `x2 > x1` and `y2 > y1`.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Self> {
        if x2 > x1 && y2 > y1 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Restrict the box to an image of `width` x `height` pixels.
    ///
    /// Returns `None` when nothing of the box is left inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        Self::new(
            self.x1.min(width),
            self.y1.min(height),
            self.x2.min(width),
            self.y2.min(height),
        )
    }

    /// Translate a box from a sub-image back into its parent's coordinates.
    pub fn offset(&self, dx: u32, dy: u32) -> Self {
        Self {
            x1: self.x1.saturating_add(dx),
            y1: self.y1.saturating_add(dy),
            x2: self.x2.saturating_add(dx),
            y2: self.y2.saturating_add(dy),
        }
    }

    /// Intersection over union of two boxes (0.0 when disjoint)
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = if x2 > x1 && y2 > y1 {
            ((x2 - x1) as u64 * (y2 - y1) as u64) as f32
        } else {
            0.0
        };

        let union = self.area() as f32 + other.area() as f32 - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Successful reply to `POST /upload`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    /// Number of vehicle boxes found in the photo, whether or not a plate was read
    pub numero_veiculos: usize,

    /// Recognized plates in vehicle-then-plate detection order, duplicates kept
    pub placas: Vec<PlateString>,

    /// Path of the annotated result image
    pub imagem_resultado: String,
}

/// Error reply body shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}
