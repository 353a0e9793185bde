//! Vehicle → plate → OCR pipeline for a single photo.
//!
//! Everything runs sequentially in detector order: vehicles one at a time,
//! then the plates of each vehicle one at a time. Stages that find nothing
//! simply contribute nothing; only failures of the detectors or the OCR
//! service abort the run.

use crate::detector::ObjectDetector;
use crate::ocr::TextRecognizer;
use anyhow::{Context, Result};
use common::plate_text::{PlateString, PlateTextExtractor};
use common::plates::BoundingBox;
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics::{
    PLATE_SERVICE_DETECTIONS, PLATE_SERVICE_PIPELINE_LATENCY, PLATE_SERVICE_PLATES_RECOGNIZED,
    PLATE_SERVICE_REJECTED_BOXES,
};

/// Result of running the pipeline over one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutcome {
    /// Number of boxes the vehicle detector returned, including any that
    /// had to be rejected as out of bounds
    pub vehicles_detected: usize,

    /// Vehicle regions actually processed, clamped to the image
    pub vehicle_boxes: Vec<BoundingBox>,

    /// Plate regions in full-image coordinates
    pub plate_boxes: Vec<BoundingBox>,

    /// Extracted plates, vehicle-major then plate-minor, duplicates kept
    pub plates: Vec<PlateString>,
}

/// Crop `bbox` out of `image`.
///
/// The box is clamped to the image first; a box with nothing left inside
/// the image yields `None`. Returns the clamped box with the crop.
pub fn crop_region(image: &DynamicImage, bbox: &BoundingBox) -> Option<(BoundingBox, DynamicImage)> {
    let clamped = bbox.clamp_to(image.width(), image.height())?;
    let crop = image.crop_imm(clamped.x1, clamped.y1, clamped.width(), clamped.height());
    Some((clamped, crop))
}

pub struct ImagePipeline {
    vehicle_detector: Arc<dyn ObjectDetector>,
    plate_detector: Arc<dyn ObjectDetector>,
    ocr: Arc<dyn TextRecognizer>,
    extractor: PlateTextExtractor,
}

impl ImagePipeline {
    pub fn new(
        vehicle_detector: Arc<dyn ObjectDetector>,
        plate_detector: Arc<dyn ObjectDetector>,
        ocr: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            vehicle_detector,
            plate_detector,
            ocr,
            extractor: PlateTextExtractor::new(),
        }
    }

    pub async fn process(&self, image: &DynamicImage) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let mut outcome = PipelineOutcome::default();

        let vehicles = self
            .timed("vehicle_detection", self.vehicle_detector.detect(image))
            .await
            .context("Vehicle detection failed")?;
        outcome.vehicles_detected = vehicles.len();
        PLATE_SERVICE_DETECTIONS
            .with_label_values(&[self.vehicle_detector.label()])
            .inc_by(vehicles.len() as u64);

        for (vehicle_idx, vehicle) in vehicles.iter().enumerate() {
            let Some((vehicle_box, vehicle_img)) = crop_region(image, vehicle) else {
                tracing::warn!(vehicle = vehicle_idx, bbox = ?vehicle, "Vehicle box outside image, skipping");
                PLATE_SERVICE_REJECTED_BOXES
                    .with_label_values(&[self.vehicle_detector.label()])
                    .inc();
                continue;
            };
            outcome.vehicle_boxes.push(vehicle_box);

            let plates = self
                .timed("plate_detection", self.plate_detector.detect(&vehicle_img))
                .await
                .context("Plate detection failed")?;
            PLATE_SERVICE_DETECTIONS
                .with_label_values(&[self.plate_detector.label()])
                .inc_by(plates.len() as u64);

            if plates.is_empty() {
                tracing::debug!(vehicle = vehicle_idx, "No plate found on vehicle");
                continue;
            }

            for plate in &plates {
                let Some((plate_box, plate_img)) = crop_region(&vehicle_img, plate) else {
                    tracing::warn!(vehicle = vehicle_idx, bbox = ?plate, "Plate box outside vehicle, skipping");
                    PLATE_SERVICE_REJECTED_BOXES
                        .with_label_values(&[self.plate_detector.label()])
                        .inc();
                    continue;
                };
                outcome
                    .plate_boxes
                    .push(plate_box.offset(vehicle_box.x1, vehicle_box.y1));

                let text = self
                    .timed("ocr", self.ocr.recognize_text(&plate_img))
                    .await
                    .context("Plate OCR failed")?;

                let Some(text) = text else {
                    tracing::debug!(vehicle = vehicle_idx, "OCR returned no text");
                    continue;
                };

                if let Some(plate_string) = self.extractor.extract(&text) {
                    tracing::info!(vehicle = vehicle_idx, plate = %plate_string, "Plate recognized");
                    PLATE_SERVICE_PLATES_RECOGNIZED.inc();
                    outcome.plates.push(plate_string);
                }
            }
        }

        PLATE_SERVICE_PIPELINE_LATENCY
            .with_label_values(&["total"])
            .observe(start.elapsed().as_secs_f64());

        tracing::info!(
            vehicles = outcome.vehicles_detected,
            plate_regions = outcome.plate_boxes.len(),
            plates = outcome.plates.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline finished"
        );

        Ok(outcome)
    }

    /// Health of every stage, keyed by stage name
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        results.insert(
            format!("{}_detector", self.vehicle_detector.label()),
            self.vehicle_detector.health_check().await.unwrap_or(false),
        );
        results.insert(
            format!("{}_detector", self.plate_detector.label()),
            self.plate_detector.health_check().await.unwrap_or(false),
        );
        results.insert(
            "ocr".to_string(),
            self.ocr.health_check().await.unwrap_or(false),
        );
        results
    }

    async fn timed<T>(&self, stage: &str, fut: impl std::future::Future<Output = T>) -> T {
        let start = Instant::now();
        let output = fut.await;
        PLATE_SERVICE_PIPELINE_LATENCY
            .with_label_values(&[stage])
            .observe(start.elapsed().as_secs_f64());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::mock::StaticDetector;
    use crate::ocr::mock::StaticRecognizer;

    fn bbox(x1: u32, y1: u32, x2: u32, y2: u32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2 }
    }

    struct Harness {
        vehicles: Arc<StaticDetector>,
        plates: Arc<StaticDetector>,
        ocr: Arc<StaticRecognizer>,
    }

    impl Harness {
        fn new(vehicles: StaticDetector, plates: StaticDetector, ocr: StaticRecognizer) -> Self {
            Self {
                vehicles: Arc::new(vehicles),
                plates: Arc::new(plates),
                ocr: Arc::new(ocr),
            }
        }

        fn pipeline(&self) -> ImagePipeline {
            ImagePipeline::new(self.vehicles.clone(), self.plates.clone(), self.ocr.clone())
        }
    }

    #[test]
    fn test_crop_region_clamps() {
        let image = DynamicImage::new_rgb8(100, 50);

        let (clamped, crop) = crop_region(&image, &bbox(90, 40, 130, 70)).unwrap();
        assert_eq!(clamped, bbox(90, 40, 100, 50));
        assert_eq!((crop.width(), crop.height()), (10, 10));

        assert!(crop_region(&image, &bbox(100, 0, 120, 10)).is_none());
        assert!(crop_region(&image, &bbox(10, 60, 20, 80)).is_none());
    }

    #[tokio::test]
    async fn test_no_vehicles_skips_later_stages() {
        let h = Harness::new(
            StaticDetector::empty("vehicle"),
            StaticDetector::new("plate", vec![bbox(0, 0, 5, 5)]),
            StaticRecognizer::new([Some("ABC1234")]),
        );

        let outcome = h.pipeline().process(&DynamicImage::new_rgb8(64, 64)).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::default());
        assert_eq!(h.vehicles.calls(), 1);
        assert_eq!(h.plates.calls(), 0);
        assert_eq!(h.ocr.calls(), 0);
    }

    #[tokio::test]
    async fn test_vehicle_without_plates_skips_ocr() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(0, 0, 30, 30), bbox(30, 30, 60, 60)]),
            StaticDetector::scripted("plate", vec![vec![], vec![bbox(2, 2, 20, 10)]]),
            StaticRecognizer::new([Some("XYZ7890")]),
        );

        let outcome = h.pipeline().process(&DynamicImage::new_rgb8(64, 64)).await.unwrap();

        assert_eq!(h.plates.calls(), 2);
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(outcome.plates, vec!["XYZ7890"]);
        assert_eq!(outcome.vehicles_detected, 2);
        assert_eq!(outcome.plate_boxes, vec![bbox(32, 32, 50, 40)]);
    }

    #[tokio::test]
    async fn test_order_is_vehicle_major_and_duplicates_kept() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(0, 0, 50, 50), bbox(50, 0, 100, 50)]),
            StaticDetector::scripted(
                "plate",
                vec![
                    vec![bbox(0, 0, 20, 10), bbox(20, 20, 40, 30)],
                    vec![bbox(5, 5, 25, 15)],
                ],
            ),
            StaticRecognizer::new([Some("zzz9999"), Some("aaa1b22"), Some("ZZZ-9999")]),
        );

        let outcome = h.pipeline().process(&DynamicImage::new_rgb8(100, 50)).await.unwrap();

        assert_eq!(outcome.plates, vec!["ZZZ9999", "AAA1B22", "ZZZ9999"]);
        assert_eq!(h.ocr.calls(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_text_is_skipped() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(0, 0, 40, 40)]),
            StaticDetector::new("plate", vec![bbox(0, 0, 10, 5), bbox(10, 10, 30, 20), bbox(0, 20, 10, 30)]),
            StaticRecognizer::new([None, Some("no plate here"), Some("ABC 1D23")]),
        );

        let outcome = h.pipeline().process(&DynamicImage::new_rgb8(40, 40)).await.unwrap();

        assert_eq!(outcome.plates, vec!["ABC1D23"]);
        assert_eq!(outcome.plate_boxes.len(), 3);
        assert_eq!(h.ocr.calls(), 3);
    }

    #[tokio::test]
    async fn test_crops_follow_clamped_boxes() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(60, 10, 200, 90)]),
            StaticDetector::new("plate", vec![bbox(5, 50, 30, 120)]),
            StaticRecognizer::new([Some("ABC1234")]),
        );

        let outcome = h.pipeline().process(&DynamicImage::new_rgb8(100, 80)).await.unwrap();

        // vehicle clamped to 60..100 x 10..80, plate to 5..30 x 50..70 inside it
        assert_eq!(h.vehicles.seen_sizes(), vec![(100, 80)]);
        assert_eq!(h.plates.seen_sizes(), vec![(40, 70)]);
        assert_eq!(outcome.vehicle_boxes, vec![bbox(60, 10, 100, 80)]);
        assert_eq!(outcome.plate_boxes, vec![bbox(65, 60, 90, 80)]);
    }

    #[tokio::test]
    async fn test_out_of_bounds_boxes_are_rejected() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(500, 500, 600, 600), bbox(0, 0, 20, 20)]),
            StaticDetector::new("plate", vec![bbox(40, 40, 60, 60)]),
            StaticRecognizer::new([Some("ABC1234")]),
        );

        let outcome = h.pipeline().process(&DynamicImage::new_rgb8(50, 50)).await.unwrap();

        assert_eq!(outcome.vehicles_detected, 2);
        assert_eq!(outcome.vehicle_boxes, vec![bbox(0, 0, 20, 20)]);
        assert_eq!(h.plates.calls(), 1);
        assert_eq!(h.ocr.calls(), 0);
        assert!(outcome.plates.is_empty());
    }

    #[tokio::test]
    async fn test_detector_failure_propagates() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(0, 0, 20, 20)]),
            StaticDetector::failing("plate", "session lost"),
            StaticRecognizer::new([Some("ABC1234")]),
        );

        let err = h.pipeline().process(&DynamicImage::new_rgb8(50, 50)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("session lost"));
        assert_eq!(h.ocr.calls(), 0);
    }

    #[tokio::test]
    async fn test_ocr_failure_propagates() {
        let h = Harness::new(
            StaticDetector::new("vehicle", vec![bbox(0, 0, 20, 20)]),
            StaticDetector::new("plate", vec![bbox(0, 0, 10, 5)]),
            StaticRecognizer::failing("503 Service Unavailable"),
        );

        let err = h.pipeline().process(&DynamicImage::new_rgb8(50, 50)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("503"));
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let h = Harness::new(
            StaticDetector::empty("vehicle"),
            StaticDetector::empty("plate"),
            StaticRecognizer::new(Vec::<Option<String>>::new()),
        );

        let health = h.pipeline().health_check_all().await;
        assert_eq!(health.len(), 3);
        assert!(health.values().all(|&ok| ok));
        assert!(health.contains_key("vehicle_detector"));
        assert!(health.contains_key("plate_detector"));
    }
}
