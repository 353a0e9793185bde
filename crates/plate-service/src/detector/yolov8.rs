/// YOLOv8 object detection using ONNX Runtime
use super::ObjectDetector;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use common::plates::BoundingBox;
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// COCO ids of car, motorcycle, bus and truck
pub const COCO_VEHICLE_CLASSES: [usize; 4] = [2, 3, 5, 7];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Path to the ONNX model file
    pub model_path: String,

    /// Confidence threshold for detections (0.0 to 1.0)
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// IoU threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Maximum number of boxes per image
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Model input size (width and height)
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Class ids to keep; empty keeps every class
    #[serde(default)]
    pub class_filter: Vec<usize>,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID
    #[serde(default)]
    pub device_id: i32,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

fn default_confidence() -> f32 {
    0.5
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    100
}

fn default_input_size() -> u32 {
    640
}

fn default_execution_provider() -> String {
    "CPU".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

impl DetectorConfig {
    /// Defaults for the vehicle model
    pub fn vehicles() -> Self {
        Self {
            model_path: "models/yolov8_carros.onnx".to_string(),
            class_filter: COCO_VEHICLE_CLASSES.to_vec(),
            ..Self::default()
        }
    }

    /// Defaults for the single-class plate model
    pub fn plates() -> Self {
        Self {
            model_path: "models/yolov8_placas.onnx".to_string(),
            max_detections: 10,
            ..Self::default()
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            input_size: default_input_size(),
            class_filter: Vec::new(),
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

/// YOLOv8 detector backed by an ONNX Runtime session
pub struct OnnxDetector {
    label: String,
    config: DetectorConfig,
    session: Arc<Mutex<Session>>,
    execution_provider: String,
}

impl OnnxDetector {
    /// Load the model in `config.model_path`. Fails if the model is missing or
    /// cannot be loaded by any execution provider.
    pub fn load(label: impl Into<String>, config: DetectorConfig) -> Result<Self> {
        let label = label.into();
        let (session, execution_provider) = create_session(&config)
            .with_context(|| format!("Failed to load {} model {}", label, config.model_path))?;

        tracing::info!(
            detector = %label,
            model = %config.model_path,
            provider = %execution_provider,
            confidence = config.confidence_threshold,
            "Initialized ONNX detector"
        );

        Ok(Self {
            label,
            config,
            session: Arc::new(Mutex::new(session)),
            execution_provider,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn execution_provider(&self) -> &str {
        &self.execution_provider
    }
}

#[async_trait]
impl ObjectDetector for OnnxDetector {
    fn label(&self) -> &str {
        &self.label
    }

    async fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        let session = Arc::clone(&self.session);
        let config = self.config.clone();
        let image = image.clone();

        let (boxes, inference_time) = tokio::task::spawn_blocking(move || -> Result<_> {
            let input = preprocess_image(&image, config.input_size);
            let input_tensor = Value::from_array(input)?;

            let start = Instant::now();
            let mut session = session
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection session: {}", e))?;
            let outputs = session.run(ort::inputs![input_tensor])?;
            let inference_time = start.elapsed();

            // Try common YOLO output names
            let output_value = outputs
                .get("output0")
                .or_else(|| outputs.get("output"))
                .context("No detection output tensor found (tried: output0, output)")?;
            let (shape, data) = output_value.try_extract_tensor::<f32>()?;
            let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
            let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;

            let boxes = decode_predictions(&output, &config, image.width(), image.height())?;
            Ok((boxes, inference_time))
        })
        .await
        .context("Detection task panicked")??;

        telemetry::metrics::PLATE_SERVICE_INFERENCE_TIME
            .with_label_values(&[&self.label, &self.execution_provider])
            .observe(inference_time.as_secs_f64());

        tracing::debug!(
            detector = %self.label,
            boxes = boxes.len(),
            inference_ms = inference_time.as_millis() as u64,
            "Detection finished"
        );

        Ok(boxes)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.session.is_poisoned())
    }
}

/// Resize to the model input and convert to a normalized NCHW tensor
pub fn preprocess_image(img: &DynamicImage, size: u32) -> Array<f32, IxDyn> {
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb_img = resized.to_rgb8();

    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));

    for (x, y, pixel) in rgb_img.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }

    input
}

/// Turn raw YOLOv8 output (`[1, 4 + classes, predictions]`) into boxes in
/// source-image pixels, best first.
pub fn decode_predictions(
    output: &Array<f32, IxDyn>,
    config: &DetectorConfig,
    original_width: u32,
    original_height: u32,
) -> Result<Vec<BoundingBox>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] < 5 {
        bail!("Unexpected YOLOv8 output shape {:?}", shape);
    }

    let scale_x = original_width as f32 / config.input_size as f32;
    let scale_y = original_height as f32 / config.input_size as f32;

    let num_classes = shape[1] - 4;
    let num_predictions = shape[2];
    let mut candidates = Vec::new();

    for i in 0..num_predictions {
        let mut max_class_score = 0.0f32;
        let mut max_class_idx = 0;

        for class_idx in 0..num_classes {
            let score = output[[0, 4 + class_idx, i]];
            if score > max_class_score {
                max_class_score = score;
                max_class_idx = class_idx;
            }
        }

        if max_class_score < config.confidence_threshold {
            continue;
        }
        if !config.class_filter.is_empty() && !config.class_filter.contains(&max_class_idx) {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        let x1 = ((cx - w / 2.0) * scale_x).max(0.0) as u32;
        let y1 = ((cy - h / 2.0) * scale_y).max(0.0) as u32;
        let x2 = ((cx + w / 2.0) * scale_x).max(0.0) as u32;
        let y2 = ((cy + h / 2.0) * scale_y).max(0.0) as u32;

        if let Some(bbox) = BoundingBox::new(x1, y1, x2, y2) {
            candidates.push((bbox, max_class_score));
        }
    }

    Ok(nms(candidates, config.iou_threshold)
        .into_iter()
        .take(config.max_detections)
        .map(|(bbox, _)| bbox)
        .collect())
}

/// Class-agnostic non-maximum suppression, highest score first
pub fn nms(mut boxes: Vec<(BoundingBox, f32)>, iou_threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep
            .iter()
            .all(|(kept, _)| kept.iou(&candidate.0) < iou_threshold)
        {
            keep.push(candidate);
        }
    }

    keep
}

/// Create ONNX session with execution provider fallback
fn create_session(config: &DetectorConfig) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            tracing::info!("Attempting TensorRT for {}", config.model_path);
            let result = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(config.intra_threads)?
                .with_inter_threads(config.inter_threads)?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])?
                .commit_from_file(&config.model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    tracing::warn!("TensorRT failed, trying CUDA: {}", e);
                    try_cuda(config)
                }
            }
        }
        "CUDA" => try_cuda(config),
        _ => try_cpu(config),
    }
}

fn try_cuda(config: &DetectorConfig) -> Result<(Session, String)> {
    tracing::info!("Attempting CUDA for {}", config.model_path);
    let result = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.intra_threads)?
        .with_inter_threads(config.inter_threads)?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])?
        .commit_from_file(&config.model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!("CUDA failed, using CPU: {}", e);
            try_cpu(config)
        }
    }
}

fn try_cpu(config: &DetectorConfig) -> Result<(Session, String)> {
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .commit_from_file(&config.model_path)
        .context("Failed to load model from file")?;
    Ok((session, "CPU".to_string()))
}
