use crate::detector::yolov8::DetectorConfig;
use crate::ocr::vision::DEFAULT_ENDPOINT;
use crate::upload::DEFAULT_KEEP_RESULTS;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PlateServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Directory holding working uploads and result images
    pub upload_dir: PathBuf,

    /// Use the historical fixed file names instead of per-request files
    pub legacy_paths: bool,

    /// Largest accepted request body
    pub max_upload_bytes: usize,

    /// Per-request result images kept on disk; 0 keeps all of them
    pub keep_results: usize,

    pub vehicle_detector: DetectorConfig,
    pub plate_detector: DetectorConfig,

    /// Service-account key or API-key file for the OCR service
    pub ocr_credentials: PathBuf,

    pub ocr_endpoint: String,
    pub ocr_timeout: Duration,
}

impl PlateServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("PLATE_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());

        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));

        let legacy_paths = parse_var("UPLOAD_LEGACY_PATHS", false)?;
        let max_upload_bytes = parse_var("UPLOAD_MAX_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let keep_results = parse_var("UPLOAD_KEEP_RESULTS", DEFAULT_KEEP_RESULTS)?;

        let confidence: f32 = parse_var("DETECTION_CONFIDENCE", 0.5)?;
        let execution_provider =
            env::var("DETECTION_EXECUTION_PROVIDER").unwrap_or_else(|_| "CPU".to_string());

        let mut vehicle_detector = DetectorConfig::vehicles();
        if let Ok(path) = env::var("VEHICLE_MODEL_PATH") {
            vehicle_detector.model_path = path;
        }
        if let Ok(ids) = env::var("VEHICLE_CLASS_IDS") {
            vehicle_detector.class_filter =
                parse_class_ids(&ids).context("Invalid VEHICLE_CLASS_IDS")?;
        }

        let mut plate_detector = DetectorConfig::plates();
        if let Ok(path) = env::var("PLATE_MODEL_PATH") {
            plate_detector.model_path = path;
        }

        for detector in [&mut vehicle_detector, &mut plate_detector] {
            detector.confidence_threshold = confidence;
            detector.execution_provider = execution_provider.clone();
        }

        let ocr_credentials = env::var("GOOGLE_APPLICATION_CREDENTIALS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models/chave.json"));
        let ocr_endpoint = env::var("OCR_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let ocr_timeout = Duration::from_secs(parse_var("OCR_TIMEOUT_SECS", 30u64)?);

        Ok(Self {
            bind_addr,
            upload_dir,
            legacy_paths,
            max_upload_bytes,
            keep_results,
            vehicle_detector,
            plate_detector,
            ocr_credentials,
            ocr_endpoint,
            ocr_timeout,
        })
    }
}

impl Default for PlateServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            legacy_paths: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            keep_results: DEFAULT_KEEP_RESULTS,
            vehicle_detector: DetectorConfig::vehicles(),
            plate_detector: DetectorConfig::plates(),
            ocr_credentials: PathBuf::from("models/chave.json"),
            ocr_endpoint: DEFAULT_ENDPOINT.to_string(),
            ocr_timeout: Duration::from_secs(30),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated list of class ids; an empty list disables filtering
fn parse_class_ids(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("Invalid class id {:?}", s)))
        .collect()
}
