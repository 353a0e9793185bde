use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref PLATE_SERVICE_UPLOADS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("plate_service_uploads_total", "Total number of image uploads"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SERVICE_DETECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_service_detections_total",
                "Total number of boxes returned by the detectors",
            ),
            &["detector"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SERVICE_REJECTED_BOXES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_service_rejected_boxes_total",
                "Detected boxes lying entirely outside their source image",
            ),
            &["detector"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SERVICE_PLATES_RECOGNIZED: IntCounter = {
        let metric = IntCounter::new(
            "plate_service_plates_recognized_total",
            "Total number of plate numbers extracted from OCR text",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SERVICE_OCR_REQUESTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("plate_service_ocr_requests_total", "Total number of OCR calls"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SERVICE_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "plate_service_inference_seconds",
                "Detector inference time",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["detector", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SERVICE_PIPELINE_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "plate_service_pipeline_latency_seconds",
                "End-to-end latency of one pipeline stage",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Encode every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
