use anyhow::{Context, Result};
use plate_service::{
    api,
    detector::{
        yolov8::{DetectorConfig, OnnxDetector},
        ObjectDetector,
    },
    ocr::{credentials::VisionAuth, vision::GoogleVisionClient, TextRecognizer},
    ImagePipeline, PlateServiceConfig, PlateServiceState, UploadStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_with_service("plate-service");

    info!("Starting Plate Service...");

    let config = PlateServiceConfig::from_env()?;
    info!(
        "Plate Service configuration: bind={}, upload_dir={}, legacy_paths={}",
        config.bind_addr,
        config.upload_dir.display(),
        config.legacy_paths
    );

    let store = UploadStore::new(config.upload_dir.clone(), config.legacy_paths)
        .with_keep_results(config.keep_results);
    store.ensure_dir().await?;

    let vehicle_detector: Arc<dyn ObjectDetector> = Arc::new(load_detector(
        "vehicle",
        config.vehicle_detector.clone(),
    )?);
    let plate_detector: Arc<dyn ObjectDetector> =
        Arc::new(load_detector("plate", config.plate_detector.clone())?);

    let auth = VisionAuth::from_file(&config.ocr_credentials)?;
    info!(
        "OCR client configured: endpoint={}, credentials={:?}",
        config.ocr_endpoint, auth
    );
    let ocr: Arc<dyn TextRecognizer> = Arc::new(GoogleVisionClient::new(
        config.ocr_endpoint.clone(),
        auth,
        config.ocr_timeout,
    )?);

    let pipeline = ImagePipeline::new(vehicle_detector, plate_detector, ocr);
    let state = PlateServiceState::new(pipeline, store);

    let app = api::router(state, config.max_upload_bytes);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Plate Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Plate Service stopped");
    Ok(())
}

fn load_detector(label: &str, config: DetectorConfig) -> Result<OnnxDetector> {
    info!("Loading {} model from {}", label, config.model_path);
    let detector = OnnxDetector::load(label, config)
        .with_context(|| format!("Failed to load {} detector", label))?;
    info!(
        "{} detector ready: provider={}, confidence={}, input_size={}",
        label,
        detector.execution_provider(),
        detector.config().confidence_threshold,
        detector.config().input_size
    );
    Ok(detector)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
