use crate::annotate::annotate;
use crate::error::ApiError;
use crate::pipeline::ImagePipeline;
use crate::upload::{load_image, write_result, UploadStore};
use axum::body::Bytes;
use common::plates::UploadResponse;
use std::collections::HashMap;
use std::sync::Arc;
use telemetry::metrics::PLATE_SERVICE_UPLOADS;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct PlateServiceState {
    inner: Arc<PlateServiceStateInner>,
}

struct PlateServiceStateInner {
    pipeline: ImagePipeline,
    store: UploadStore,
}

impl PlateServiceState {
    pub fn new(pipeline: ImagePipeline, store: UploadStore) -> Self {
        Self {
            inner: Arc::new(PlateServiceStateInner { pipeline, store }),
        }
    }

    /// Run one uploaded file through persist, decode, pipeline and annotation
    pub async fn process_upload(&self, data: Bytes) -> Result<UploadResponse, ApiError> {
        let result = self.run_upload(data).await;
        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        PLATE_SERVICE_UPLOADS.with_label_values(&[status]).inc();
        result
    }

    async fn run_upload(&self, data: Bytes) -> Result<UploadResponse, ApiError> {
        let store = &self.inner.store;
        let size = data.len();
        let working = store.persist(data).await.map_err(|e| {
            error!("Failed to persist upload: {:#}", e);
            ApiError::Storage(e)
        })?;

        let image = load_image(working.path()).await.map_err(|e| {
            let err = ApiError::from(e);
            warn!(bytes = size, error = %err, "Could not load upload");
            err
        })?;

        info!(
            bytes = size,
            width = image.width(),
            height = image.height(),
            path = %working.path().display(),
            "Processing upload"
        );

        let outcome = self.inner.pipeline.process(&image).await.map_err(|e| {
            error!("Pipeline failed: {:#}", e);
            ApiError::Pipeline(e)
        })?;

        let annotated = annotate(&image, &outcome.vehicle_boxes, &outcome.plate_boxes);
        let result_path = store.result_path();
        write_result(result_path.clone(), annotated)
            .await
            .map_err(ApiError::Storage)?;

        // The scoped working file is deleted here; the shared one stays for the next request
        drop(working);

        match store.prune_results(&result_path).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "Pruned old result images"),
            Err(e) => warn!("Failed to prune result images: {:#}", e),
        }

        Ok(UploadResponse {
            numero_veiculos: outcome.vehicles_detected,
            placas: outcome.plates,
            imagem_resultado: result_path.to_string_lossy().into_owned(),
        })
    }

    pub async fn health(&self) -> HashMap<String, bool> {
        self.inner.pipeline.health_check_all().await
    }
}
