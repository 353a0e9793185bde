use crate::error::ApiError;
use crate::state::PlateServiceState;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::plates::UploadResponse;
use serde_json::json;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Receive an image, read its plates and return the annotated result path
pub async fn upload(
    State(state): State<PlateServiceState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart?;

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Malformed multipart body: {}", e);
        ApiError::MalformedUpload(e.body_text())
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            tracing::warn!("Failed to read upload: {}", e);
            ApiError::MalformedUpload(e.body_text())
        })?;
        tracing::debug!(filename = ?filename, bytes = data.len(), "Received file part");
        file = Some(data);
        break;
    }

    let data = file.ok_or(ApiError::MissingFile)?;
    let response = state.process_upload(data).await?;
    Ok(Json(response))
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "plate-service"
    }))
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<PlateServiceState>) -> impl IntoResponse {
    let health = state.health().await;
    let all_healthy = health.values().all(|&healthy| healthy);

    if all_healthy {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "components": health
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "components": health
            })),
        )
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => ApiError::Internal(format!("Failed to encode metrics: {}", e)).into_response(),
    }
}
