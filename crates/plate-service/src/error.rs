use crate::upload::LoadImageError;
use axum::{
    extract::multipart::MultipartRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::plates::ErrorResponse;
use thiserror::Error;

/// Failure of one upload request, as reported to the client
#[derive(Debug, Error)]
pub enum ApiError {
    /// No part named `file` in the request, or no multipart body at all
    #[error("No file part")]
    MissingFile,

    #[error("Invalid upload: {0}")]
    MalformedUpload(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Writing or reading the working and result files
    #[error("{0:#}")]
    Storage(anyhow::Error),

    /// Detector or OCR failure
    #[error("{0:#}")]
    Pipeline(anyhow::Error),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::MalformedUpload(_) | Self::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Storage(_) | Self::Pipeline(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Label for the uploads metric
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingFile => "missing_file",
            Self::MalformedUpload(_) => "malformed_upload",
            Self::InvalidImage(_) => "invalid_image",
            Self::Storage(_) => "storage_error",
            Self::Pipeline(_) => "pipeline_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        tracing::debug!("Request has no multipart body: {}", rejection);
        Self::MissingFile
    }
}

impl From<LoadImageError> for ApiError {
    fn from(err: LoadImageError) -> Self {
        match err {
            LoadImageError::Decode(e) => Self::InvalidImage(e.to_string()),
            other => Self::Storage(other.into()),
        }
    }
}
