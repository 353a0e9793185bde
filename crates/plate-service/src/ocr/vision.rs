/// Cloud Vision `images:annotate` client performing TEXT_DETECTION
use super::credentials::VisionAuth;
use super::{encode_jpeg, TextRecognizer};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    feature_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnnotateResponse {
    #[serde(default)]
    pub responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateImageResponse {
    #[serde(default)]
    pub text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    pub error: Option<ServiceStatus>,
}

/// One recognized text region. The first annotation covers all text in the
/// image; the following ones are individual words.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnnotation {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoundingPoly {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Pick the primary text out of an annotate response.
///
/// Takes the first annotation only, with line breaks removed and outer
/// whitespace trimmed. A per-image `error` is a failure.
pub fn primary_text(response: AnnotateResponse) -> Result<Option<String>> {
    let Some(first) = response.responses.into_iter().next() else {
        return Ok(None);
    };

    if let Some(status) = first.error {
        return Err(anyhow!(
            "Vision API error {}: {}",
            status.code,
            status.message
        ));
    }

    let text = first
        .text_annotations
        .into_iter()
        .next()
        .map(|annotation| annotation.description.replace(['\n', '\r'], "").trim().to_string())
        .filter(|text| !text.is_empty());

    Ok(text)
}

pub struct GoogleVisionClient {
    http: reqwest::Client,
    endpoint: String,
    auth: VisionAuth,
}

impl GoogleVisionClient {
    pub fn new(endpoint: impl Into<String>, auth: VisionAuth, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OCR HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            auth,
        })
    }

    async fn annotate(&self, jpeg: &[u8]) -> Result<AnnotateResponse> {
        let body = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: base64::prelude::BASE64_STANDARD.encode(jpeg),
                },
                features: vec![Feature {
                    feature_type: "TEXT_DETECTION",
                }],
            }],
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        request = match &self.auth {
            VisionAuth::ApiKey(key) => request.query(&[("key", key)]),
            VisionAuth::ServiceAccount(source) => {
                request.bearer_auth(source.access_token(&self.http).await?)
            }
        };

        let response = request.send().await.context("Vision API request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Vision API returned {}: {}", status, body));
        }

        response
            .json::<AnnotateResponse>()
            .await
            .context("Invalid Vision API response")
    }
}

#[async_trait]
impl TextRecognizer for GoogleVisionClient {
    async fn recognize_text(&self, image: &DynamicImage) -> Result<Option<String>> {
        let image = image.clone();
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&image))
            .await
            .context("JPEG encoding task panicked")??;

        let result = match self.annotate(&jpeg).await {
            Ok(response) => primary_text(response),
            Err(e) => Err(e),
        };

        let status = match &result {
            Ok(Some(_)) => "text",
            Ok(None) => "empty",
            Err(_) => "error",
        };
        telemetry::metrics::PLATE_SERVICE_OCR_REQUESTS
            .with_label_values(&[status])
            .inc();

        result
    }
}
