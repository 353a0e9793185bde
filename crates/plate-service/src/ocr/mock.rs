/// Recognizer returning canned text, for tests and local runs without credentials
use super::TextRecognizer;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct StaticRecognizer {
    responses: Mutex<VecDeque<Option<String>>>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticRecognizer {
    /// Answer the n-th call with `responses[n]`, then `None`
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(Into::into))
                    .collect(),
            ),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            failure: Some(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `recognize_text` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextRecognizer for StaticRecognizer {
    async fn recognize_text(&self, _image: &DynamicImage) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            return Err(anyhow!("OCR request failed: {}", message));
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|e| anyhow!("Failed to lock OCR script: {}", e))?;
        Ok(responses.pop_front().flatten())
    }
}
