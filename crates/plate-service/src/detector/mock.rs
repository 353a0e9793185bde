/// Detector returning canned boxes, for tests and local runs without models
use super::ObjectDetector;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::plates::BoundingBox;
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

enum Script {
    /// Same boxes on every call
    Repeat(Vec<BoundingBox>),
    /// One entry per call, empty once exhausted
    Sequence(Mutex<VecDeque<Vec<BoundingBox>>>),
    Fail(String),
}

pub struct StaticDetector {
    label: String,
    script: Script,
    calls: AtomicUsize,
    seen_sizes: Mutex<Vec<(u32, u32)>>,
}

impl StaticDetector {
    /// Return `boxes` for every image
    pub fn new(label: impl Into<String>, boxes: Vec<BoundingBox>) -> Self {
        Self::with_script(label, Script::Repeat(boxes))
    }

    /// Return an empty result for every image
    pub fn empty(label: impl Into<String>) -> Self {
        Self::new(label, Vec::new())
    }

    /// Return `responses[n]` on the n-th call, then nothing
    pub fn scripted(label: impl Into<String>, responses: Vec<Vec<BoundingBox>>) -> Self {
        Self::with_script(label, Script::Sequence(Mutex::new(responses.into())))
    }

    /// Fail every call with `message`
    pub fn failing(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_script(label, Script::Fail(message.into()))
    }

    fn with_script(label: impl Into<String>, script: Script) -> Self {
        Self {
            label: label.into(),
            script,
            calls: AtomicUsize::new(0),
            seen_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Number of `detect` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Dimensions of every image passed to `detect`, in call order
    pub fn seen_sizes(&self) -> Vec<(u32, u32)> {
        self.seen_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectDetector for StaticDetector {
    fn label(&self) -> &str {
        &self.label
    }

    async fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.seen_sizes.lock() {
            sizes.push((image.width(), image.height()));
        }

        match &self.script {
            Script::Repeat(boxes) => Ok(boxes.clone()),
            Script::Sequence(queue) => {
                let mut queue = queue
                    .lock()
                    .map_err(|e| anyhow!("Failed to lock detector script: {}", e))?;
                Ok(queue.pop_front().unwrap_or_default())
            }
            Script::Fail(message) => Err(anyhow!("{} detector failed: {}", self.label, message)),
        }
    }
}
