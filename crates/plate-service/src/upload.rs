//! Filesystem side of an upload: where the incoming photo and the annotated
//! result are written.
//!
//! By default every request gets its own working file (removed when the
//! request ends, whatever the outcome) and its own result file, so
//! concurrent uploads cannot clobber each other. Legacy mode reproduces the
//! historical fixed paths, where the last writer wins.
//!
//! Per-request results are pruned down to the newest `keep_results` files
//! after each upload.

use anyhow::{Context, Result};
use axum::body::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub const LEGACY_FILENAME: &str = "imagem_atual.jpg";
pub const RESULT_PREFIX: &str = "resultado_";
pub const DEFAULT_KEEP_RESULTS: usize = 20;

#[derive(Debug, Error)]
pub enum LoadImageError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] image::ImageError),

    #[error("Image decoding task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The persisted copy of one upload
pub enum WorkingFile {
    /// Unique per request, deleted on drop
    Scoped(NamedTempFile),
    /// Shared fixed path, overwritten by every request
    Shared(PathBuf),
}

impl WorkingFile {
    pub fn path(&self) -> &Path {
        match self {
            Self::Scoped(file) => file.path(),
            Self::Shared(path) => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    legacy_paths: bool,
    keep_results: usize,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, legacy_paths: bool) -> Self {
        Self {
            dir: dir.into(),
            legacy_paths,
            keep_results: DEFAULT_KEEP_RESULTS,
        }
    }

    /// Keep at most `keep` per-request result images; 0 keeps them all
    pub fn with_keep_results(mut self, keep: usize) -> Self {
        self.keep_results = keep;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the upload directory if it does not exist yet
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create upload directory {}", self.dir.display()))
    }

    /// Write the uploaded bytes to this request's working path
    pub async fn persist(&self, data: Bytes) -> Result<WorkingFile> {
        if self.legacy_paths {
            let path = self.dir.join(LEGACY_FILENAME);
            tokio::fs::write(&path, &data)
                .await
                .with_context(|| format!("Failed to write upload to {}", path.display()))?;
            return Ok(WorkingFile::Shared(path));
        }

        let dir = self.dir.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix("upload_")
                .suffix(".img")
                .tempfile_in(&dir)
                .with_context(|| format!("Failed to create working file in {}", dir.display()))?;
            file.write_all(&data).context("Failed to write upload")?;
            file.flush().context("Failed to write upload")?;
            Ok(file)
        })
        .await
        .context("Upload write task panicked")??;

        Ok(WorkingFile::Scoped(file))
    }

    /// Where this request's annotated image goes
    pub fn result_path(&self) -> PathBuf {
        if self.legacy_paths {
            self.dir.join(format!("{}{}", RESULT_PREFIX, LEGACY_FILENAME))
        } else {
            self.dir
                .join(format!("{}{}.jpg", RESULT_PREFIX, Uuid::new_v4().simple()))
        }
    }

    /// Delete the oldest per-request result images beyond `keep_results`.
    ///
    /// `current` is the result just written for this request and is never
    /// removed. Returns the number of files deleted.
    pub async fn prune_results(&self, current: &Path) -> Result<usize> {
        if self.legacy_paths || self.keep_results == 0 {
            return Ok(0);
        }

        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read upload directory {}", self.dir.display()))?;

        let mut results: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.as_path() == current || !is_scoped_result(&path) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(time) => time,
                Err(e) => {
                    warn!("Failed to get modified time for {:?}: {}", path, e);
                    continue;
                }
            };
            results.push((modified, path));
        }

        // Newest first; `current` already takes one of the slots
        results.sort_by(|a, b| b.cmp(a));
        let mut deleted = 0;
        for (_, path) in results.into_iter().skip(self.keep_results - 1) {
            match fs::remove_file(&path).await {
                Ok(_) => {
                    debug!("Pruned old result image {:?}", path);
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete old result image {:?}: {}", path, e),
            }
        }

        Ok(deleted)
    }
}

fn is_scoped_result(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| {
            name.starts_with(RESULT_PREFIX)
                && name.ends_with(".jpg")
                && name != format!("{}{}", RESULT_PREFIX, LEGACY_FILENAME)
        })
        .unwrap_or(false)
}

/// Decode the image stored at `path`, whatever its extension says
pub async fn load_image(path: &Path) -> Result<DynamicImage, LoadImageError> {
    let data = fs::read(path).await.map_err(|source| LoadImageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&data)).await??;
    Ok(image)
}

/// Save the annotated image as JPEG
pub async fn write_result(path: PathBuf, image: RgbImage) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to write result image {}", path.display()))
    })
    .await
    .context("Result write task panicked")?
}
