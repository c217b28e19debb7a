//! Image acquisition and encoding
//!
//! [`MediaSource`] stands in for the device picker/camera. Encoding turns a
//! selected image into the data URI carried by analysis requests and
//! store records.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::error::SyncError;

/// MIME type used when the bytes are not a recognised image format
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Camera,
    Gallery,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Camera => f.write_str("camera"),
            MediaKind::Gallery => f.write_str("gallery"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Reference to an acquired image; bytes are read only at encode time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    pub path: PathBuf,
}

impl SelectedImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Media source errors
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Permission denied for {0}")]
    PermissionDenied(MediaKind),

    #[error("{kind} acquisition failed: {reason}")]
    AcquisitionFailed { kind: MediaKind, reason: String },
}

impl From<MediaError> for SyncError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied(kind) => SyncError::PermissionDenied(kind),
            MediaError::AcquisitionFailed { kind, reason } => {
                SyncError::AcquisitionFailed { kind, reason }
            }
        }
    }
}

/// Device picker/camera capability
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Ask for access to the camera or the photo library
    async fn request_permission(&self, kind: MediaKind) -> PermissionStatus;

    /// Acquire an image; `Ok(None)` means the user cancelled
    async fn acquire(&self, kind: MediaKind) -> Result<Option<SelectedImage>, MediaError>;
}

/// Media source backed by a file on disk (both kinds resolve the same path)
pub struct FileMediaSource {
    path: PathBuf,
}

impl FileMediaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MediaSource for FileMediaSource {
    async fn request_permission(&self, kind: MediaKind) -> PermissionStatus {
        match tokio::fs::File::open(&self.path).await {
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %self.path.display(), %kind, "Read access denied");
                PermissionStatus::Denied
            }
            _ => PermissionStatus::Granted,
        }
    }

    async fn acquire(&self, kind: MediaKind) -> Result<Option<SelectedImage>, MediaError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => MediaError::PermissionDenied(kind),
            _ => MediaError::AcquisitionFailed {
                kind,
                reason: format!("{}: {}", self.path.display(), e),
            },
        })?;

        if !metadata.is_file() {
            return Err(MediaError::AcquisitionFailed {
                kind,
                reason: format!("{} is not a file", self.path.display()),
            });
        }

        Ok(Some(SelectedImage::new(self.path.clone())))
    }
}

/// Read the image and encode it as `data:<mime>;base64,<payload>`
pub async fn encode_data_uri(image: &SelectedImage) -> std::io::Result<String> {
    let bytes = tokio::fs::read(&image.path).await?;
    data_uri_from_bytes(&bytes).ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidData, "image file is empty")
    })
}

/// Encode raw image bytes; `None` for an empty buffer
pub fn data_uri_from_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let mime = infer::get(bytes)
        .filter(|t| t.matcher_type() == infer::MatcherType::Image)
        .map(|t| t.mime_type())
        .unwrap_or(DEFAULT_IMAGE_MIME);
    Some(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}
