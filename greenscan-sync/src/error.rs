//! Error types for greenscan-sync
//!
//! Adapter errors (`StoreError`, `AnalysisError`, `MediaError`) stay close to
//! their transport. They are converted into [`SyncError`] where the
//! workflow meets the screens; every `SyncError` is recoverable at screen
//! level and carries a user-facing message.

use crate::media::MediaKind;
use greenscan_common::Category;
use thiserror::Error;

/// Result type for workflow operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Screen-level error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Submit pressed with nothing selected
    #[error("No image selected")]
    NoImageSelected,

    /// Media or camera access refused
    #[error("Permission denied for {0}")]
    PermissionDenied(MediaKind),

    /// Picker or camera reported an error
    #[error("{kind} acquisition failed: {reason}")]
    AcquisitionFailed { kind: MediaKind, reason: String },

    /// Selected image could not be read or encoded
    #[error("Failed to read image: {0}")]
    EncodingFailed(String),

    /// Analysis call failed or returned an unusable response
    #[error("{0}")]
    ServiceFailed(String),

    /// Analysis succeeded but the record could not be written
    #[error("Failed to save result: {0}")]
    StoreWriteFailed(String),

    /// Live subscription for one category failed
    #[error("Subscription for {category} failed: {reason}")]
    SubscriptionFailed { category: Category, reason: String },
}

impl SyncError {
    /// Message shown to the user next to the retry/dismiss action
    pub fn user_message(&self) -> String {
        match self {
            SyncError::NoImageSelected => "Please select an image first".to_string(),
            SyncError::PermissionDenied(MediaKind::Camera) => {
                "Please grant camera permissions to take photos".to_string()
            }
            SyncError::PermissionDenied(MediaKind::Gallery) => {
                "Please grant camera roll permissions to upload images".to_string()
            }
            SyncError::AcquisitionFailed { kind: MediaKind::Camera, .. } => {
                "Failed to take photo. Please try again.".to_string()
            }
            SyncError::AcquisitionFailed { kind: MediaKind::Gallery, .. } => {
                "Failed to pick image. Please try again.".to_string()
            }
            SyncError::EncodingFailed(_) => "Failed to read image file. Please try again.".to_string(),
            SyncError::ServiceFailed(message) => message.clone(),
            SyncError::StoreWriteFailed(_) => {
                "Failed to save result. The analysis was lost; please upload the image again."
                    .to_string()
            }
            SyncError::SubscriptionFailed { category, .. } => format!(
                "Failed to fetch {} data. Please check your connection and try again.",
                category
            ),
        }
    }

    /// True when a completed analysis was discarded
    pub fn analysis_lost(&self) -> bool {
        matches!(self, SyncError::StoreWriteFailed(_))
    }
}
