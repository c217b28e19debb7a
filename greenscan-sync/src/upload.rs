//! Upload workflow state machine
//!
//! `Idle → ImageSelected → Uploading → {Succeeded, Failed}`
//!
//! The session only guards and records transitions. The attempt itself is
//! an [`UploadJob`]: encode → analyze → write, strictly in order, aborting on
//! the first failure. A job owns everything it needs, so it can outlive the
//! screen that started it.

use chrono::Utc;
use greenscan_common::events::{EventBus, SyncEvent, UploadState};
use greenscan_common::{Category, PlantRecord};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisService;
use crate::error::{SyncError, SyncResult};
use crate::media::{encode_data_uri, SelectedImage};
use crate::screen::Route;
use crate::store::RemoteStore;

/// What a successful attempt wrote
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub category: Category,
    pub key: String,
    pub record: PlantRecord,
}

/// Upload screen session
pub struct UploadSession {
    session_id: Uuid,
    category: Category,
    root_path: String,
    state: UploadState,
    selected_image: Option<SelectedImage>,
    error: Option<SyncError>,
    events: EventBus,
}

impl UploadSession {
    pub fn new(category: Category, root_path: impl Into<String>, events: EventBus) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            category,
            root_path: root_path.into(),
            state: UploadState::Idle,
            selected_image: None,
            error: None,
            events,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn is_uploading(&self) -> bool {
        self.state == UploadState::Uploading
    }

    pub fn selected_image(&self) -> Option<&SelectedImage> {
        self.selected_image.as_ref()
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    /// User-facing text of the current error
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(SyncError::user_message)
    }

    /// Clear the current error without changing state
    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    fn transition_to(&mut self, new_state: UploadState) {
        let old_state = self.state;
        self.state = new_state;
        info!(
            session_id = %self.session_id,
            category = %self.category,
            from = ?old_state,
            to = ?new_state,
            "Upload state changed"
        );
        self.events.emit_lossy(SyncEvent::UploadStateChanged {
            session_id: self.session_id,
            category: self.category,
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    /// Record a newly acquired image; ignored while uploading
    pub fn select_image(&mut self, image: SelectedImage) -> bool {
        if self.is_uploading() {
            warn!(session_id = %self.session_id, "Image selection ignored while uploading");
            return false;
        }
        self.selected_image = Some(image);
        self.error = None;
        self.transition_to(UploadState::ImageSelected);
        true
    }

    /// Record a failed or refused acquisition; state is unchanged
    pub fn acquisition_failed(&mut self, error: SyncError) {
        warn!(session_id = %self.session_id, error = %error, "Image acquisition failed");
        self.error = Some(error);
    }

    /// Guarded start of an attempt
    ///
    /// Returns None (no-op) while already uploading, or when nothing is
    /// selected, in which case the session reports `NoImageSelected`.
    pub fn begin_submit(&mut self) -> Option<UploadJob> {
        if self.is_uploading() {
            warn!(session_id = %self.session_id, "Submit ignored, upload already in progress");
            return None;
        }
        let Some(image) = self.selected_image.clone() else {
            self.error = Some(SyncError::NoImageSelected);
            return None;
        };

        self.error = None;
        self.transition_to(UploadState::Uploading);
        Some(UploadJob {
            session_id: self.session_id,
            category: self.category,
            key: self.category.record_key(&self.root_path),
            image,
            events: self.events.clone(),
        })
    }

    /// Apply the outcome of the attempt started by `begin_submit`
    ///
    /// Returns the navigation handoff on success.
    pub fn finish(&mut self, outcome: SyncResult<UploadReceipt>) -> Option<Route> {
        if !self.is_uploading() {
            warn!(session_id = %self.session_id, "Upload outcome ignored, no attempt in progress");
            return None;
        }
        match outcome {
            Ok(receipt) => {
                self.transition_to(UploadState::Succeeded);
                Some(Route::Details(receipt.category))
            }
            Err(e) => {
                self.error = Some(e);
                self.transition_to(UploadState::Failed);
                None
            }
        }
    }

    /// Run a whole attempt in place
    pub async fn submit(
        &mut self,
        store: &dyn RemoteStore,
        analysis: &dyn AnalysisService,
    ) -> Option<Route> {
        let job = self.begin_submit()?;
        let outcome = job.run(store, analysis).await;
        self.finish(outcome)
    }
}

/// One upload attempt, detached from the session that started it
#[derive(Debug)]
pub struct UploadJob {
    session_id: Uuid,
    category: Category,
    key: String,
    image: SelectedImage,
    events: EventBus,
}

impl UploadJob {
    pub fn category(&self) -> Category {
        self.category
    }

    pub async fn run(
        self,
        store: &dyn RemoteStore,
        analysis: &dyn AnalysisService,
    ) -> SyncResult<UploadReceipt> {
        let image_data = encode_data_uri(&self.image).await.map_err(|e| {
            error!(session_id = %self.session_id, path = %self.image.path.display(), error = %e, "Error reading image file");
            SyncError::EncodingFailed(e.to_string())
        })?;

        let result = analysis
            .analyze(self.category, &image_data)
            .await
            .map_err(|e| {
                error!(session_id = %self.session_id, error = %e, "Error processing image");
                SyncError::from(e)
            })?;

        let record = PlantRecord::completed(self.category, image_data, result.analysis.clone());
        let value = serde_json::to_value(&record)
            .map_err(|e| SyncError::StoreWriteFailed(e.to_string()))?;
        store.set(&self.key, value).await.map_err(|e| {
            error!(session_id = %self.session_id, key = %self.key, error = %e, "Analysis lost, record not saved");
            SyncError::StoreWriteFailed(e.to_string())
        })?;

        info!(session_id = %self.session_id, key = %self.key, "Record saved");
        self.events.emit_lossy(SyncEvent::UploadCompleted {
            session_id: self.session_id,
            category: self.category,
            analysis: result.analysis,
            timestamp: Utc::now(),
        });

        Ok(UploadReceipt {
            category: self.category,
            key: self.key,
            record,
        })
    }

    /// Run on its own task; dropping the handle does not cancel it
    pub fn spawn(
        self,
        store: Arc<dyn RemoteStore>,
        analysis: Arc<dyn AnalysisService>,
    ) -> JoinHandle<SyncResult<UploadReceipt>> {
        tokio::spawn(async move { self.run(store.as_ref(), analysis.as_ref()).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_without_image_reports_error() {
        let mut session = UploadSession::new(Category::Tomato, "plant_info", EventBus::new(10));
        assert!(session.begin_submit().is_none());
        assert_eq!(session.state(), UploadState::Idle);
        assert_eq!(session.error(), Some(&SyncError::NoImageSelected));
        assert_eq!(
            session.error_message().as_deref(),
            Some("Please select an image first")
        );
    }

    #[test]
    fn test_double_submit_is_noop() {
        let mut session = UploadSession::new(Category::Tomato, "plant_info", EventBus::new(10));
        session.select_image(SelectedImage::new("/tmp/leaf.jpg"));
        let job = session.begin_submit();
        assert!(job.is_some());
        assert!(session.is_uploading());
        assert!(session.begin_submit().is_none());
        assert!(session.error().is_none());
    }

    #[test]
    fn test_selection_ignored_while_uploading() {
        let mut session = UploadSession::new(Category::Mango, "plant_info", EventBus::new(10));
        session.select_image(SelectedImage::new("/tmp/a.jpg"));
        let _job = session.begin_submit().unwrap();
        assert!(!session.select_image(SelectedImage::new("/tmp/b.jpg")));
        assert_eq!(session.selected_image(), Some(&SelectedImage::new("/tmp/a.jpg")));
    }

    #[test]
    fn test_failure_keeps_image_and_reselect_clears_error() {
        let mut session = UploadSession::new(Category::Mango, "plant_info", EventBus::new(10));
        session.select_image(SelectedImage::new("/tmp/a.jpg"));
        session.begin_submit().unwrap();
        assert!(session
            .finish(Err(SyncError::ServiceFailed("down".into())))
            .is_none());
        assert_eq!(session.state(), UploadState::Failed);
        assert!(session.selected_image().is_some());
        assert_eq!(session.error_message().as_deref(), Some("down"));

        session.select_image(SelectedImage::new("/tmp/b.jpg"));
        assert_eq!(session.state(), UploadState::ImageSelected);
        assert!(session.error().is_none());
    }

    #[test]
    fn test_acquisition_failure_keeps_state() {
        let mut session = UploadSession::new(Category::Banana, "plant_info", EventBus::new(10));
        session.acquisition_failed(SyncError::PermissionDenied(crate::media::MediaKind::Camera));
        assert_eq!(session.state(), UploadState::Idle);
        assert!(session.error().is_some());
    }

    #[test]
    fn test_finish_without_attempt_ignored() {
        let mut session = UploadSession::new(Category::Banana, "plant_info", EventBus::new(10));
        assert!(session.finish(Err(SyncError::NoImageSelected)).is_none());
        assert_eq!(session.state(), UploadState::Idle);
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_transitions_published() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let mut session = UploadSession::new(Category::Banana, "plant_info", bus);
        session.select_image(SelectedImage::new("/tmp/a.jpg"));

        match rx.recv().await.unwrap() {
            SyncEvent::UploadStateChanged {
                old_state,
                new_state,
                session_id,
                ..
            } => {
                assert_eq!(old_state, UploadState::Idle);
                assert_eq!(new_state, UploadState::ImageSelected);
                assert_eq!(session_id, session.session_id());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
