//! Headless screens
//!
//! A screen owns its resources for as long as it is shown: a [`LiveScreen`]
//! owns one subscription per displayed category, an [`UploadScreen`] owns
//! its upload session. Leaving a screen (or dropping it) releases them.

use chrono::{DateTime, Local, Utc};
use greenscan_common::events::EventBus;
use greenscan_common::Category;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisService;
use crate::error::SyncError;
use crate::media::{MediaKind, MediaSource, PermissionStatus};
use crate::reconciler::{reduce, ViewEvent, ViewState};
use crate::store::RemoteStore;
use crate::subscription::SubscriptionManager;
use crate::upload::UploadSession;

/// Navigation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", content = "category", rename_all = "lowercase")]
pub enum Route {
    Home,
    Details(Category),
    Upload(Category),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Home => f.write_str("home"),
            Route::Details(c) => write!(f, "details/{}", c),
            Route::Upload(c) => write!(f, "upload/{}", c),
        }
    }
}

/// "Tomato Analysis"
pub fn card_title(category: Category) -> String {
    format!("{} Analysis", category.title())
}

/// "Tomato Health Analysis"
pub fn details_title(category: Category) -> String {
    format!("{} Health Analysis", category.title())
}

/// Banner text on the details screen when its category cannot be loaded
pub const DETAILS_LOAD_FAILED: &str =
    "Failed to load plant data. Please check your connection and try again.";

/// Local time of the last update, or "Never"
pub fn format_last_updated(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "Never".to_string(),
    }
}

/// Home or details screen over live category data
pub struct LiveScreen {
    route: Route,
    manager: SubscriptionManager,
    state: ViewState,
    /// Categories that have delivered at least once (data or error)
    delivered: BTreeSet<Category>,
}

impl LiveScreen {
    /// Home screen: one card per tracked category
    pub fn home(
        store: Arc<dyn RemoteStore>,
        root_path: &str,
        categories: &[Category],
    ) -> Self {
        Self::enter(Route::Home, store, root_path, categories)
    }

    /// Details screen for one category
    pub fn details(store: Arc<dyn RemoteStore>, root_path: &str, category: Category) -> Self {
        Self::enter(Route::Details(category), store, root_path, &[category])
    }

    fn enter(
        route: Route,
        store: Arc<dyn RemoteStore>,
        root_path: &str,
        categories: &[Category],
    ) -> Self {
        let mut manager = SubscriptionManager::new(store, root_path);
        manager.subscribe_all(categories);
        info!(route = %route, categories = categories.len(), "Entered screen");
        Self {
            route,
            manager,
            state: ViewState::new(categories),
            delivered: BTreeSet::new(),
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// Live subscriptions held by this screen
    pub fn subscription_count(&self) -> usize {
        self.manager.active_count()
    }

    /// Wait for the next delivery and fold it into the view state
    ///
    /// Returns None once the screen holds no live subscription.
    pub async fn next_state(&mut self) -> Option<&ViewState> {
        let update = self.manager.next_update().await?;
        self.delivered.insert(update.category);
        let event = match update.result {
            Ok(entity) => ViewEvent::SnapshotReceived {
                category: update.category,
                entity,
            },
            Err(e) => ViewEvent::SnapshotError {
                category: update.category,
                message: self.error_message(&e),
            },
        };
        self.state = reduce(&self.state, event);
        Some(&self.state)
    }

    fn error_message(&self, error: &SyncError) -> String {
        match (self.route, error) {
            (Route::Details(_), SyncError::SubscriptionFailed { .. }) => {
                DETAILS_LOAD_FAILED.to_string()
            }
            _ => error.user_message(),
        }
    }

    /// True once every displayed category has delivered
    pub fn is_settled(&self) -> bool {
        self.state
            .categories()
            .all(|category| self.delivered.contains(&category))
    }

    /// Clear the error and re-subscribe every displayed category
    pub fn retry(&mut self) -> &ViewState {
        self.state = reduce(&self.state, ViewEvent::RetryRequested);
        self.manager.sync_generation(self.state.generation);
        &self.state
    }

    /// Hide the error banner; subscriptions are left as they are
    pub fn dismiss_error(&mut self) -> &ViewState {
        self.state = reduce(&self.state, ViewEvent::ErrorDismissed);
        &self.state
    }

    /// Where "Upload New Image" leads; only the details screen offers it
    pub fn upload_route(&self) -> Option<Route> {
        match self.route {
            Route::Details(category) => Some(Route::Upload(category)),
            _ => None,
        }
    }

    /// Release every subscription
    pub fn leave(mut self) {
        self.manager.release_all();
        info!(route = %self.route, "Left screen");
    }
}

/// Upload screen for one category
pub struct UploadScreen {
    session: UploadSession,
    media: Arc<dyn MediaSource>,
}

impl UploadScreen {
    pub fn enter(
        category: Category,
        root_path: &str,
        media: Arc<dyn MediaSource>,
        events: EventBus,
    ) -> Self {
        let session = UploadSession::new(category, root_path, events);
        info!(route = %Route::Upload(category), session_id = %session.session_id(), "Entered screen");
        Self { session, media }
    }

    pub fn route(&self) -> Route {
        Route::Upload(self.session.category())
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Hide the current error; the upload state does not change
    pub fn dismiss_error(&mut self) {
        self.session.dismiss_error();
    }

    /// Ask for permission, then acquire an image from camera or gallery
    ///
    /// Returns true when a new image was selected. Refusals and failures are
    /// recorded on the session; a user cancel changes nothing.
    pub async fn pick_image(&mut self, kind: MediaKind) -> bool {
        if self.session.is_uploading() {
            debug!(%kind, "Image pick ignored while uploading");
            return false;
        }

        if self.media.request_permission(kind).await == PermissionStatus::Denied {
            self.session
                .acquisition_failed(SyncError::PermissionDenied(kind));
            return false;
        }

        match self.media.acquire(kind).await {
            Ok(Some(image)) => self.session.select_image(image),
            Ok(None) => {
                debug!(%kind, "Image pick cancelled");
                false
            }
            Err(e) => {
                self.session.acquisition_failed(e.into());
                false
            }
        }
    }

    /// Run one upload attempt; the navigation handoff on success
    ///
    /// The attempt runs on its own task and completes even if this screen
    /// is dropped while it is in flight.
    pub async fn submit(
        &mut self,
        store: Arc<dyn RemoteStore>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Option<Route> {
        let job = self.session.begin_submit()?;
        let outcome = match job.spawn(store, analysis).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Upload task did not complete");
                Err(SyncError::ServiceFailed(format!("Upload interrupted: {}", e)))
            }
        };
        self.session.finish(outcome)
    }

    pub fn leave(self) {
        if self.session.is_uploading() {
            warn!(session_id = %self.session.session_id(), "Leaving upload screen with an upload in flight");
        }
        info!(route = %self.route(), "Left screen");
    }
}
