//! greenscan-sync library interface
//!
//! Client-side synchronisation for plant health analyses: live per-category
//! subscriptions to the remote store, the image upload workflow, and the
//! headless screens built on them.

pub mod analysis;
pub mod error;
pub mod media;
pub mod reconciler;
pub mod screen;
pub mod store;
pub mod subscription;
pub mod upload;

pub use crate::error::{SyncError, SyncResult};

use greenscan_common::config::TomlConfig;
use greenscan_common::events::EventBus;
use greenscan_common::{Category, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::analysis::{AnalysisService, HttpAnalysisClient};
use crate::store::{FirebaseStore, MemoryStore, RemoteStore};

/// Event bus capacity
const EVENT_CAPACITY: usize = 100;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<TomlConfig>,
    pub event_bus: EventBus,
    pub store: Arc<dyn RemoteStore>,
    pub analysis: Arc<dyn AnalysisService>,
}

impl AppContext {
    /// Wire up adapters from a loaded configuration
    ///
    /// `offline` swaps the realtime database for an in-process store; the
    /// analysis backend is still used.
    pub fn from_config(config: TomlConfig, offline: bool) -> Result<Self> {
        let event_bus = EventBus::new(EVENT_CAPACITY);

        let store: Arc<dyn RemoteStore> = if offline {
            info!("Offline mode: using in-process store");
            Arc::new(MemoryStore::new())
        } else {
            let url = config.store.database_url.as_deref().ok_or_else(|| {
                Error::Config("store.database_url is required (or run with --offline)".to_string())
            })?;
            info!("Realtime database: {}", url);
            Arc::new(
                FirebaseStore::new(
                    url,
                    Duration::from_millis(config.store.reconnect_delay_ms),
                    event_bus.clone(),
                )
                .map_err(|e| Error::Config(e.to_string()))?,
            )
        };

        let backend_url = config.backend_url()?;
        info!("Analysis backend: {} ({:?})", backend_url, config.environment);
        let analysis: Arc<dyn AnalysisService> = Arc::new(
            HttpAnalysisClient::new(backend_url, Duration::from_secs(config.backend.timeout_secs))
                .map_err(|e| Error::Config(e.to_string()))?,
        );

        Ok(Self::new(config, event_bus, store, analysis))
    }

    pub fn new(
        config: TomlConfig,
        event_bus: EventBus,
        store: Arc<dyn RemoteStore>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            event_bus,
            store,
            analysis,
        }
    }

    pub fn root_path(&self) -> &str {
        &self.config.store.root_path
    }

    /// Tracked categories in display order
    pub fn categories(&self) -> &[Category] {
        &self.config.categories
    }
}
