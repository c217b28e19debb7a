//! Remote store capability
//!
//! A keyed document store with per-key push notifications. Keys are slash
//! separated paths (`plant_info/tomato`); values are JSON. A subscription
//! yields the full value of its key once on open and again after every
//! change, in the order the store emits them.

pub mod firebase;
pub mod memory;
pub mod sse;
pub mod tree;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// Point-in-time value of a key; `value` is None when the key does not exist
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: String,
    pub value: Option<Value>,
}

impl Snapshot {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        let value = if value.is_null() { None } else { Some(value) };
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

/// Store client errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Store error {0}: {1}")]
    Api(u16, String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server ended the subscription (cancel, auth revoked)
    #[error("Subscription cancelled by server: {0}")]
    Cancelled(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Live snapshot stream; an `Err` item ends the subscription
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;

/// Keyed document store with push notifications
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a live subscription on `key`
    async fn subscribe(&self, key: &str) -> Result<SnapshotStream, StoreError>;

    /// Replace the value at `key` (last write wins, no merge)
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}
