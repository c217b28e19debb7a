//! Event types for the GreenScan event system
//!
//! Components publish on a shared [`EventBus`]; front ends subscribe to
//! render progress. Events are notifications only: screen state is owned by
//! the screens and never rebuilt from the bus.

use crate::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upload workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// No image selected
    Idle,
    /// Image acquired, waiting for submit
    ImageSelected,
    /// Encode → analyze → write in progress
    Uploading,
    /// Record written, navigation handed off
    Succeeded,
    /// Attempt aborted; image kept, error shown
    Failed,
}

/// Store connection state as seen by a live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// GreenScan event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Live stream for a store key opened or dropped
    ConnectionStatus {
        key: String,
        state: ConnectionState,
        timestamp: DateTime<Utc>,
    },

    /// Upload session changed state
    UploadStateChanged {
        session_id: Uuid,
        category: Category,
        old_state: UploadState,
        new_state: UploadState,
        timestamp: DateTime<Utc>,
    },

    /// Analysis returned and the record was written
    UploadCompleted {
        session_id: Uuid,
        category: Category,
        analysis: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`SyncEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
