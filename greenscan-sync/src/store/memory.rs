//! In-process remote store
//!
//! Same observable semantics as the realtime database: snapshots on open
//! and after each write, server timestamps resolved on write, last write
//! wins. Failure switches let tests exercise the error paths.

use super::tree::resolve_server_values;
use super::{RemoteStore, Snapshot, SnapshotStream, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum Change {
    Updated(String),
    Failed { key: String, reason: String },
}

struct Inner {
    records: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<Change>,
    failing_writes: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
    writes: AtomicUsize,
    subscriptions_opened: AtomicUsize,
}

/// Cloning shares the underlying store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                changes,
                failing_writes: AtomicBool::new(false),
                failing_keys: Mutex::new(HashSet::new()),
                writes: AtomicUsize::new(0),
                subscriptions_opened: AtomicUsize::new(0),
            }),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn failing_keys(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner
            .failing_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current value at `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.records().get(key).cloned()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of subscriptions opened so far (including failed ones)
    pub fn subscriptions_opened(&self) -> usize {
        self.inner.subscriptions_opened.load(Ordering::SeqCst)
    }

    /// Number of live subscription streams
    pub fn live_subscriptions(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    /// Make every subsequent `set` fail
    pub fn fail_writes(&self, fail: bool) {
        self.inner.failing_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail live subscriptions on `key` and every new one until cleared
    pub fn fail_subscriptions(&self, key: &str, reason: &str) {
        self.failing_keys().insert(key.to_string());
        let _ = self.inner.changes.send(Change::Failed {
            key: key.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn clear_subscription_failure(&self, key: &str) {
        self.failing_keys().remove(key);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe(&self, key: &str) -> Result<SnapshotStream, StoreError> {
        self.inner.subscriptions_opened.fetch_add(1, Ordering::SeqCst);
        let key = key.to_string();

        if self.failing_keys().contains(&key) {
            let reason = format!("permission denied at {}", key);
            let stream = futures::stream::once(async move { Err(StoreError::Rejected(reason)) });
            return Ok(Box::pin(stream));
        }

        // subscribe before reading so no write falls between the two
        let mut rx = self.inner.changes.subscribe();
        let store = self.clone();

        let stream = async_stream::stream! {
            yield Ok(Snapshot::new(key.clone(), store.get(&key).unwrap_or(Value::Null)));

            loop {
                match rx.recv().await {
                    Ok(Change::Updated(changed)) if changed == key => {
                        yield Ok(Snapshot::new(key.clone(), store.get(&key).unwrap_or(Value::Null)));
                    }
                    Ok(Change::Failed { key: failed, reason }) if failed == key => {
                        yield Err(StoreError::Rejected(reason));
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(key = %key, skipped, "Subscriber lagged, re-reading current value");
                        yield Ok(Snapshot::new(key.clone(), store.get(&key).unwrap_or(Value::Null)));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn set(&self, key: &str, mut value: Value) -> Result<(), StoreError> {
        if self.inner.failing_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!("write to {} denied", key)));
        }

        resolve_server_values(&mut value, chrono::Utc::now().timestamp_millis());
        {
            let mut records = self.records();
            if value.is_null() {
                records.remove(key);
            } else {
                records.insert(key.to_string(), value);
            }
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let _ = self.inner.changes.send(Change::Updated(key.to_string()));
        Ok(())
    }
}
