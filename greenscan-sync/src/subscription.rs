//! Live subscriptions per category
//!
//! Each subscription is a spawned task forwarding mapped snapshots into the
//! manager's channel. A [`SubscriptionHandle`] cancels its task when
//! released or dropped, so a manager (and the screen owning it) can never
//! leak listeners. Updates are tagged with the subscription id; anything
//! from a released subscription is discarded on receipt.

use futures::{Stream, StreamExt};
use greenscan_common::entity::map_snapshot;
use greenscan_common::{Category, TrackedEntity};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::RemoteStore;

/// Mapped entity stream for one category; ends after the first error
pub fn watch(
    store: Arc<dyn RemoteStore>,
    category: Category,
    root_path: String,
) -> impl Stream<Item = Result<TrackedEntity, SyncError>> + Send + 'static {
    async_stream::stream! {
        let key = category.record_key(&root_path);
        let mut snapshots = match store.subscribe(&key).await {
            Ok(stream) => stream,
            Err(e) => {
                yield Err(SyncError::SubscriptionFailed { category, reason: e.to_string() });
                return;
            }
        };

        while let Some(item) = snapshots.next().await {
            match item {
                Ok(snapshot) => yield Ok(map_snapshot(category, snapshot.value.as_ref())),
                Err(e) => {
                    yield Err(SyncError::SubscriptionFailed { category, reason: e.to_string() });
                    break;
                }
            }
        }
    }
}

/// One delivery from a live subscription
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub subscription_id: Uuid,
    pub generation: u64,
    pub category: Category,
    pub result: Result<TrackedEntity, SyncError>,
}

/// Owned live subscription; cancelled on release or drop
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Uuid,
    category: Category,
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop delivery now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
        debug!(
            category = %self.category,
            id = %self.id,
            generation = self.generation,
            "Subscription released"
        );
    }
}

/// Tracks at most one live subscription per category
///
/// Categories keep the order they were first subscribed in.
pub struct SubscriptionManager {
    store: Arc<dyn RemoteStore>,
    root_path: String,
    handles: Vec<SubscriptionHandle>,
    generation: u64,
    tx: mpsc::UnboundedSender<SubscriptionUpdate>,
    rx: mpsc::UnboundedReceiver<SubscriptionUpdate>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn RemoteStore>, root_path: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            root_path: root_path.into(),
            handles: Vec::new(),
            generation: 0,
            tx,
            rx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }

    /// Tracked categories in subscription order
    pub fn categories(&self) -> Vec<Category> {
        self.handles.iter().map(|h| h.category).collect()
    }

    fn handle_for(&self, category: Category) -> Option<&SubscriptionHandle> {
        self.handles.iter().find(|h| h.category == category)
    }

    /// Start a live subscription, replacing any existing one for `category`
    ///
    /// A replaced subscription keeps its place in the order.
    pub fn subscribe(&mut self, category: Category) -> Uuid {

        let id = Uuid::new_v4();
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.tx.clone();
        let stream = watch(self.store.clone(), category, self.root_path.clone());

        let task = tokio::spawn(async move {
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(result) => {
                            let update = SubscriptionUpdate {
                                subscription_id: id,
                                generation,
                                category,
                                result,
                            };
                            if tx.send(update).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        info!(category = %category, generation, "Subscribed");
        let handle = SubscriptionHandle {
            id,
            category,
            generation,
            cancel,
            task,
        };
        match self.handles.iter_mut().find(|h| h.category == category) {
            Some(slot) => std::mem::replace(slot, handle).release(),
            None => self.handles.push(handle),
        }
        id
    }

    pub fn subscribe_all(&mut self, categories: &[Category]) {
        for &category in categories {
            self.subscribe(category);
        }
    }

    /// Release the subscription with this id; false if it is not live
    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        match self.handles.iter().position(|h| h.id == id) {
            Some(index) => {
                self.handles.remove(index).release();
                true
            }
            None => false,
        }
    }

    /// Move to `generation`, re-subscribing every tracked category
    ///
    /// Old subscriptions are released before new ones open. Returns false
    /// (and does nothing) unless `generation` is newer than the current one.
    pub fn sync_generation(&mut self, generation: u64) -> bool {
        if generation <= self.generation {
            return false;
        }
        let categories = self.categories();
        self.release_all();
        self.generation = generation;
        info!(generation, count = categories.len(), "Re-subscribing");
        self.subscribe_all(&categories);
        true
    }

    /// Bump the generation by one and re-subscribe everything
    pub fn resubscribe_all(&mut self) -> u64 {
        let next = self.generation + 1;
        self.sync_generation(next);
        next
    }

    pub fn release_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.release();
        }
    }

    /// Wait for the next update from a live subscription
    ///
    /// Returns None only if no subscription is live and none can deliver.
    pub async fn next_update(&mut self) -> Option<SubscriptionUpdate> {
        loop {
            if self.handles.is_empty() {
                // drain whatever is buffered without blocking
                match self.rx.try_recv() {
                    Ok(update) => {
                        debug!(category = %update.category, "Dropping update from released subscription");
                        continue;
                    }
                    Err(_) => return None,
                }
            }

            let update = self.rx.recv().await?;
            let live = self
                .handle_for(update.category)
                .map(|h| h.id == update.subscription_id)
                .unwrap_or(false);
            if !live {
                debug!(
                    category = %update.category,
                    generation = update.generation,
                    "Dropping stale update"
                );
                continue;
            }
            if let Err(e) = &update.result {
                warn!(category = %update.category, error = %e, "Subscription error");
                // the stream has ended; keep the slot so retry re-subscribes it
            }
            return Some(update);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            debug!(count = self.handles.len(), "Releasing subscriptions");
        }
        self.release_all();
    }
}
