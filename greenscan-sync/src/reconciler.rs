//! View state reconciliation
//!
//! `reduce` is the only way a screen's [`ViewState`] changes. It never
//! mutates its input; each event yields a new state.

use greenscan_common::{Category, TrackedEntity};
use serde::Serialize;

/// Display state of one screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    /// One entity per displayed category, in display order
    pub entities: Vec<TrackedEntity>,
    pub loading: bool,
    pub error: Option<String>,
    /// Bumped by every retry; the owning screen re-subscribes when it moves
    pub generation: u64,
}

impl ViewState {
    /// Initial state: every category pending, loading
    ///
    /// Categories keep the order given; repeats are dropped.
    pub fn new(categories: &[Category]) -> Self {
        let mut entities: Vec<TrackedEntity> = Vec::with_capacity(categories.len());
        for &category in categories {
            if !entities.iter().any(|e| e.category == category) {
                entities.push(TrackedEntity::pending(category));
            }
        }
        Self {
            entities,
            loading: true,
            error: None,
            generation: 0,
        }
    }

    pub fn entity(&self, category: Category) -> Option<&TrackedEntity> {
        self.entities.iter().find(|e| e.category == category)
    }

    /// Displayed categories, in display order
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.entities.iter().map(|e| e.category)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    SnapshotReceived {
        category: Category,
        entity: TrackedEntity,
    },
    SnapshotError {
        category: Category,
        message: String,
    },
    RetryRequested,
    /// The user closed the error banner without retrying
    ErrorDismissed,
}

pub fn reduce(prev: &ViewState, event: ViewEvent) -> ViewState {
    let mut next = prev.clone();
    match event {
        ViewEvent::SnapshotReceived { category, entity } => {
            match next.entities.iter_mut().find(|e| e.category == category) {
                Some(slot) => *slot = entity,
                None => next.entities.push(entity),
            }
            next.loading = false;
        }
        ViewEvent::SnapshotError { message, .. } => {
            next.error = Some(message);
            next.loading = false;
        }
        ViewEvent::RetryRequested => {
            next.error = None;
            next.generation += 1;
        }
        ViewEvent::ErrorDismissed => {
            next.error = None;
        }
    }
    next
}
