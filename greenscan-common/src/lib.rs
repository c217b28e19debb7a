//! # GreenScan Common Library
//!
//! Shared code for the GreenScan sync client including:
//! - Plant categories and their validation boundary
//! - Tracked entity and remote record models
//! - Snapshot → entity mapping
//! - Event types (SyncEvent enum) and the event bus
//! - Configuration loading

pub mod category;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod record;

pub use category::Category;
pub use entity::{EntityStatus, TrackedEntity};
pub use error::{Error, Result};
pub use record::PlantRecord;
