//! Tracked entity model and snapshot mapping
//!
//! `map_snapshot` is the only place a raw store value becomes a
//! `TrackedEntity`. It is pure so it can be tested without any transport.

use crate::Category;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text shown before the first snapshot for a category arrives
pub const PENDING_TEXT: &str = "pending";
/// Text for a category with no remote record
pub const NO_ANALYSIS_YET: &str = "No analysis yet";
/// Text for a record whose `analysis` field is missing or empty
pub const NO_ANALYSIS_AVAILABLE: &str = "No analysis available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Pending,
    Completed,
}

/// Local view of one category's remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub category: Category,
    pub analysis_text: String,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub image_reference: Option<String>,
    pub status: EntityStatus,
}

impl TrackedEntity {
    /// Entity as it exists before anything is known about the category
    pub fn pending(category: Category) -> Self {
        Self {
            category,
            analysis_text: PENDING_TEXT.to_string(),
            last_updated_at: None,
            image_reference: None,
            status: EntityStatus::Pending,
        }
    }

    /// Entity for a category whose remote record does not exist
    pub fn absent(category: Category) -> Self {
        Self {
            analysis_text: NO_ANALYSIS_YET.to_string(),
            ..Self::pending(category)
        }
    }
}

/// Map a snapshot value (None when the record does not exist) to an entity
pub fn map_snapshot(category: Category, value: Option<&Value>) -> TrackedEntity {
    let record = match value {
        Some(v) if !v.is_null() => v,
        _ => return TrackedEntity::absent(category),
    };

    let analysis_text = non_empty_str(record.get("analysis"))
        .unwrap_or(NO_ANALYSIS_AVAILABLE)
        .to_string();

    let last_updated_at = record.get("timestamp").and_then(timestamp_from_value);

    let image_reference = non_empty_str(record.get("image")).map(str::to_string);

    let status = match record.get("status").and_then(Value::as_str) {
        Some("completed") => EntityStatus::Completed,
        _ => EntityStatus::Pending,
    };

    TrackedEntity {
        category,
        analysis_text,
        last_updated_at,
        image_reference,
        status,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Epoch milliseconds (integer or float) → UTC timestamp
fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    let millis = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))?;
    Utc.timestamp_millis_opt(millis).single()
}
