//! Remote store record stored at `plant_info/{category}`

use crate::Category;
use serde::{Deserialize, Serialize};

/// Placeholder asking the store to substitute its own clock on write
pub const SERVER_TIMESTAMP_KEY: &str = ".sv";
pub const SERVER_TIMESTAMP_VALUE: &str = "timestamp";

/// Record lifecycle marker as written to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Completed,
}

/// Record timestamp: either a server placeholder (on write) or epoch millis (on read)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordTimestamp {
    Millis(i64),
    Server(ServerValue),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerValue {
    #[serde(rename = ".sv")]
    pub sv: String,
}

impl RecordTimestamp {
    pub fn server() -> Self {
        RecordTimestamp::Server(ServerValue {
            sv: SERVER_TIMESTAMP_VALUE.to_string(),
        })
    }
}

/// Full record written after a successful analysis
///
/// Always written whole; a write replaces any prior record at the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantRecord {
    pub plant: Category,
    /// Data URI of the analysed image
    pub image: String,
    pub analysis: String,
    pub timestamp: RecordTimestamp,
    pub status: RecordStatus,
}

impl PlantRecord {
    /// Build the record for a completed analysis, timestamped by the server
    pub fn completed(plant: Category, image: String, analysis: String) -> Self {
        Self {
            plant,
            image,
            analysis,
            timestamp: RecordTimestamp::server(),
            status: RecordStatus::Completed,
        }
    }
}

/// True if `value` is the server-timestamp placeholder object
pub fn is_server_timestamp(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .map(|obj| {
            obj.len() == 1
                && obj.get(SERVER_TIMESTAMP_KEY).and_then(|v| v.as_str())
                    == Some(SERVER_TIMESTAMP_VALUE)
        })
        .unwrap_or(false)
}
