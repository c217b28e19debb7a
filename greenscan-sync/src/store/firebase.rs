//! Firebase Realtime Database client (REST + streaming)
//!
//! Writes are `PUT <db>/<key>.json`. Subscriptions are
//! `GET <db>/<key>.json` with `Accept: text/event-stream`; the server sends
//! `put`/`patch` events relative to the subscribed key, `keep-alive`
//! heartbeats, and `cancel`/`auth_revoked` when it ends the stream.

use super::sse::{SseDecoder, SseEvent};
use super::tree::{apply_patch, apply_put};
use super::{RemoteStore, Snapshot, SnapshotStream, StoreError};
use async_trait::async_trait;
use futures::StreamExt;
use greenscan_common::events::{ConnectionState, EventBus, SyncEvent};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("GreenScan/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Payload of `put` and `patch` events
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

/// Firebase Realtime Database store
#[derive(Clone)]
pub struct FirebaseStore {
    /// Client for writes (bounded request time)
    http_client: reqwest::Client,
    /// Client for live streams (connect timeout only)
    stream_client: reqwest::Client,
    database_url: String,
    reconnect_delay: Duration,
    events: EventBus,
}

impl FirebaseStore {
    pub fn new(
        database_url: &str,
        reconnect_delay: Duration,
        events: EventBus,
    ) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let stream_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            stream_client,
            database_url: database_url.trim_end_matches('/').to_string(),
            reconnect_delay,
            events,
        })
    }

    /// REST URL of `key`
    pub fn key_url(&self, key: &str) -> String {
        format!("{}/{}.json", self.database_url, key.trim_matches('/'))
    }

    fn publish_connection(&self, key: &str, state: ConnectionState) {
        self.events.emit_lossy(SyncEvent::ConnectionStatus {
            key: key.to_string(),
            state,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn open_stream(&self, url: &str) -> Result<reqwest::Response, StoreError> {
        let response = self
            .stream_client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api(status.as_u16(), body));
        }
        Ok(response)
    }
}

/// What a decoded stream event means for the subscriber
#[derive(Debug, PartialEq)]
pub(crate) enum StreamAction {
    /// Current value changed; emit a snapshot
    Changed,
    /// Nothing to emit
    Ignore,
    /// Server ended the subscription
    Cancelled(String),
}

/// Apply one stream event to the current value of the subscribed key
pub(crate) fn apply_stream_event(
    current: &mut Value,
    event: &SseEvent,
) -> Result<StreamAction, StoreError> {
    match event.event.as_str() {
        "put" | "patch" => {
            let payload: StreamPayload = serde_json::from_str(&event.data)
                .map_err(|e| StoreError::Protocol(format!("bad {} payload: {}", event.event, e)))?;
            if event.event == "put" {
                apply_put(current, &payload.path, payload.data);
            } else {
                apply_patch(current, &payload.path, payload.data);
            }
            Ok(StreamAction::Changed)
        }
        "keep-alive" => Ok(StreamAction::Ignore),
        "cancel" => Ok(StreamAction::Cancelled(if event.data.is_empty() || event.data == "null" {
            "cancelled".to_string()
        } else {
            event.data.clone()
        })),
        "auth_revoked" => Ok(StreamAction::Cancelled("auth revoked".to_string())),
        other => {
            debug!(event = other, "Ignoring unknown stream event");
            Ok(StreamAction::Ignore)
        }
    }
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn subscribe(&self, key: &str) -> Result<SnapshotStream, StoreError> {
        let store = self.clone();
        let key = key.trim_matches('/').to_string();
        let url = self.key_url(&key);

        let stream = async_stream::stream! {
            // first connection failure is reported; later drops reconnect
            let mut ever_connected = false;

            loop {
                let response = match store.open_stream(&url).await {
                    Ok(response) => response,
                    Err(e) if !ever_connected => {
                        warn!(key = %key, error = %e, "Failed to open live stream");
                        yield Err(e);
                        break;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Reconnect failed, retrying");
                        tokio::time::sleep(store.reconnect_delay).await;
                        continue;
                    }
                };

                ever_connected = true;
                info!(key = %key, "Connected to realtime database");
                store.publish_connection(&key, ConnectionState::Connected);

                let mut current = Value::Null;
                let mut decoder = SseDecoder::new();
                let mut body = response.bytes_stream();
                let mut finished = false;

                while let Some(chunk) = body.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(key = %key, error = %e, "Live stream interrupted");
                            break;
                        }
                    };

                    for event in decoder.push(&chunk) {
                        match apply_stream_event(&mut current, &event) {
                            Ok(StreamAction::Changed) => {
                                yield Ok(Snapshot::new(key.clone(), current.clone()));
                            }
                            Ok(StreamAction::Ignore) => {}
                            Ok(StreamAction::Cancelled(reason)) => {
                                warn!(key = %key, reason = %reason, "Subscription cancelled by server");
                                yield Err(StoreError::Cancelled(reason));
                                finished = true;
                                break;
                            }
                            Err(e) => {
                                yield Err(e);
                                finished = true;
                                break;
                            }
                        }
                    }
                    if finished {
                        break;
                    }
                }

                info!(key = %key, "Disconnected from realtime database");
                store.publish_connection(&key, ConnectionState::Disconnected);

                if finished {
                    break;
                }
                tokio::time::sleep(store.reconnect_delay).await;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let url = self.key_url(key);
        debug!(key = %key, "Writing record");

        let response = self
            .http_client
            .put(&url)
            .json(&value)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(key = %key, status = status.as_u16(), body = %body, "Store write rejected");
            return Err(StoreError::Api(status.as_u16(), body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_key_url() {
        let store = FirebaseStore::new(
            "https://demo-default-rtdb.firebaseio.com/",
            Duration::from_millis(10),
            EventBus::new(10),
        )
        .unwrap();
        assert_eq!(
            store.key_url("plant_info/tomato"),
            "https://demo-default-rtdb.firebaseio.com/plant_info/tomato.json"
        );
    }

    #[test]
    fn test_put_then_patch() {
        let mut current = Value::Null;
        let action = apply_stream_event(
            &mut current,
            &event("put", r#"{"path":"/","data":{"analysis":"a","status":"completed"}}"#),
        )
        .unwrap();
        assert_eq!(action, StreamAction::Changed);

        apply_stream_event(
            &mut current,
            &event("patch", r#"{"path":"/","data":{"analysis":"b"}}"#),
        )
        .unwrap();
        assert_eq!(current, json!({"analysis": "b", "status": "completed"}));
    }

    #[test]
    fn test_null_root_put_means_absent() {
        let mut current = json!({"analysis": "a"});
        apply_stream_event(&mut current, &event("put", r#"{"path":"/","data":null}"#)).unwrap();
        assert_eq!(current, Value::Null);
    }

    #[test]
    fn test_control_events() {
        let mut current = Value::Null;
        assert_eq!(
            apply_stream_event(&mut current, &event("keep-alive", "null")).unwrap(),
            StreamAction::Ignore
        );
        assert_eq!(
            apply_stream_event(&mut current, &event("cancel", "null")).unwrap(),
            StreamAction::Cancelled("cancelled".to_string())
        );
        assert_eq!(
            apply_stream_event(&mut current, &event("auth_revoked", "null")).unwrap(),
            StreamAction::Cancelled("auth revoked".to_string())
        );
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let mut current = Value::Null;
        let err = apply_stream_event(&mut current, &event("put", "not json")).unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }
}
