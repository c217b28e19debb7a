//! Analysis backend client
//!
//! `POST {backend}/analyze` with `{"imageData": <data URI>, "plantType": <category>}`.
//! Any non-2xx status is a failure regardless of body; a 2xx body without a
//! non-empty `analysis` string is a failure too.

use async_trait::async_trait;
use greenscan_common::Category;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::error::SyncError;

const USER_AGENT: &str = concat!("GreenScan/", env!("CARGO_PKG_VERSION"));

/// Analysis client errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to reach analysis service: {0}")]
    Network(String),

    #[error("Failed to analyze image: {status} {reason}")]
    Api {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Invalid response from analysis service: {0}")]
    Parse(String),

    #[error("No analysis data received from backend")]
    MissingAnalysis,
}

impl From<AnalysisError> for SyncError {
    fn from(err: AnalysisError) -> Self {
        SyncError::ServiceFailed(err.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    image_data: &'a str,
    plant_type: Category,
}

/// Successful analysis
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisResult {
    pub analysis: String,
    /// Raw classifier label, when the backend reports it
    #[serde(default)]
    pub class: Option<String>,
}

/// Image analysis capability
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(
        &self,
        category: Category,
        image_data: &str,
    ) -> Result<AnalysisResult, AnalysisError>;
}

/// HTTP analysis backend client
pub struct HttpAnalysisClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisClient {
    pub fn new(backend_url: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/analyze", backend_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Extract the analysis from a 2xx response body
pub(crate) fn parse_analysis_body(body: &str) -> Result<AnalysisResult, AnalysisError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| AnalysisError::Parse(e.to_string()))?;

    match value.get("analysis").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(AnalysisResult {
            analysis: text.to_string(),
            class: value.get("class").and_then(Value::as_str).map(str::to_string),
        }),
        _ => Err(AnalysisError::MissingAnalysis),
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(
        &self,
        category: Category,
        image_data: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        info!(
            plant_type = %category,
            image_size = image_data.len(),
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "Sending request to backend"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&AnalyzeRequest {
                image_data,
                plant_type: category,
            })
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let backend_error = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string));
            error!(
                status = status.as_u16(),
                error = backend_error.as_deref().unwrap_or(body.as_str()),
                "Backend error response"
            );
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        let result = parse_analysis_body(&body)?;
        info!(
            plant_type = %category,
            analysis = %result.analysis,
            class = result.class.as_deref().unwrap_or("-"),
            "Analysis result"
        );
        Ok(result)
    }
}
