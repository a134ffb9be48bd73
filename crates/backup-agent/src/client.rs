//! HTTP client for the Lifeboat server boundary.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use lifeboat_core::clock::Hlc;
use lifeboat_core::export::ExportPage;
use lifeboat_core::identity::HealthReport;
use lifeboat_core::restore::{ApplyBatchRequest, BatchOutcome, RestoreSession};

use crate::error::{AgentError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Header carrying the privileged restore credential.
pub const OPERATOR_PIN_HEADER: &str = "x-operator-pin";

/// Error body shape returned by the server.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
    #[serde(default)]
    active_session_id: Option<String>,
}

/// Query parameters for one export call.
#[derive(Debug, Clone, Default)]
pub struct ExportQuery {
    pub entity_type: Option<String>,
    pub since_cursor: Option<Hlc>,
    pub limit: Option<i64>,
    pub include_snapshot: bool,
}

/// Server API surface the agent drives. A trait seam so the agent state
/// machine is testable against a scripted fake.
#[async_trait]
pub trait LifeboatApi: Send + Sync {
    async fn health(&self) -> Result<HealthReport>;
    async fn export(&self, query: &ExportQuery) -> Result<ExportPage>;
    async fn submit_restore_batch(
        &self,
        operator_pin: &str,
        request: &ApplyBatchRequest,
    ) -> Result<BatchOutcome>;
    async fn restore_status(&self, session_id: &str) -> Result<RestoreSession>;
}

/// Client for one Lifeboat station server.
#[derive(Debug, Clone)]
pub struct LifeboatClient {
    client: reqwest::Client,
    base_url: String,
}

impl LifeboatClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the station server (e.g., "http://10.8.0.1:8640")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {status}");
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({status}): {preview}");
    }

    /// Parse a JSON response body, mapping error bodies onto the agent's
    /// error taxonomy (a 409 with an active session id becomes `Conflict`).
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                if status.as_u16() == 409 {
                    if let Some(active_session_id) = error.active_session_id {
                        return Err(AgentError::Conflict { active_session_id });
                    }
                }
                return Err(AgentError::api(status.as_u16(), error.error));
            }
            return Err(AgentError::api(
                status.as_u16(),
                format!("Request failed: {body}"),
            ));
        }

        serde_json::from_str(&body).map_err(|err| {
            log::error!("Failed to deserialize response. Body: {body}, Error: {err}");
            AgentError::api(status.as_u16(), format!("Failed to parse response: {err}"))
        })
    }
}

#[async_trait]
impl LifeboatApi for LifeboatClient {
    /// GET /health
    async fn health(&self) -> Result<HealthReport> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    /// GET /export?entity_type=&since_cursor=&limit=&include_snapshot=
    async fn export(&self, query: &ExportQuery) -> Result<ExportPage> {
        let url = format!("{}/export", self.base_url);
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(entity_type) = query.entity_type.as_deref() {
            params.push(("entity_type", entity_type.to_string()));
        }
        if let Some(cursor) = query.since_cursor.as_ref() {
            params.push(("since_cursor", cursor.encode()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        params.push(("include_snapshot", query.include_snapshot.to_string()));

        let response = self.client.get(&url).query(&params).send().await?;
        Self::parse_response(response).await
    }

    /// POST /restore (header: operator credential)
    async fn submit_restore_batch(
        &self,
        operator_pin: &str,
        request: &ApplyBatchRequest,
    ) -> Result<BatchOutcome> {
        let url = format!("{}/restore", self.base_url);
        debug!(
            "Submitting restore batch {}/{} for session '{}'",
            request.batch_number, request.total_batches, request.restore_session_id
        );
        let response = self
            .client
            .post(&url)
            .header(OPERATOR_PIN_HEADER, operator_pin)
            .json(request)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// GET /restore/{session_id}/status
    async fn restore_status(&self, session_id: &str) -> Result<RestoreSession> {
        let url = format!("{}/restore/{}/status", self.base_url, session_id);
        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }
}
