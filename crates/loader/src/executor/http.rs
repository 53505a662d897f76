//! HTTP executor -- runs panel queries against the query service.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime.
//!
//! - metrics: `GET {base}/api/{org}/prometheus/api/v1/query_range`
//!   with `query`, `start`, `end` (epoch seconds) → body `data`
//! - search: `POST {base}/api/{org}/_search?type={page_type}` with
//!   `{"query": {...}}` (times in epoch microseconds) → body `hits`

use std::time::Duration;

use async_trait::async_trait;

use super::{MetricsRangeRequest, QueryExecutor, SearchRequest};
use crate::config::ServiceConfig;
use crate::error::ExecutionError;

/// Executor that calls the query service over HTTP.
///
/// - `base_url` and `timeout_secs` from [`ServiceConfig`]
/// - bearer token from config or the `PANELKIT_AUTH_TOKEN` env var
pub struct HttpExecutor {
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(config: &ServiceConfig) -> Self {
        HttpExecutor {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.resolved_auth_token(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn metrics_url(&self, org_id: &str) -> String {
        format!("{}/api/{}/prometheus/api/v1/query_range", self.base_url, org_id)
    }

    pub fn search_url(&self, org_id: &str) -> String {
        format!("{}/api/{}/_search", self.base_url, org_id)
    }

    fn agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into()
    }
}

/// Epoch milliseconds rendered as (possibly fractional) epoch seconds.
pub fn millis_to_seconds(millis: i64) -> String {
    if millis % 1_000 == 0 {
        (millis / 1_000).to_string()
    } else {
        format!("{:.3}", millis as f64 / 1_000.0)
    }
}

pub fn millis_to_micros(millis: i64) -> i64 {
    millis.saturating_mul(1_000)
}

/// Error message of a failed metrics call: the body's `error` field.
pub fn metrics_error_detail(body: &serde_json::Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.as_str())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

/// Error message of a failed search call: `error_detail`, then `message`.
pub fn search_error_detail(body: &serde_json::Value) -> Option<String> {
    ["error_detail", "message"].iter().find_map(|key| {
        body.get(*key)
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    })
}

/// Turn a raw response into its JSON body, or a service error whose detail
/// is extracted with `extract`.
fn read_body(
    status: u16,
    text: String,
    extract: fn(&serde_json::Value) -> Option<String>,
) -> Result<serde_json::Value, ExecutionError> {
    if status >= 400 {
        let parsed: Option<serde_json::Value> = serde_json::from_str(&text).ok();
        let detail = parsed
            .as_ref()
            .and_then(extract)
            .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ExecutionError::Service { status, detail });
    }
    serde_json::from_str(&text).map_err(|e| ExecutionError::Decode(e.to_string()))
}

#[async_trait]
impl QueryExecutor for HttpExecutor {
    async fn metrics_query_range(
        &self,
        request: MetricsRangeRequest,
    ) -> Result<serde_json::Value, ExecutionError> {
        let url = self.metrics_url(&request.org_id);
        let auth_token = self.auth_token.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut call = Self::agent(timeout)
                .get(&url)
                .query("query", &request.query)
                .query("start", millis_to_seconds(request.start_time))
                .query("end", millis_to_seconds(request.end_time));
            if let Some(ref token) = auth_token {
                call = call.header("Authorization", &format!("Bearer {}", token));
            }

            let response = call
                .call()
                .map_err(|e| ExecutionError::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| ExecutionError::Decode(e.to_string()))?;

            let mut body = read_body(status, text, metrics_error_detail)?;
            body.get_mut("data")
                .map(serde_json::Value::take)
                .ok_or_else(|| ExecutionError::Decode("response has no 'data' field".to_string()))
        })
        .await
        .map_err(|e| ExecutionError::Join(e.to_string()))?
    }

    async fn search(
        &self,
        request: SearchRequest,
    ) -> Result<Vec<serde_json::Value>, ExecutionError> {
        let url = self.search_url(&request.org_id);
        let auth_token = self.auth_token.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let payload = serde_json::json!({
                "query": {
                    "sql": request.query.sql,
                    "sql_mode": request.query.sql_mode,
                    "start_time": millis_to_micros(request.query.start_time),
                    "end_time": millis_to_micros(request.query.end_time),
                    "size": request.query.size,
                }
            });

            let mut call = Self::agent(timeout)
                .post(&url)
                .query("type", &request.page_type)
                .header("content-type", "application/json");
            if let Some(ref token) = auth_token {
                call = call.header("Authorization", &format!("Bearer {}", token));
            }

            let response = call
                .send_json(&payload)
                .map_err(|e| ExecutionError::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| ExecutionError::Decode(e.to_string()))?;

            let mut body = read_body(status, text, search_error_detail)?;
            match body.get_mut("hits").map(serde_json::Value::take) {
                Some(serde_json::Value::Array(hits)) => Ok(hits),
                Some(_) => Err(ExecutionError::Decode("'hits' is not an array".to_string())),
                None => Err(ExecutionError::Decode("response has no 'hits' field".to_string())),
            }
        })
        .await
        .map_err(|e| ExecutionError::Join(e.to_string()))?
    }

    fn executor_id(&self) -> &str {
        "http"
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
