//! Query execution service abstraction.
//!
//! The loader talks to the outside world through [`QueryExecutor`], which
//! mirrors the two calls of the query service:
//!
//! - [`QueryExecutor::metrics_query_range`] for promql panels
//! - [`QueryExecutor::search`] for everything else
//!
//! Implementations:
//! - [`http::HttpExecutor`] -- the real service over HTTP
//! - [`static_executor::StaticExecutor`] -- scripted responses, for tests
//!   and dry runs

pub mod http;
pub mod static_executor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// Marker appended to an error message that was cut short.
pub const TRUNCATION_MARKER: &str = "...";

// ──────────────────────────────────────────────
// Requests
// ──────────────────────────────────────────────

/// Input of the metrics range call. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRangeRequest {
    pub org_id: String,
    pub query: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// The `query` object of a search call. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub sql: String,
    pub sql_mode: String,
    pub start_time: i64,
    pub end_time: i64,
    pub size: i64,
}

impl SearchQuery {
    /// A full-mode aggregation query: `size` 0 leaves paging to the server.
    pub fn full(sql: &str, start_time: i64, end_time: i64) -> Self {
        SearchQuery {
            sql: sql.to_string(),
            sql_mode: "full".to_string(),
            start_time,
            end_time,
            size: 0,
        }
    }
}

/// Input of the search call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub org_id: String,
    pub query: SearchQuery,
    pub page_type: String,
}

// ──────────────────────────────────────────────
// QueryExecutor trait
// ──────────────────────────────────────────────

/// Executes one sub-query against the query service.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a promql range query; returns the result series.
    async fn metrics_query_range(
        &self,
        request: MetricsRangeRequest,
    ) -> Result<serde_json::Value, ExecutionError>;

    /// Run a search; returns the result rows.
    async fn search(&self, request: SearchRequest)
        -> Result<Vec<serde_json::Value>, ExecutionError>;

    /// Returns this executor's identifier (e.g. "http", "static").
    fn executor_id(&self) -> &str;
}

// ──────────────────────────────────────────────
// Error truncation
// ──────────────────────────────────────────────

/// Keep at most `max_chars` characters of `message`, appending
/// [`TRUNCATION_MARKER`] when anything was cut.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &message[..byte_idx], TRUNCATION_MARKER),
        None => message.to_string(),
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
