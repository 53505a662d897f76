//! Static executor -- answers queries from scripted responses.
//!
//! Responses are keyed by the final query text (after substitution and
//! filter injection). Every call is recorded so callers can inspect exactly
//! what the loader sent.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MetricsRangeRequest, QueryExecutor, SearchRequest};
use crate::error::ExecutionError;

/// A call received by a [`StaticExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Metrics(MetricsRangeRequest),
    Search(SearchRequest),
}

impl ExecutorCall {
    /// The query text carried by the call.
    pub fn query(&self) -> &str {
        match self {
            ExecutorCall::Metrics(r) => &r.query,
            ExecutorCall::Search(r) => &r.query.sql,
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Series(serde_json::Value),
    Hits(Vec<serde_json::Value>),
    Error(ExecutionError),
}

/// Executor that replays scripted responses.
///
/// Lookup order:
/// 1. A response scripted for the exact query text
/// 2. With [`echo`](StaticExecutor::echo): the request itself, as JSON
/// 3. Otherwise a 404 service error
#[derive(Default)]
pub struct StaticExecutor {
    responses: HashMap<String, Scripted>,
    echo: bool,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl StaticExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer metrics calls for `query` with `series`.
    pub fn with_series(mut self, query: &str, series: serde_json::Value) -> Self {
        self.responses
            .insert(query.to_string(), Scripted::Series(series));
        self
    }

    /// Answer search calls for `query` with `hits`.
    pub fn with_hits(mut self, query: &str, hits: Vec<serde_json::Value>) -> Self {
        self.responses.insert(query.to_string(), Scripted::Hits(hits));
        self
    }

    /// Fail any call for `query` with `error`.
    pub fn with_error(mut self, query: &str, error: ExecutionError) -> Self {
        self.responses.insert(query.to_string(), Scripted::Error(error));
        self
    }

    /// Answer unscripted queries with the request they carried.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: ExecutorCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn unscripted(query: &str) -> ExecutionError {
        ExecutionError::Service {
            status: 404,
            detail: format!("no scripted response for query '{}'", query),
        }
    }
}

#[async_trait]
impl QueryExecutor for StaticExecutor {
    async fn metrics_query_range(
        &self,
        request: MetricsRangeRequest,
    ) -> Result<serde_json::Value, ExecutionError> {
        self.record(ExecutorCall::Metrics(request.clone()));

        match self.responses.get(&request.query) {
            Some(Scripted::Series(series)) => Ok(series.clone()),
            Some(Scripted::Hits(hits)) => Ok(serde_json::Value::Array(hits.clone())),
            Some(Scripted::Error(err)) => Err(err.clone()),
            None if self.echo => serde_json::to_value(&request)
                .map_err(|e| ExecutionError::Decode(e.to_string())),
            None => Err(Self::unscripted(&request.query)),
        }
    }

    async fn search(
        &self,
        request: SearchRequest,
    ) -> Result<Vec<serde_json::Value>, ExecutionError> {
        self.record(ExecutorCall::Search(request.clone()));

        match self.responses.get(&request.query.sql) {
            Some(Scripted::Hits(hits)) => Ok(hits.clone()),
            Some(Scripted::Series(series)) => Ok(vec![series.clone()]),
            Some(Scripted::Error(err)) => Err(err.clone()),
            None if self.echo => serde_json::to_value(&request)
                .map(|v| vec![v])
                .map_err(|e| ExecutionError::Decode(e.to_string())),
            None => Err(Self::unscripted(&request.query.sql)),
        }
    }

    fn executor_id(&self) -> &str {
        "static"
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
