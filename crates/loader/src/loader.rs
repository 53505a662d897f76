//! Fetch orchestration for one panel.
//!
//! Every input change arrives as a [`PanelEvent`]. [`PanelLoader::evaluate`]
//! folds the event into the loader's inputs and makes the single "should
//! fetch now" decision:
//!
//! ```text
//! visible && dirty && has runnable query && dependency gate passes
//! ```
//!
//! A positive decision clears `dirty`, resolves the time window and stamps
//! a new attempt token. [`PanelLoader::run`] then fans out one call per
//! sub-query, waits for all of them, and publishes the aggregate only if
//! no newer attempt has been issued in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use panelkit_core::{
    build_query_metadata, can_run, ChangeDetector, PanelSchema, QueryMetadata, QueryType,
    SubstitutionContext, TimeRange, TimeSelection, VariableBinding,
};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::LoaderConfig;
use crate::error::ExecutionError;
use crate::executor::{
    truncate_error, MetricsRangeRequest, QueryExecutor, SearchQuery, SearchRequest,
};
use crate::state::{LoadMetadata, LoadState, QueryResult};

// ──────────────────────────────────────────────
// Events and outcomes
// ──────────────────────────────────────────────

/// An input change delivered to the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    SchemaChanged(PanelSchema),
    TimeRangeChanged(TimeSelection),
    /// A fresh snapshot of the variable store.
    VariablesChanged(Vec<VariableBinding>),
    VisibilityChanged(bool),
}

/// Why an evaluation did not start an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotVisible,
    /// Nothing changed since the last attempt.
    Clean,
    NoQueries,
    /// A referenced variable is still loading.
    VariablesLoading,
}

/// Result of [`PanelLoader::evaluate`].
#[derive(Debug)]
#[must_use = "a `Fetch` decision holds the latest attempt token and must be run"]
pub enum Decision {
    Fetch(PreparedAttempt),
    Skip(SkipReason),
    /// The gate passed but the time window was missing or invalid.
    Abort,
}

/// What happened to one evaluated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Skipped(SkipReason),
    Aborted,
    /// Results were published.
    Applied { attempt: u64 },
    /// A newer attempt was issued before this one settled.
    Discarded { attempt: u64 },
}

/// Everything an attempt needs, captured when it was issued.
#[derive(Debug, Clone)]
#[must_use = "only the latest attempt may clear `loading`; pass it to `PanelLoader::run`"]
pub struct PreparedAttempt {
    token: u64,
    schema: PanelSchema,
    range: TimeRange,
    variables: Vec<VariableBinding>,
    viewport_width: u32,
}

impl PreparedAttempt {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }
}

// ──────────────────────────────────────────────
// PanelLoader
// ──────────────────────────────────────────────

#[derive(Debug)]
struct PanelInputs {
    schema: PanelSchema,
    selection: TimeSelection,
    variables: Vec<VariableBinding>,
    viewport_width: u32,
    visible: bool,
    dirty: bool,
    detector: ChangeDetector,
}

/// Loads and publishes the data of one panel.
pub struct PanelLoader {
    executor: Arc<dyn QueryExecutor>,
    config: LoaderConfig,
    org_id: String,
    inputs: Mutex<PanelInputs>,
    latest_attempt: AtomicU64,
    state: watch::Sender<LoadState>,
}

impl PanelLoader {
    /// A loader starts invisible and dirty, with an empty schema.
    pub fn new(executor: Arc<dyn QueryExecutor>, config: LoaderConfig, org_id: &str) -> Self {
        let (state, _) = watch::channel(LoadState::default());
        let inputs = PanelInputs {
            schema: PanelSchema::default(),
            selection: TimeSelection::default(),
            variables: Vec::new(),
            viewport_width: config.viewport_width,
            visible: false,
            dirty: true,
            detector: ChangeDetector::new(),
        };
        PanelLoader {
            executor,
            config,
            org_id: org_id.to_string(),
            inputs: Mutex::new(inputs),
            latest_attempt: AtomicU64::new(0),
            state,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Watch the published state.
    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    /// Snapshot of the published state.
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Change the sampling denominator for later attempts. Never fetches.
    pub fn set_viewport_width(&self, width: u32) {
        self.inputs().viewport_width = width;
    }

    pub fn is_dirty(&self) -> bool {
        self.inputs().dirty
    }

    pub fn is_visible(&self) -> bool {
        self.inputs().visible
    }

    fn inputs(&self) -> MutexGuard<'_, PanelInputs> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold `event` into the inputs and decide whether to fetch.
    ///
    /// A [`Decision::Fetch`] supersedes every earlier attempt and has to be
    /// passed to [`run`](Self::run), or `loading` is never cleared.
    pub fn evaluate(&self, event: PanelEvent) -> Decision {
        let mut inputs = self.inputs();
        match event {
            PanelEvent::SchemaChanged(schema) => {
                inputs.schema = schema;
                inputs.dirty = true;
            }
            PanelEvent::TimeRangeChanged(selection) => {
                inputs.selection = selection;
                inputs.dirty = true;
            }
            PanelEvent::VariablesChanged(variables) => {
                let PanelInputs {
                    detector, schema, ..
                } = &mut *inputs;
                let change = detector.detect(&variables, &schema.queries);
                debug!(
                    bound = change.bound,
                    ad_hoc = change.ad_hoc,
                    "variable snapshot evaluated"
                );
                if change.any() {
                    inputs.dirty = true;
                }
                inputs.variables = variables;
            }
            PanelEvent::VisibilityChanged(visible) => {
                inputs.visible = visible;
            }
        }
        self.decide(&mut inputs, false)
    }

    /// Evaluate `event` and run the attempt it starts, if any.
    pub async fn handle(&self, event: PanelEvent) -> AttemptOutcome {
        let decision = self.evaluate(event);
        self.follow(decision).await
    }

    /// Fetch now, regardless of visibility and dirty state. Still requires
    /// a runnable query and a passing dependency gate.
    pub async fn load_data(&self) -> AttemptOutcome {
        let decision = {
            let mut inputs = self.inputs();
            self.decide(&mut inputs, true)
        };
        self.follow(decision).await
    }

    async fn follow(&self, decision: Decision) -> AttemptOutcome {
        match decision {
            Decision::Fetch(attempt) => self.run(attempt).await,
            Decision::Skip(reason) => AttemptOutcome::Skipped(reason),
            Decision::Abort => AttemptOutcome::Aborted,
        }
    }

    fn decide(&self, inputs: &mut PanelInputs, forced: bool) -> Decision {
        let panel_id = inputs.schema.id.clone();
        let skip = if !forced && !inputs.visible {
            Some(SkipReason::NotVisible)
        } else if !forced && !inputs.dirty {
            Some(SkipReason::Clean)
        } else if !inputs.schema.has_runnable_query() {
            Some(SkipReason::NoQueries)
        } else if !can_run(&inputs.variables, &inputs.schema.queries) {
            Some(SkipReason::VariablesLoading)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(panel_id = %panel_id, ?reason, "fetch skipped");
            return Decision::Skip(reason);
        }

        inputs.dirty = false;

        let Some(range) = inputs.selection.resolve() else {
            debug!(panel_id = %panel_id, "time range not ready, attempt aborted");
            return Decision::Abort;
        };

        let token = self.latest_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        Decision::Fetch(PreparedAttempt {
            token,
            schema: inputs.schema.clone(),
            range,
            variables: inputs.variables.clone(),
            viewport_width: inputs.viewport_width,
        })
    }

    /// Execute a prepared attempt and publish its results.
    pub async fn run(&self, attempt: PreparedAttempt) -> AttemptOutcome {
        let span = info_span!(
            "panel_fetch",
            panel_id = %attempt.schema.id,
            attempt = attempt.token
        );
        self.execute(attempt).instrument(span).await
    }

    fn is_current(&self, token: u64) -> bool {
        self.latest_attempt.load(Ordering::SeqCst) == token
    }

    async fn execute(&self, attempt: PreparedAttempt) -> AttemptOutcome {
        let token = attempt.token;
        self.state.send_if_modified(|state| {
            if !self.is_current(token) || state.loading {
                return false;
            }
            state.loading = true;
            true
        });

        let ctx = SubstitutionContext {
            calculator: self.config.calculator(),
            viewport_width: attempt.viewport_width,
            variables: &attempt.variables,
        };
        let query_type = attempt.schema.query_type;
        let queries: Vec<QueryMetadata> = attempt
            .schema
            .queries
            .iter()
            .map(|q| build_query_metadata(&q.query, &attempt.range, query_type, &ctx))
            .collect();

        info!(queries = queries.len(), query_type = query_type.as_str(), "attempt started");

        let results = join_all(queries.iter().map(|m| self.dispatch(query_type, m))).await;

        let mut error_detail = String::new();
        let data: Vec<Option<QueryResult>> = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(index, error = %err, "sub-query failed");
                    error_detail = truncate_error(&err.detail(), self.config.error_detail_max_chars);
                    None
                }
            })
            .collect();

        let next = LoadState {
            data,
            loading: false,
            error_detail,
            metadata: LoadMetadata { queries },
        };
        let applied = self.state.send_if_modified(|state| {
            if !self.is_current(token) {
                return false;
            }
            *state = next;
            true
        });

        if applied {
            info!("attempt applied");
            AttemptOutcome::Applied { attempt: token }
        } else {
            warn!(
                latest = self.latest_attempt.load(Ordering::SeqCst),
                "stale attempt discarded"
            );
            AttemptOutcome::Discarded { attempt: token }
        }
    }

    async fn dispatch(
        &self,
        query_type: QueryType,
        metadata: &QueryMetadata,
    ) -> Result<QueryResult, ExecutionError> {
        match query_type {
            QueryType::Promql => self
                .executor
                .metrics_query_range(MetricsRangeRequest {
                    org_id: self.org_id.clone(),
                    query: metadata.query.clone(),
                    start_time: metadata.start_time,
                    end_time: metadata.end_time,
                })
                .await
                .map(QueryResult::Series),
            QueryType::Sql => self
                .executor
                .search(SearchRequest {
                    org_id: self.org_id.clone(),
                    query: SearchQuery::full(
                        &metadata.query,
                        metadata.start_time,
                        metadata.end_time,
                    ),
                    page_type: self.config.page_type.clone(),
                })
                .await
                .map(QueryResult::Hits),
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
