//! End-to-end tests for the panel loader against scripted executors.
//!
//! Covers:
//! 1. Dependency gate: a loading variable holds the fetch back
//! 2. Partial failure: siblings still publish, the error is recorded
//! 3. Visibility gating and dirty tracking
//! 4. Stale-response guard with a gated executor
//! 5. Forced loads, aborted attempts and the substitution pipeline

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use panelkit_core::{
    compute_interval, AdHocFilter, PanelSchema, QueryDefinition, QueryType, SubstitutionKind,
    TimeSelection, VariableBinding,
};
use panelkit_loader::{
    AttemptOutcome, Decision, ExecutionError, ExecutorCall, LoaderConfig, MetricsRangeRequest,
    PanelEvent, PanelLoader, QueryExecutor, QueryResult, SearchRequest, SkipReason,
    StaticExecutor,
};
use time::macros::datetime;
use tokio::sync::Notify;

// ──────────────────────────────────────────────
// Test fixtures
// ──────────────────────────────────────────────

fn hour() -> TimeSelection {
    TimeSelection::new(
        datetime!(2024-05-01 00:00 UTC),
        datetime!(2024-05-01 01:00 UTC),
    )
}

fn sql_panel(queries: &[&str]) -> PanelSchema {
    PanelSchema::new(
        "panel-1",
        QueryType::Sql,
        queries.iter().map(|q| QueryDefinition::new(q)).collect(),
    )
}

fn loader_with(executor: Arc<dyn QueryExecutor>) -> PanelLoader {
    PanelLoader::new(executor, LoaderConfig::default(), "acme")
}

/// Feed schema and time range, then make the panel visible.
async fn mount(loader: &PanelLoader, schema: PanelSchema) -> AttemptOutcome {
    let _ = loader.evaluate(PanelEvent::SchemaChanged(schema));
    let _ = loader.evaluate(PanelEvent::TimeRangeChanged(hour()));
    loader.handle(PanelEvent::VisibilityChanged(true)).await
}

fn hits(state_data: &Option<QueryResult>) -> &[serde_json::Value] {
    match state_data {
        Some(QueryResult::Hits(hits)) => hits,
        other => panic!("expected hits, got {:?}", other),
    }
}

/// Search executor whose calls block until their query is released.
#[derive(Default)]
struct GatedExecutor {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl GatedExecutor {
    fn gate(&self, sql: &str) -> Arc<Notify> {
        self.gates
            .lock()
            .unwrap()
            .entry(sql.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl QueryExecutor for GatedExecutor {
    async fn metrics_query_range(
        &self,
        request: MetricsRangeRequest,
    ) -> Result<serde_json::Value, ExecutionError> {
        Ok(serde_json::json!({ "query": request.query }))
    }

    async fn search(
        &self,
        request: SearchRequest,
    ) -> Result<Vec<serde_json::Value>, ExecutionError> {
        let gate = self.gate(&request.query.sql);
        gate.notified().await;
        Ok(vec![serde_json::json!({ "sql": request.query.sql })])
    }

    fn executor_id(&self) -> &str {
        "gated"
    }
}

// ──────────────────────────────────────────────
// Dependency gate
// ──────────────────────────────────────────────

#[tokio::test]
async fn loading_variable_blocks_fetch_until_it_clears() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::VariablesChanged(vec![
        VariableBinding::scalar("region", "").loading(),
    ]));

    let outcome = mount(&loader, sql_panel(&["SELECT * FROM t WHERE r='$region'"])).await;
    assert_eq!(outcome, AttemptOutcome::Skipped(SkipReason::VariablesLoading));

    let outcome = loader
        .handle(PanelEvent::VariablesChanged(vec![
            VariableBinding::scalar("region", "eu").loading(),
        ]))
        .await;
    assert_eq!(outcome, AttemptOutcome::Skipped(SkipReason::VariablesLoading));
    assert!(exec.calls().is_empty());
    assert!(loader.is_dirty());

    let outcome = loader
        .handle(PanelEvent::VariablesChanged(vec![VariableBinding::scalar(
            "region", "eu",
        )]))
        .await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 1 });
    assert_eq!(exec.calls().len(), 1);
    assert_eq!(exec.calls()[0].query(), "SELECT * FROM t WHERE r='eu'");
}

#[tokio::test]
async fn unreferenced_loading_variable_does_not_block() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::VariablesChanged(vec![
        VariableBinding::scalar("other", "").loading(),
        VariableBinding::ad_hoc("filters", vec![]).loading(),
    ]));
    let outcome = mount(&loader, sql_panel(&["SELECT 1"])).await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 1 });
}

// ──────────────────────────────────────────────
// Aggregation
// ──────────────────────────────────────────────

#[tokio::test]
async fn partial_failure_keeps_sibling_results() {
    let exec = Arc::new(
        StaticExecutor::new()
            .with_hits("SELECT 1", vec![serde_json::json!({"n": 1})])
            .with_error(
                "SELECT broken",
                ExecutionError::Service {
                    status: 400,
                    detail: "Search field not found: broken".to_string(),
                },
            ),
    );
    let loader = loader_with(exec);
    let outcome = mount(&loader, sql_panel(&["SELECT 1", "SELECT broken"])).await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 1 });

    let state = loader.state();
    assert!(!state.loading);
    assert_eq!(state.data.len(), 2);
    assert_eq!(hits(&state.data[0]), &[serde_json::json!({"n": 1})]);
    assert!(state.data[1].is_none());
    assert_eq!(state.error_detail, "Search field not found: broken");
    assert_eq!(state.metadata.queries.len(), 2);
    assert_eq!(state.metadata.queries[1].original_query, "SELECT broken");
}

#[tokio::test]
async fn last_failing_sub_query_wins_and_is_truncated() {
    let long = "x".repeat(400);
    let exec = Arc::new(
        StaticExecutor::new()
            .with_error("SELECT a", ExecutionError::Transport("first".to_string()))
            .with_error(
                "SELECT b",
                ExecutionError::Service {
                    status: 500,
                    detail: long,
                },
            ),
    );
    let loader = loader_with(exec);
    mount(&loader, sql_panel(&["SELECT a", "SELECT b"])).await;

    let state = loader.state();
    assert_eq!(state.data, vec![None, None]);
    assert_eq!(state.error_detail.chars().count(), 303);
    assert!(state.error_detail.ends_with("x..."));
}

#[tokio::test]
async fn successful_attempt_clears_previous_error() {
    let exec = Arc::new(
        StaticExecutor::new()
            .with_error("SELECT bad", ExecutionError::Transport("down".to_string()))
            .with_hits("SELECT good", vec![]),
    );
    let loader = loader_with(exec);
    mount(&loader, sql_panel(&["SELECT bad"])).await;
    assert!(loader.state().has_error());

    loader
        .handle(PanelEvent::SchemaChanged(sql_panel(&["SELECT good"])))
        .await;
    let state = loader.state();
    assert_eq!(state.error_detail, "");
    assert_eq!(hits(&state.data[0]).len(), 0);
}

// ──────────────────────────────────────────────
// Visibility and dirty tracking
// ──────────────────────────────────────────────

#[tokio::test]
async fn becoming_visible_while_dirty_fetches_exactly_once() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::SchemaChanged(sql_panel(&["SELECT 1"])));
    assert!(matches!(
        loader.evaluate(PanelEvent::TimeRangeChanged(hour())),
        Decision::Skip(SkipReason::NotVisible)
    ));
    assert!(exec.calls().is_empty());

    assert_eq!(
        loader.handle(PanelEvent::VisibilityChanged(true)).await,
        AttemptOutcome::Applied { attempt: 1 }
    );
    assert_eq!(exec.calls().len(), 1);

    // clean panel: toggling visibility does nothing
    assert_eq!(
        loader.handle(PanelEvent::VisibilityChanged(false)).await,
        AttemptOutcome::Skipped(SkipReason::NotVisible)
    );
    assert_eq!(
        loader.handle(PanelEvent::VisibilityChanged(true)).await,
        AttemptOutcome::Skipped(SkipReason::Clean)
    );
    assert_eq!(exec.calls().len(), 1);
}

#[tokio::test]
async fn changes_while_hidden_are_fetched_on_reveal() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    mount(&loader, sql_panel(&["SELECT * FROM t WHERE r='$r'"])).await;
    let _ = loader.evaluate(PanelEvent::VisibilityChanged(false));

    let outcome = loader
        .handle(PanelEvent::VariablesChanged(vec![VariableBinding::scalar("r", "us")]))
        .await;
    assert_eq!(outcome, AttemptOutcome::Skipped(SkipReason::NotVisible));
    assert!(loader.is_dirty());

    let outcome = loader.handle(PanelEvent::VisibilityChanged(true)).await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 2 });
    assert_eq!(exec.calls()[1].query(), "SELECT * FROM t WHERE r='us'");
}

#[tokio::test]
async fn ad_hoc_filter_change_refetches_with_injected_predicate() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    mount(&loader, sql_panel(&["SELECT * FROM logs"])).await;

    let outcome = loader
        .handle(PanelEvent::VariablesChanged(vec![VariableBinding::ad_hoc(
            "filters",
            vec![AdHocFilter::new("host", "=", "web-1")],
        )]))
        .await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 2 });
    assert_eq!(
        exec.calls()[1].query(),
        "SELECT * FROM logs WHERE host = 'web-1'"
    );

    let state = loader.state();
    let ledger = &state.metadata.queries[0].variables;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].kind, SubstitutionKind::DynamicVariable);
    assert_eq!(ledger[0].operator.as_deref(), Some("="));
}

#[tokio::test]
async fn unterminated_identifier_still_settles_the_attempt() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::VariablesChanged(vec![VariableBinding::ad_hoc(
        "filters",
        vec![AdHocFilter::new("host", "=", "a")],
    )]));

    let outcome = mount(
        &loader,
        sql_panel(&["SELECT * FROM logs WHERE code = 1 AND \""]),
    )
    .await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 1 });
    assert_eq!(
        exec.calls()[0].query(),
        "SELECT * FROM logs WHERE (code = 1 AND \") AND host = 'a'"
    );

    let state = loader.state();
    assert!(!state.loading);
    assert_eq!(state.error_detail, "");
    assert_eq!(state.data.len(), 1);
}

// ──────────────────────────────────────────────
// Stale-response guard
// ──────────────────────────────────────────────

#[tokio::test]
async fn stale_completion_is_discarded() {
    let exec = Arc::new(GatedExecutor::default());
    let loader = Arc::new(loader_with(exec.clone()));
    let schema = sql_panel(&["SELECT * FROM t WHERE r='$r'"]);

    let _ = loader.evaluate(PanelEvent::SchemaChanged(schema));
    let _ = loader.evaluate(PanelEvent::TimeRangeChanged(hour()));
    let _ = loader.evaluate(PanelEvent::VariablesChanged(vec![VariableBinding::scalar("r", "a")]));
    let Decision::Fetch(first) = loader.evaluate(PanelEvent::VisibilityChanged(true)) else {
        panic!("expected a fetch");
    };

    let slow = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.run(first).await })
    };
    let mut rx = loader.subscribe();
    rx.wait_for(|s| s.loading).await.unwrap();

    let Decision::Fetch(second) =
        loader.evaluate(PanelEvent::VariablesChanged(vec![VariableBinding::scalar("r", "b")]))
    else {
        panic!("expected a fetch");
    };
    exec.gate("SELECT * FROM t WHERE r='b'").notify_one();
    assert_eq!(loader.run(second).await, AttemptOutcome::Applied { attempt: 2 });

    exec.gate("SELECT * FROM t WHERE r='a'").notify_one();
    assert_eq!(slow.await.unwrap(), AttemptOutcome::Discarded { attempt: 1 });

    let state = loader.state();
    assert!(!state.loading);
    assert_eq!(
        hits(&state.data[0]),
        &[serde_json::json!({"sql": "SELECT * FROM t WHERE r='b'"})]
    );
}

// ──────────────────────────────────────────────
// Forced loads and aborts
// ──────────────────────────────────────────────

#[tokio::test]
async fn load_data_ignores_visibility_and_dirty() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::SchemaChanged(sql_panel(&["SELECT 1"])));
    let _ = loader.evaluate(PanelEvent::TimeRangeChanged(hour()));
    assert!(!loader.is_visible());

    assert_eq!(loader.load_data().await, AttemptOutcome::Applied { attempt: 1 });
    assert!(!loader.is_dirty());
    assert_eq!(loader.load_data().await, AttemptOutcome::Applied { attempt: 2 });
    assert_eq!(exec.calls().len(), 2);
}

#[tokio::test]
async fn load_data_still_honours_the_gate() {
    let loader = loader_with(Arc::new(StaticExecutor::new().echo()));
    assert_eq!(
        loader.load_data().await,
        AttemptOutcome::Skipped(SkipReason::NoQueries)
    );
    let _ = loader.evaluate(PanelEvent::SchemaChanged(sql_panel(&["SELECT $x"])));
    let _ = loader.evaluate(PanelEvent::VariablesChanged(vec![
        VariableBinding::scalar("x", "").loading(),
    ]));
    assert_eq!(
        loader.load_data().await,
        AttemptOutcome::Skipped(SkipReason::VariablesLoading)
    );
}

#[tokio::test]
async fn inverted_time_range_aborts_silently() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::SchemaChanged(sql_panel(&["SELECT 1"])));
    let _ = loader.evaluate(PanelEvent::TimeRangeChanged(TimeSelection::new(
        datetime!(2024-05-01 02:00 UTC),
        datetime!(2024-05-01 01:00 UTC),
    )));
    let outcome = loader.handle(PanelEvent::VisibilityChanged(true)).await;
    assert_eq!(outcome, AttemptOutcome::Aborted);
    assert!(!loader.is_dirty());

    let state = loader.state();
    assert!(!state.loading);
    assert_eq!(state.error_detail, "");
    assert!(exec.calls().is_empty());

    // a valid range makes the panel dirty again
    let outcome = loader.handle(PanelEvent::TimeRangeChanged(hour())).await;
    assert_eq!(outcome, AttemptOutcome::Applied { attempt: 1 });
}

// ──────────────────────────────────────────────
// Pipeline wiring
// ──────────────────────────────────────────────

#[tokio::test]
async fn promql_panel_uses_metrics_call_with_label_injection() {
    let exec = Arc::new(StaticExecutor::new().with_series(
        r#"rate(http_requests_total{host="web-1"}[1m])"#,
        serde_json::json!({"resultType": "matrix", "result": []}),
    ));
    let loader = loader_with(exec.clone());
    let _ = loader.evaluate(PanelEvent::VariablesChanged(vec![VariableBinding::ad_hoc(
        "filters",
        vec![AdHocFilter::new("host", "=", "web-1")],
    )]));
    let schema = PanelSchema::new(
        "p",
        QueryType::Promql,
        vec![QueryDefinition::new("rate(http_requests_total[1m])")],
    );
    assert_eq!(mount(&loader, schema).await, AttemptOutcome::Applied { attempt: 1 });

    let calls = exec.calls();
    let ExecutorCall::Metrics(request) = &calls[0] else {
        panic!("expected a metrics call");
    };
    assert_eq!(request.org_id, "acme");
    assert_eq!(request.start_time, 1_714_521_600_000);
    assert_eq!(request.end_time, 1_714_525_200_000);
    assert_eq!(
        loader.state().data[0],
        Some(QueryResult::Series(
            serde_json::json!({"resultType": "matrix", "result": []})
        ))
    );
}

#[tokio::test]
async fn viewport_width_feeds_the_interval() {
    let exec = Arc::new(StaticExecutor::new().echo());
    let loader = loader_with(exec.clone());
    loader.set_viewport_width(100);
    assert!(loader.is_dirty());
    mount(&loader, sql_panel(&["SELECT histogram(_timestamp, '$__interval') FROM t"])).await;

    let expected = compute_interval(3_600_000, 100).interval.to_string();
    assert_eq!(
        exec.calls()[0].query(),
        format!("SELECT histogram(_timestamp, '{}') FROM t", expected)
    );
    let ledger = &loader.state().metadata.queries[0].variables;
    assert_eq!(ledger[0].kind, SubstitutionKind::Fixed);
    assert_eq!(ledger[0].value, expected);
}
