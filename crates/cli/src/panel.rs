//! `substitute` and `fetch`: commands driven by a panel config file.

use std::path::Path;
use std::sync::Arc;

use panelkit_core::{build_query_metadata, QueryMetadata, SubstitutionContext, TimeRange};
use panelkit_loader::{
    AttemptOutcome, HttpExecutor, LoadState, PanelConfig, PanelEvent, PanelLoader,
    QueryExecutor, QueryResult, SkipReason, StaticExecutor,
};

use crate::{fail, print_json, OutputFormat};

fn load_config(path: &Path, output: OutputFormat, quiet: bool) -> PanelConfig {
    PanelConfig::from_path(path).unwrap_or_else(|e| fail(&e.to_string(), output, quiet))
}

fn resolve_range(config: &PanelConfig, output: OutputFormat, quiet: bool) -> TimeRange {
    config.time.resolve().unwrap_or_else(|| {
        fail(
            "time range is missing or start is after end",
            output,
            quiet,
        )
    })
}

// ── substitute ────────────────────────────────────────────────────────────────

pub(crate) fn cmd_substitute(path: &Path, output: OutputFormat, quiet: bool) {
    let config = load_config(path, output, quiet);
    let range = resolve_range(&config, output, quiet);

    let ctx = SubstitutionContext {
        calculator: config.loader.calculator(),
        viewport_width: config.loader.viewport_width,
        variables: &config.variables,
    };
    let queries: Vec<QueryMetadata> = config
        .panel
        .queries
        .iter()
        .map(|q| build_query_metadata(&q.query, &range, config.panel.query_type, &ctx))
        .collect();

    match output {
        OutputFormat::Json => print_json(&queries),
        OutputFormat::Text => {
            for (index, meta) in queries.iter().enumerate() {
                println!("[{}] {}", index, meta.query);
                if quiet {
                    continue;
                }
                for record in &meta.variables {
                    match &record.operator {
                        Some(op) => println!("    {} {} {}", record.name, op, record.value),
                        None => println!("    {} = {}", record.name, record.value),
                    }
                }
            }
        }
    }
}

// ── fetch ─────────────────────────────────────────────────────────────────────

pub(crate) fn cmd_fetch(path: &Path, dry_run: bool, output: OutputFormat, quiet: bool) {
    let config = load_config(path, output, quiet);

    let executor: Arc<dyn QueryExecutor> = if dry_run {
        Arc::new(StaticExecutor::new().echo())
    } else {
        match config.require_service() {
            Ok(service) => Arc::new(HttpExecutor::new(service)),
            Err(e) => fail(&e.to_string(), output, quiet),
        }
    };
    let org_id = config
        .service
        .as_ref()
        .map(|s| s.org_id.clone())
        .unwrap_or_else(|| "default".to_string());

    let runtime = tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| fail(&format!("failed to start runtime: {}", e), output, quiet));

    let (outcome, state) = runtime.block_on(async {
        let loader = PanelLoader::new(executor, config.loader.clone(), &org_id);
        // The loader is still hidden, so these only fold inputs.
        let _ = loader.evaluate(PanelEvent::SchemaChanged(config.panel.clone()));
        let _ = loader.evaluate(PanelEvent::TimeRangeChanged(config.time));
        let _ = loader.evaluate(PanelEvent::VariablesChanged(config.variables.clone()));
        let outcome = loader.handle(PanelEvent::VisibilityChanged(true)).await;
        (outcome, loader.state())
    });

    match outcome {
        AttemptOutcome::Applied { .. } => {}
        AttemptOutcome::Aborted => fail(
            "time range is missing or start is after end",
            output,
            quiet,
        ),
        AttemptOutcome::Skipped(SkipReason::NoQueries) => {
            fail("panel has no runnable query", output, quiet)
        }
        AttemptOutcome::Skipped(SkipReason::VariablesLoading) => fail(
            "panel depends on variables that are still loading",
            output,
            quiet,
        ),
        other => fail(&format!("panel was not fetched: {:?}", other), output, quiet),
    }

    match output {
        OutputFormat::Json => print_json(&state),
        OutputFormat::Text => print_state(&state, quiet),
    }

    if state.has_error() {
        std::process::exit(1);
    }
}

fn print_state(state: &LoadState, quiet: bool) {
    for (index, (result, meta)) in state
        .data
        .iter()
        .zip(&state.metadata.queries)
        .enumerate()
    {
        let summary = match result {
            Some(QueryResult::Hits(hits)) => format!("{} rows", hits.len()),
            Some(QueryResult::Series(_)) => "series".to_string(),
            None => "failed".to_string(),
        };
        println!("[{}] {}: {}", index, summary, meta.query);
        if !quiet {
            if let Some(result) = result {
                let body = serde_json::to_string(result).unwrap_or_default();
                println!("    {}", body);
            }
        }
    }
    if state.has_error() {
        println!("error: {}", state.error_detail);
    }
}
