//! Template-variable substitution.
//!
//! A raw panel query goes through two stages:
//!
//! 1. [`substitute_time_and_bound_variables`] -- literal replacement of the
//!    fixed time-bucket variables and then every bound scalar variable.
//! 2. [`apply_ad_hoc_filters`] -- label-matcher or predicate injection for
//!    every complete ad-hoc filter.
//!
//! Both stages return the rewritten text together with a ledger of what was
//! applied. [`build_query_metadata`] runs the two in order and assembles the
//! per-sub-query [`QueryMetadata`].

use crate::inject;
use crate::interval::IntervalCalculator;
use crate::types::{
    AdHocFilter, QueryMetadata, QueryType, SubstitutionRecord, TimeRange, VariableBinding,
};

pub const INTERVAL_MS: &str = "__interval_ms";
pub const INTERVAL: &str = "__interval";
pub const RATE_INTERVAL: &str = "__rate_interval";

/// A rewritten query plus the ledger of replacements that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub query: String,
    pub variables: Vec<SubstitutionRecord>,
}

impl Substitution {
    fn unchanged(query: &str) -> Self {
        Substitution {
            query: query.to_string(),
            variables: Vec::new(),
        }
    }
}

/// Inputs the pipeline reads besides the query itself.
#[derive(Debug, Clone, Copy)]
pub struct SubstitutionContext<'a> {
    pub calculator: IntervalCalculator,
    /// Pixel width of the rendering surface.
    pub viewport_width: u32,
    pub variables: &'a [VariableBinding],
}

/// The fixed variables for a range, in substitution order.
///
/// `__interval_ms` must precede `__interval`: the latter is a prefix of the
/// former and replacement is a plain substring match.
pub fn fixed_variables(
    range: &TimeRange,
    viewport_width: u32,
    calculator: &IntervalCalculator,
) -> [(&'static str, String); 3] {
    let result = calculator.compute(range.duration_millis(), viewport_width as i64);
    [
        (INTERVAL_MS, result.interval_millis.to_string()),
        (INTERVAL, result.interval.to_string()),
        (RATE_INTERVAL, result.rate_interval()),
    ]
}

/// Replace `$__interval_ms`, `$__interval`, `$__rate_interval` and then
/// every bound scalar variable, in declaration order.
///
/// Only replacements that actually occur are recorded. Absent tokens are
/// not an error.
pub fn substitute_time_and_bound_variables(
    query: &str,
    range: &TimeRange,
    ctx: &SubstitutionContext<'_>,
) -> Substitution {
    let mut out = Substitution::unchanged(query);

    for (name, value) in fixed_variables(range, ctx.viewport_width, &ctx.calculator) {
        let token = format!("${name}");
        if out.query.contains(&token) {
            out.query = out.query.replace(&token, &value);
            out.variables.push(SubstitutionRecord::fixed(name, &value));
        }
    }

    for variable in ctx.variables.iter().filter(|v| !v.is_ad_hoc()) {
        let token = variable.token();
        if out.query.contains(&token) {
            let value = variable.value.as_text();
            out.query = out.query.replace(&token, &value);
            out.variables
                .push(SubstitutionRecord::variable(&variable.name, &value));
        }
    }

    out
}

/// Every complete filter across all ad-hoc bindings, flattened in
/// declaration order.
pub fn active_ad_hoc_filters(variables: &[VariableBinding]) -> Vec<AdHocFilter> {
    variables
        .iter()
        .filter(|v| v.is_ad_hoc())
        .flat_map(|v| v.filters().iter())
        .filter(|f| f.is_complete())
        .cloned()
        .collect()
}

/// Inject every active ad-hoc filter into `query`.
///
/// Each considered filter is recorded, whether or not the text changed.
pub fn apply_ad_hoc_filters(
    query: &str,
    query_type: QueryType,
    variables: &[VariableBinding],
) -> Substitution {
    let filters = active_ad_hoc_filters(variables);
    if filters.is_empty() {
        return Substitution::unchanged(query);
    }

    let mut out = Substitution::unchanged(query);
    for filter in &filters {
        out.query = match query_type {
            QueryType::Promql => inject::promql::inject_label_matcher(
                &out.query,
                &filter.name,
                &filter.operator,
                &filter.value,
            ),
            QueryType::Sql => inject::sql::inject_predicate(
                &out.query,
                &filter.name,
                &filter.operator,
                &filter.value,
            ),
        };
        out.variables.push(SubstitutionRecord::dynamic(filter));
    }
    out
}

/// Run the full pipeline for one sub-query.
pub fn build_query_metadata(
    raw_query: &str,
    range: &TimeRange,
    query_type: QueryType,
    ctx: &SubstitutionContext<'_>,
) -> QueryMetadata {
    let bound = substitute_time_and_bound_variables(raw_query, range, ctx);
    let ad_hoc = apply_ad_hoc_filters(&bound.query, query_type, ctx.variables);

    let mut variables = bound.variables;
    variables.extend(ad_hoc.variables);

    QueryMetadata {
        original_query: raw_query.to_string(),
        query: ad_hoc.query,
        start_time: range.start_millis(),
        end_time: range.end_millis(),
        query_type,
        variables,
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
