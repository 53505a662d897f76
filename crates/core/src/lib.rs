//! panelkit-core: the pure half of the dashboard panel data loader.
//!
//! Everything in this crate is synchronous and side-effect free:
//!
//! - [`interval`] -- derive a "nice" sampling interval and rate window from a
//!   time range and a pixel width
//! - [`substitute`] -- rewrite a raw panel query with fixed, bound and ad-hoc
//!   variables, recording every replacement
//! - [`inject`] -- label-matcher (promql) and predicate (SQL) injection used
//!   for ad-hoc filters
//! - [`change`] -- decide whether a new variable snapshot warrants a re-fetch
//!
//! The async orchestration that drives these lives in `panelkit-loader`.

pub mod change;
pub mod inject;
pub mod interval;
pub mod substitute;
pub mod types;

// ── Convenience re-exports ───────────────────────────────────────────

pub use change::{can_run, ChangeDetector, VariableChange};
pub use interval::{
    compute_interval, format_rate_interval, IntervalCalculator, IntervalResult, IntervalSpec,
    IntervalUnit, DEFAULT_SCRAPE_INTERVAL_SECS,
};
pub use substitute::{
    active_ad_hoc_filters, apply_ad_hoc_filters, build_query_metadata,
    substitute_time_and_bound_variables, Substitution, SubstitutionContext,
};
pub use types::{
    AdHocFilter, PanelSchema, QueryDefinition, QueryFields, QueryMetadata, QueryType,
    SubstitutionKind, SubstitutionRecord, TimeRange, TimeSelection, VariableBinding, VariableKind,
    VariableValue,
};
