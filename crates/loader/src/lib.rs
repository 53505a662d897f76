//! Data loading engine for dashboard panels.
//!
//! A [`PanelLoader`] owns the fetch lifecycle of one panel: it decides when
//! to fetch (visibility, dirty tracking, variable readiness), rewrites each
//! sub-query through the `panelkit-core` pipeline, fans the calls out to a
//! [`QueryExecutor`] and publishes an aggregate [`LoadState`].
//!
//! Executors:
//! - [`HttpExecutor`] -- the query service over HTTP
//! - [`StaticExecutor`] -- scripted responses
//!
//! Configuration is read from TOML by [`PanelConfig`].

pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod state;
pub mod visibility;

pub use config::{LoaderConfig, PanelConfig, ServiceConfig, AUTH_TOKEN_ENV};
pub use error::{ConfigError, ExecutionError};
pub use executor::http::HttpExecutor;
pub use executor::static_executor::{ExecutorCall, StaticExecutor};
pub use executor::{
    truncate_error, MetricsRangeRequest, QueryExecutor, SearchQuery, SearchRequest,
};
pub use loader::{AttemptOutcome, Decision, PanelEvent, PanelLoader, PreparedAttempt, SkipReason};
pub use state::{LoadMetadata, LoadState, QueryResult};
pub use visibility::{IntersectionEntry, ObserverOptions, VisibilityHandle, VisibilityTracker};
