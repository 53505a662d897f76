//! Data model shared by the substitution pipeline, the change detector and
//! the loader.
//!
//! Variable bindings and panel schemas are owned by external stores; the
//! types here are the snapshots the core reads. Everything derives
//! `Clone` so that baselines can be taken as plain value copies.

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

// ──────────────────────────────────────────────
// Time
// ──────────────────────────────────────────────

/// A resolved, valid time window. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: OffsetDateTime,
    end: OffsetDateTime,
}

impl TimeRange {
    /// Build a range, returning `None` when `start` is after `end`.
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(TimeRange { start, end })
    }

    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    /// Start instant as epoch milliseconds.
    pub fn start_millis(&self) -> i64 {
        epoch_millis(self.start)
    }

    /// End instant as epoch milliseconds.
    pub fn end_millis(&self) -> i64 {
        epoch_millis(self.end)
    }

    /// Width of the window in milliseconds.
    pub fn duration_millis(&self) -> i64 {
        self.end_millis() - self.start_millis()
    }
}

fn epoch_millis(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

/// The selection exposed by the time-range provider.
///
/// Either bound may be missing while the picker is still initialising.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSelection {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
}

impl TimeSelection {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        TimeSelection {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Resolve into a valid [`TimeRange`]. `None` means "not ready yet".
    pub fn resolve(&self) -> Option<TimeRange> {
        TimeRange::new(self.start?, self.end?)
    }
}

// ──────────────────────────────────────────────
// Variables
// ──────────────────────────────────────────────

/// Which store section a variable belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableKind {
    #[default]
    Scalar,
    AdHocFilters,
}

/// One `{name, operator, value}` triple of an ad-hoc filter variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdHocFilter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: String,
}

impl AdHocFilter {
    pub fn new(name: &str, operator: &str, value: &str) -> Self {
        AdHocFilter {
            name: name.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
        }
    }

    /// Entries with an empty name, operator or value are ignored everywhere.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.operator.is_empty() && !self.value.is_empty()
    }
}

/// The value carried by a binding: text for scalars, a filter list for
/// ad-hoc variables.
///
/// Scalar values are coerced to text on the way in: numbers and booleans
/// are rendered, multi-select lists are joined with `,`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VariableValue {
    Text(String),
    Filters(Vec<AdHocFilter>),
}

impl Default for VariableValue {
    fn default() -> Self {
        VariableValue::Text(String::new())
    }
}

impl VariableValue {
    /// Textual form used for literal substitution and comparison.
    pub fn as_text(&self) -> String {
        match self {
            VariableValue::Text(s) => s.clone(),
            VariableValue::Filters(_) => String::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<RawScalar>),
}

impl RawScalar {
    fn into_text(self) -> String {
        match self {
            RawScalar::Text(s) => s,
            RawScalar::Int(i) => i.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Bool(b) => b.to_string(),
            RawScalar::List(items) => items
                .into_iter()
                .map(RawScalar::into_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl<'de> Deserialize<'de> for VariableValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Filters(Vec<AdHocFilter>),
            Scalar(RawScalar),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Filters(filters) => VariableValue::Filters(filters),
            Repr::Scalar(raw) => VariableValue::Text(raw.into_text()),
        })
    }
}

/// A snapshot of one variable in the external variable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBinding {
    pub name: String,
    #[serde(default)]
    pub kind: VariableKind,
    #[serde(default)]
    pub value: VariableValue,
    #[serde(default)]
    pub is_loading: bool,
}

impl VariableBinding {
    pub fn scalar(name: &str, value: &str) -> Self {
        VariableBinding {
            name: name.to_string(),
            kind: VariableKind::Scalar,
            value: VariableValue::Text(value.to_string()),
            is_loading: false,
        }
    }

    pub fn ad_hoc(name: &str, filters: Vec<AdHocFilter>) -> Self {
        VariableBinding {
            name: name.to_string(),
            kind: VariableKind::AdHocFilters,
            value: VariableValue::Filters(filters),
            is_loading: false,
        }
    }

    /// Mark the binding as still resolving its value.
    pub fn loading(mut self) -> Self {
        self.is_loading = true;
        self
    }

    pub fn is_ad_hoc(&self) -> bool {
        self.kind == VariableKind::AdHocFilters
    }

    /// The `$name` token this variable is referenced by.
    pub fn token(&self) -> String {
        format!("${}", self.name)
    }

    /// Filters of an ad-hoc binding; empty for scalars.
    pub fn filters(&self) -> &[AdHocFilter] {
        match (&self.kind, &self.value) {
            (VariableKind::AdHocFilters, VariableValue::Filters(filters)) => filters,
            _ => &[],
        }
    }
}

// ──────────────────────────────────────────────
// Panel schema
// ──────────────────────────────────────────────

/// Query dialect of a panel. Decides both the ad-hoc injection style and
/// which execution-service call is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Sql,
    Promql,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Sql => "sql",
            QueryType::Promql => "promql",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFields {
    #[serde(default = "default_stream_type")]
    pub stream_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

fn default_stream_type() -> String {
    "logs".to_string()
}

impl Default for QueryFields {
    fn default() -> Self {
        QueryFields {
            stream_type: default_stream_type(),
            stream: None,
        }
    }
}

/// One sub-query of a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub query: String,
    #[serde(default)]
    pub fields: QueryFields,
}

impl QueryDefinition {
    pub fn new(query: &str) -> Self {
        QueryDefinition {
            query: query.to_string(),
            fields: QueryFields::default(),
        }
    }

    /// True when the query text contains `token` literally.
    pub fn references(&self, token: &str) -> bool {
        self.query.contains(token)
    }
}

/// The panel definition the loader evaluates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSchema {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default)]
    pub queries: Vec<QueryDefinition>,
}

impl PanelSchema {
    pub fn new(id: &str, query_type: QueryType, queries: Vec<QueryDefinition>) -> Self {
        PanelSchema {
            id: id.to_string(),
            query_type,
            queries,
        }
    }

    /// At least one sub-query carries non-blank text.
    pub fn has_runnable_query(&self) -> bool {
        self.queries.iter().any(|q| !q.query.trim().is_empty())
    }
}

// ──────────────────────────────────────────────
// Substitution ledger
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubstitutionKind {
    /// A computed time-bucket variable.
    Fixed,
    /// A user-bound scalar variable.
    Variable,
    /// An ad-hoc filter.
    DynamicVariable,
}

/// One entry of the substitution ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRecord {
    #[serde(rename = "type")]
    pub kind: SubstitutionKind,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

impl SubstitutionRecord {
    pub fn fixed(name: &str, value: &str) -> Self {
        SubstitutionRecord {
            kind: SubstitutionKind::Fixed,
            name: name.to_string(),
            value: value.to_string(),
            operator: None,
        }
    }

    pub fn variable(name: &str, value: &str) -> Self {
        SubstitutionRecord {
            kind: SubstitutionKind::Variable,
            name: name.to_string(),
            value: value.to_string(),
            operator: None,
        }
    }

    pub fn dynamic(filter: &AdHocFilter) -> Self {
        SubstitutionRecord {
            kind: SubstitutionKind::DynamicVariable,
            name: filter.name.clone(),
            value: filter.value.clone(),
            operator: Some(filter.operator.clone()),
        }
    }
}

/// Per-sub-query provenance: what was asked, what was executed, and which
/// variables were applied on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub original_query: String,
    pub query: String,
    pub start_time: i64,
    pub end_time: i64,
    pub query_type: QueryType,
    pub variables: Vec<SubstitutionRecord>,
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
