//! The published state of a panel loader.

use panelkit_core::QueryMetadata;
use serde::{Deserialize, Serialize};

/// Result of one successful sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Series payload of a metrics range query.
    Series(serde_json::Value),
    /// Rows of a search.
    Hits(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadMetadata {
    pub queries: Vec<QueryMetadata>,
}

/// What a panel renders from.
///
/// `data` and `metadata.queries` are index-aligned with the panel's
/// sub-queries. A failed sub-query leaves `None` at its index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadState {
    pub data: Vec<Option<QueryResult>>,
    pub loading: bool,
    pub error_detail: String,
    pub metadata: LoadMetadata,
}

impl LoadState {
    pub fn has_error(&self) -> bool {
        !self.error_detail.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle_and_empty() {
        let state = LoadState::default();
        assert!(state.data.is_empty());
        assert!(!state.loading);
        assert!(!state.has_error());
        assert!(state.metadata.queries.is_empty());
    }

    #[test]
    fn serializes_in_camel_case() {
        let state = LoadState {
            data: vec![Some(QueryResult::Hits(vec![serde_json::json!({"n": 1})])), None],
            loading: false,
            error_detail: "boom".to_string(),
            metadata: LoadMetadata::default(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["errorDetail"], "boom");
        assert_eq!(json["data"][0][0]["n"], 1);
        assert!(json["data"][1].is_null());
    }
}
