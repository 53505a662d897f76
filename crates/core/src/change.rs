//! Variable change detection and the dependency gate.
//!
//! The detector keeps two baselines: the bound variables the panel's
//! queries depend on, and the flattened ad-hoc filter list. Each baseline
//! is a plain value copy, replaced wholesale only when a change is
//! confirmed.

use crate::substitute::active_ad_hoc_filters;
use crate::types::{AdHocFilter, QueryDefinition, VariableBinding};

/// Outcome of [`ChangeDetector::detect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableChange {
    pub bound: bool,
    pub ad_hoc: bool,
}

impl VariableChange {
    pub fn any(&self) -> bool {
        self.bound || self.ad_hoc
    }
}

/// Bound (non ad-hoc) variables whose `$name` token appears in at least one
/// of `queries`, in declaration order.
pub fn dependent_variables<'a>(
    variables: &'a [VariableBinding],
    queries: &[QueryDefinition],
) -> Vec<&'a VariableBinding> {
    variables
        .iter()
        .filter(|v| !v.is_ad_hoc())
        .filter(|v| {
            let token = v.token();
            queries.iter().any(|q| q.references(&token))
        })
        .collect()
}

/// The dependency gate: every bound variable referenced by the queries has
/// finished loading. Ad-hoc variables never block.
pub fn can_run(variables: &[VariableBinding], queries: &[QueryDefinition]) -> bool {
    dependent_variables(variables, queries)
        .iter()
        .all(|v| !v.is_loading)
}

/// A previous value only vouches for "unchanged" when it was non-empty.
fn unchanged(previous: Option<&str>, current: &str) -> bool {
    previous.is_some_and(|p| !p.is_empty() && p == current)
}

#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    last_bound: Vec<VariableBinding>,
    last_ad_hoc: Vec<AdHocFilter>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate both decisions against a new snapshot of the store.
    pub fn detect(
        &mut self,
        variables: &[VariableBinding],
        queries: &[QueryDefinition],
    ) -> VariableChange {
        VariableChange {
            bound: self.bound_changed(variables, queries),
            ad_hoc: self.ad_hoc_changed(variables),
        }
    }

    /// True when a dependent bound variable differs from the baseline.
    /// On change the baseline becomes the dependent subset only.
    pub fn bound_changed(
        &mut self,
        variables: &[VariableBinding],
        queries: &[QueryDefinition],
    ) -> bool {
        let dependent = dependent_variables(variables, queries);
        if dependent.is_empty() {
            return false;
        }

        let all_same = dependent.iter().all(|current| {
            let previous = self
                .last_bound
                .iter()
                .find(|p| p.name == current.name)
                .map(|p| p.value.as_text());
            unchanged(previous.as_deref(), &current.value.as_text())
        });
        if all_same {
            return false;
        }

        self.last_bound = dependent.into_iter().cloned().collect();
        true
    }

    /// True when the active ad-hoc filter list differs from the baseline:
    /// a different length, or a filter whose value or operator moved.
    pub fn ad_hoc_changed(&mut self, variables: &[VariableBinding]) -> bool {
        let current = active_ad_hoc_filters(variables);

        let changed = if current.len() != self.last_ad_hoc.len() {
            true
        } else {
            !current.iter().all(|filter| {
                let previous = self.last_ad_hoc.iter().find(|p| p.name == filter.name);
                unchanged(previous.map(|p| p.value.as_str()), &filter.value)
                    && previous.is_some_and(|p| p.operator == filter.operator)
            })
        };

        if changed {
            self.last_ad_hoc = current;
        }
        changed
    }

    pub fn last_bound(&self) -> &[VariableBinding] {
        &self.last_bound
    }

    pub fn last_ad_hoc(&self) -> &[AdHocFilter] {
        &self.last_ad_hoc
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
