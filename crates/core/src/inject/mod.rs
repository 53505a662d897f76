//! Ad-hoc filter injection.
//!
//! Ad-hoc filters are not substituted as text. They are pushed into the
//! query structurally: as label matchers for promql and as `WHERE`
//! predicates for SQL. Both injectors are idempotent: applying the same
//! filter twice yields the same text as applying it once.

pub mod promql;
pub mod sql;
