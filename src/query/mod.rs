//! Dynamic SQL query construction.
//!
//! Report configurations are translated into BigQuery SQL here. Builders
//! are constructed per request from an immutable config, produce at most
//! two query strings (KPI, chart), and hold no other state. An empty
//! string means "nothing selected, skip execution".

pub mod engagement;
pub mod fragments;
pub mod metric;
pub mod outcome;

pub use engagement::EngagementQueryBuilder;
pub use outcome::OutcomeQueryBuilder;

/// Fully-qualified table reference within the analytics dataset.
pub(crate) fn table_ref(project_id: &str, name: &str) -> String {
    format!("`{project_id}.analytics.{name}`")
}
