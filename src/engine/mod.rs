//! Query-execution collaborator boundary.
//!
//! The builders produce SQL text; an engine runs it and returns an ordered
//! sequence of rows. The core never retries — execution errors surface to
//! the caller unmasked.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

mod bigquery;

pub use bigquery::BigQueryEngine;

/// One result row: column name → JSON value, in schema order where the
/// underlying engine preserves it.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum QueryError {
    /// The engine rejected or failed the query (malformed SQL, missing
    /// table, permission error, timeout).
    #[error("query execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type QueryResult<T> = Result<T, QueryError>;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute a SQL statement and return its rows in result order.
    async fn execute(&self, sql: &str) -> QueryResult<Vec<Row>>;
}
