//! Persistence port for saved reports and dashboards.
//!
//! The query-builder core never touches this; only the HTTP layer does.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Dashboard, SavedReport};

mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Initialize the store (create tables, run migrations).
    async fn init(&self) -> Result<()>;

    async fn create_report(&self, name: &str, config: &str) -> Result<SavedReport>;
    async fn list_reports(&self) -> Result<Vec<SavedReport>>;
    async fn get_report(&self, id: &str) -> Result<Option<SavedReport>>;
    async fn update_report(&self, id: &str, name: &str, config: &str) -> StoreResult<SavedReport>;
    async fn delete_report(&self, id: &str) -> Result<bool>;

    async fn create_dashboard(&self, name: &str, layout: &str) -> Result<Dashboard>;
    async fn list_dashboards(&self) -> Result<Vec<Dashboard>>;
    async fn get_dashboard(&self, id: &str) -> Result<Option<Dashboard>>;
    async fn update_dashboard(&self, id: &str, name: &str, layout: &str) -> StoreResult<Dashboard>;
    async fn delete_dashboard(&self, id: &str) -> Result<bool>;
}
