use serde::{Deserialize, Serialize};

/// A report configuration saved for reuse on dashboards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SavedReport {
    pub id: String,
    pub name: String,
    /// Full `ReportConfig` as JSON text; opaque to the store.
    pub config: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A dashboard arranging saved reports. Layout is opaque JSON
/// (grid placement is a client concern).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dashboard {
    pub id: String,
    pub name: String,
    pub layout: String,
    pub created_at: i64,
    pub updated_at: i64,
}
