use anyhow::Result;
use async_trait::async_trait;
use rand::RngExt;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::models::{Dashboard, SavedReport};
use crate::store::{ReportStore, StoreError, StoreResult};

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    format!("{:016x}", rng.random::<u64>())
}

fn now_secs() -> Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                config TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dashboards (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                layout TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_report(&self, name: &str, config: &str) -> Result<SavedReport> {
        let id = generate_id();
        let now = now_secs()?;

        sqlx::query(
            r#"
            INSERT INTO reports (id, name, config, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(config)
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(SavedReport {
            id,
            name: name.to_string(),
            config: config.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_reports(&self) -> Result<Vec<SavedReport>> {
        let reports = sqlx::query_as::<_, SavedReport>(
            r#"
            SELECT id, name, config, created_at, updated_at
            FROM reports
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(reports)
    }

    async fn get_report(&self, id: &str) -> Result<Option<SavedReport>> {
        let report = sqlx::query_as::<_, SavedReport>(
            r#"
            SELECT id, name, config, created_at, updated_at
            FROM reports
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(report)
    }

    async fn update_report(&self, id: &str, name: &str, config: &str) -> StoreResult<SavedReport> {
        let now = now_secs().map_err(StoreError::Other)?;

        let result = sqlx::query(
            r#"
            UPDATE reports
            SET name = ?, config = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(config)
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        self.get_report(id)
            .await
            .map_err(StoreError::Other)?
            .ok_or(StoreError::NotFound)
    }

    async fn delete_report(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_dashboard(&self, name: &str, layout: &str) -> Result<Dashboard> {
        let id = generate_id();
        let now = now_secs()?;

        sqlx::query(
            r#"
            INSERT INTO dashboards (id, name, layout, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(layout)
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(Dashboard {
            id,
            name: name.to_string(),
            layout: layout.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_dashboards(&self) -> Result<Vec<Dashboard>> {
        let dashboards = sqlx::query_as::<_, Dashboard>(
            r#"
            SELECT id, name, layout, created_at, updated_at
            FROM dashboards
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(dashboards)
    }

    async fn get_dashboard(&self, id: &str) -> Result<Option<Dashboard>> {
        let dashboard = sqlx::query_as::<_, Dashboard>(
            r#"
            SELECT id, name, layout, created_at, updated_at
            FROM dashboards
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(dashboard)
    }

    async fn update_dashboard(&self, id: &str, name: &str, layout: &str) -> StoreResult<Dashboard> {
        let now = now_secs().map_err(StoreError::Other)?;

        let result = sqlx::query(
            r#"
            UPDATE dashboards
            SET name = ?, layout = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(layout)
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        self.get_dashboard(id)
            .await
            .map_err(StoreError::Other)?
            .ok_or(StoreError::NotFound)
    }

    async fn delete_dashboard(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dashboards WHERE id = ?")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
