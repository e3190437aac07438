//! Dynamic value catalogs backing the filter/metric pickers: stage names,
//! countries, employee buckets, channels, event names, signal names.
//!
//! Catalogs come from DISTINCT queries through the engine and are cached
//! for a few minutes; the lists change rarely and the queries scan wide
//! tables.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::engine::{QueryEngine, QueryResult};
use crate::query::table_ref;

const CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_CAPACITY: u64 = 64;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsCatalog {
    pub stages: Vec<String>,
    pub countries: Vec<String>,
    pub employee_sizes: Vec<String>,
    pub channels: Vec<String>,
    pub event_names: Vec<String>,
    pub signals: Vec<String>,
}

pub struct OptionsService {
    engine: Arc<dyn QueryEngine>,
    project_id: String,
    cache: Cache<String, Arc<Vec<String>>>,
}

impl OptionsService {
    pub fn new(engine: Arc<dyn QueryEngine>, project_id: impl Into<String>) -> Self {
        Self {
            engine,
            project_id: project_id.into(),
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    pub async fn catalog(&self) -> QueryResult<OptionsCatalog> {
        let stages_table = table_ref(&self.project_id, "stages");
        let companies_table = table_ref(&self.project_id, "companies");
        let events_table = table_ref(&self.project_id, "events");

        Ok(OptionsCatalog {
            stages: self
                .distinct_values(format!(
                    "SELECT DISTINCT stage_name AS value FROM {stages_table} WHERE stage_name IS NOT NULL ORDER BY value"
                ))
                .await?,
            countries: self
                .distinct_values(format!(
                    "SELECT DISTINCT properties.country AS value FROM {companies_table} WHERE properties.country IS NOT NULL ORDER BY value"
                ))
                .await?,
            employee_sizes: self
                .distinct_values(format!(
                    "SELECT DISTINCT properties.number_of_employees AS value FROM {companies_table} WHERE properties.number_of_employees IS NOT NULL ORDER BY value"
                ))
                .await?,
            channels: self
                .distinct_values(format!(
                    "SELECT DISTINCT channel AS value FROM {events_table} WHERE channel IS NOT NULL ORDER BY value"
                ))
                .await?,
            event_names: self
                .distinct_values(format!(
                    "SELECT DISTINCT event_name AS value FROM {events_table} WHERE event_name IS NOT NULL ORDER BY value"
                ))
                .await?,
            signals: self
                .distinct_values(format!(
                    "SELECT DISTINCT signal_name AS value FROM {events_table} WHERE signal_name IS NOT NULL ORDER BY value"
                ))
                .await?,
        })
    }

    async fn distinct_values(&self, sql: String) -> QueryResult<Vec<String>> {
        let key = cache_key(&sql);
        if let Some(values) = self.cache.get(&key).await {
            return Ok(values.as_ref().clone());
        }

        debug!("Options cache miss, querying catalog");
        let rows = self.engine.execute(&sql).await?;
        let values: Vec<String> = rows
            .into_iter()
            .filter_map(|row| match row.get("value") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        self.cache.insert(key, Arc::new(values.clone())).await;
        Ok(values)
    }
}

fn cache_key(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryEngine for CountingEngine {
        async fn execute(&self, _sql: &str) -> QueryResult<Vec<crate::engine::Row>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut row = crate::engine::Row::new();
            row.insert("value".to_string(), Value::String("Paid Search".to_string()));
            Ok(vec![row])
        }
    }

    #[tokio::test]
    async fn repeated_catalog_calls_hit_the_cache() {
        let engine = Arc::new(CountingEngine {
            calls: AtomicUsize::new(0),
        });
        let service = OptionsService::new(engine.clone(), "proj");

        let first = service.catalog().await.unwrap();
        assert_eq!(first.channels, vec!["Paid Search".to_string()]);
        let calls_after_first = engine.calls.load(Ordering::SeqCst);

        let _second = service.catalog().await.unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), calls_after_first);
    }
}
