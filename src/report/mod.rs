//! Report orchestration: archetype dispatch, query execution, result
//! shaping. Builders hold no shared state; one orchestrator instance
//! serves all requests.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::engine::{QueryEngine, QueryResult, Row};
use crate::models::{ReportConfig, ENGAGEMENT_ANALYSIS, OUTCOME_ANALYSIS};
use crate::query::{EngagementQueryBuilder, OutcomeQueryBuilder};

/// The two generated SQL strings. Empty string means "nothing selected,
/// skip execution".
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQueries {
    pub kpi_query: String,
    pub chart_query: String,
}

/// Dispatch on the report archetype. An unrecognized archetype degrades to
/// two empty queries rather than an error.
pub fn build_queries(
    project_id: &str,
    config: &ReportConfig,
    apply_session_filters: bool,
) -> GeneratedQueries {
    match config.report_archetype.as_str() {
        OUTCOME_ANALYSIS => {
            let builder = OutcomeQueryBuilder::new(project_id, config);
            GeneratedQueries {
                kpi_query: builder.build_kpi_query(),
                chart_query: builder.build_chart_query(),
            }
        }
        ENGAGEMENT_ANALYSIS => {
            let builder = EngagementQueryBuilder::new(project_id, config, apply_session_filters);
            GeneratedQueries {
                kpi_query: builder.build_kpi_query(),
                chart_query: builder.build_chart_query(),
            }
        }
        other => {
            debug!("Unrecognized report archetype '{other}', producing no queries");
            GeneratedQueries::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResult {
    /// Single KPI row (empty object when no KPI query ran or it returned
    /// no rows).
    pub kpi_data: Row,
    /// Chart rows in result order.
    pub chart_data: Vec<Row>,
    /// Generated SQL, echoed for debugging. Diagnostic only, not a stable
    /// contract.
    pub queries: GeneratedQueries,
}

pub struct ReportOrchestrator {
    engine: Arc<dyn QueryEngine>,
    project_id: String,
    apply_session_filters: bool,
}

impl ReportOrchestrator {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        project_id: impl Into<String>,
        apply_session_filters: bool,
    ) -> Self {
        Self {
            engine,
            project_id: project_id.into(),
            apply_session_filters,
        }
    }

    /// Build and execute both queries for a report configuration.
    /// Execution errors from the engine propagate unmasked.
    pub async fn run(&self, config: &ReportConfig) -> QueryResult<ReportResult> {
        let queries = build_queries(&self.project_id, config, self.apply_session_filters);

        let kpi_data = if queries.kpi_query.is_empty() {
            Row::new()
        } else {
            self.engine
                .execute(&queries.kpi_query)
                .await?
                .into_iter()
                .next()
                .unwrap_or_default()
        };

        let chart_data = if queries.chart_query.is_empty() {
            Vec::new()
        } else {
            self.engine.execute(&queries.chart_query).await?
        };

        Ok(ReportResult {
            kpi_data,
            chart_data,
            queries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unrecognized_archetype_produces_empty_queries() {
        let config: ReportConfig = serde_json::from_value(json!({
            "reportArchetype": "competitor_analysis",
            "kpiCards": [{ "id": "a", "metric": "sessions" }]
        }))
        .unwrap();
        let queries = build_queries("proj", &config, false);
        assert_eq!(queries.kpi_query, "");
        assert_eq!(queries.chart_query, "");
    }

    #[test]
    fn missing_archetype_produces_empty_queries() {
        let config: ReportConfig = serde_json::from_value(json!({})).unwrap();
        let queries = build_queries("proj", &config, false);
        assert_eq!(queries.kpi_query, "");
        assert_eq!(queries.chart_query, "");
    }
}
