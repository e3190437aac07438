//! Query builder for the outcome-analysis archetype: pipeline/stage-funnel
//! metrics from the `stages` fact table, optionally joined to `companies`.

use crate::models::{
    ChartConfig, ChartVariant, KpiCard, OutcomeDataConfig, ReportConfig, SegmentProperty,
};
use crate::query::fragments::{quoted_list, time_period_to_date_clause, TimePeriod};
use crate::query::metric::{outcome_aggregate, OutcomeMetric};
use crate::query::table_ref;

/// Segmentation bar charts keep the top segments by the primary metric;
/// later segments are dropped, not merged into an "other" bucket.
pub const SEGMENT_ROW_LIMIT: usize = 10;

/// Segmented time-series charts only plot the top segments by
/// whole-period value.
pub const TOP_SEGMENT_LIMIT: usize = 5;

pub struct OutcomeQueryBuilder {
    data: OutcomeDataConfig,
    chart: ChartConfig,
    kpi_cards: Vec<KpiCard>,
    from_clause: String,
    where_clause: String,
}

impl OutcomeQueryBuilder {
    pub fn new(project_id: &str, config: &ReportConfig) -> Self {
        let data = config.outcome_data();
        let chart = config.chart_config();

        // The companies join costs a fan-out risk; add it only when a
        // company attribute is actually consumed.
        let needs_company_join = !data.selected_countries.is_empty()
            || !data.selected_employee_sizes.is_empty()
            || data.report_focus.is_segmentation()
            || chart.variant == ChartVariant::TimeSeriesSegmented;

        let mut from_clause = format!("FROM {} s", table_ref(project_id, "stages"));
        if needs_company_join {
            from_clause.push_str(&format!(
                "\nLEFT JOIN {} c ON s.company_id = c.id",
                table_ref(project_id, "companies")
            ));
        }

        let period = TimePeriod::parse(&data.time_period);
        let mut conditions = vec![time_period_to_date_clause(period, "s.timestamp")];
        if !data.selected_countries.is_empty() {
            conditions.push(format!(
                "c.properties.country IN ({})",
                quoted_list(&data.selected_countries)
            ));
        }
        if !data.selected_employee_sizes.is_empty() {
            conditions.push(format!(
                "c.properties.number_of_employees IN ({})",
                quoted_list(&data.selected_employee_sizes)
            ));
        }
        let where_clause = format!("WHERE {}", conditions.join("\n  AND "));

        OutcomeQueryBuilder {
            data,
            chart,
            kpi_cards: config.kpi_cards.clone(),
            from_clause,
            where_clause,
        }
    }

    /// Single-row SELECT with one aggregate per KPI card. Empty string when
    /// no cards are configured (caller skips execution).
    pub fn build_kpi_query(&self) -> String {
        let selects: Vec<String> = self
            .kpi_cards
            .iter()
            .filter_map(|card| OutcomeMetric::parse(&card.metric))
            .map(|metric| {
                format!("{} AS `{}`", outcome_aggregate(&metric, "s"), metric.to_key())
            })
            .collect();
        if selects.is_empty() {
            return String::new();
        }

        format!(
            "SELECT\n  {}\n{}\n{}",
            selects.join(",\n  "),
            self.from_clause,
            self.where_clause
        )
    }

    pub fn build_chart_query(&self) -> String {
        if self.data.report_focus.is_segmentation() {
            self.build_segmentation_query()
        } else if self.chart.variant == ChartVariant::TimeSeriesSegmented {
            self.build_time_series_segmented_query()
        } else {
            self.build_time_series_multi_metric_query()
        }
    }

    fn segment_column(&self) -> &'static str {
        match self.chart.breakdown {
            SegmentProperty::CompanyCountry => "c.properties.country",
            _ => "c.properties.number_of_employees",
        }
    }

    fn chart_metrics(&self) -> Vec<OutcomeMetric> {
        self.chart
            .metrics
            .iter()
            .filter_map(|key| OutcomeMetric::parse(key))
            .collect()
    }

    /// One row per segment, every selected metric aggregated, top segments
    /// by the first selected metric.
    fn build_segmentation_query(&self) -> String {
        let metrics = self.chart_metrics();
        let Some(first) = metrics.first() else {
            return String::new();
        };
        let order_key = first.to_key();
        let column = self.segment_column();

        let selects: Vec<String> = metrics
            .iter()
            .map(|m| format!("{} AS `{}`", outcome_aggregate(m, "s"), m.to_key()))
            .collect();

        format!(
            "SELECT\n  {column} AS segment,\n  {selects}\n{from}\n{where_sql}\n\
             GROUP BY segment\nHAVING segment IS NOT NULL\n\
             ORDER BY `{order_key}` DESC\nLIMIT {SEGMENT_ROW_LIMIT}",
            selects = selects.join(",\n  "),
            from = self.from_clause,
            where_sql = self.where_clause,
        )
    }

    /// Two-stage query: whole-period top segments first, then monthly
    /// values inner-joined so only those segments appear.
    fn build_time_series_segmented_query(&self) -> String {
        let Some(metric) = self
            .chart
            .metric
            .as_deref()
            .and_then(OutcomeMetric::parse)
        else {
            return String::new();
        };
        let column = self.segment_column();
        let aggregate = outcome_aggregate(&metric, "s");

        format!(
            "WITH TopSegments AS (\n\
             \x20 SELECT {column} AS segment, {aggregate} AS total_value\n\
             \x20 {from}\n\
             \x20 {where_sql}\n\
             \x20   AND {column} IS NOT NULL\n\
             \x20 GROUP BY segment\n\
             \x20 ORDER BY total_value DESC\n\
             \x20 LIMIT {TOP_SEGMENT_LIMIT}\n\
             ),\n\
             MonthlyData AS (\n\
             \x20 SELECT\n\
             \x20   FORMAT_TIMESTAMP('%Y-%m', s.timestamp) AS month,\n\
             \x20   {column} AS segment,\n\
             \x20   {aggregate} AS value\n\
             \x20 {from}\n\
             \x20 {where_sql}\n\
             \x20 GROUP BY month, segment\n\
             )\n\
             SELECT m.month, m.segment, m.value\n\
             FROM MonthlyData m\n\
             INNER JOIN TopSegments t ON m.segment = t.segment\n\
             ORDER BY m.month ASC, m.segment ASC",
            from = self.from_clause.replace('\n', "\n  "),
            where_sql = self.where_clause.replace('\n', "\n  "),
        )
    }

    /// One column per selected metric, grouped by month only.
    fn build_time_series_multi_metric_query(&self) -> String {
        let metrics = self.chart_metrics();
        if metrics.is_empty() {
            return String::new();
        }

        let selects: Vec<String> = metrics
            .iter()
            .map(|m| format!("{} AS `{}`", outcome_aggregate(m, "s"), m.to_key()))
            .collect();

        format!(
            "SELECT\n  FORMAT_TIMESTAMP('%Y-%m', s.timestamp) AS month,\n  {selects}\n\
             {from}\n{where_sql}\nGROUP BY month\nORDER BY month ASC",
            selects = selects.join(",\n  "),
            from = self.from_clause,
            where_sql = self.where_clause,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(data: serde_json::Value, chart: serde_json::Value, cards: &[&str]) -> ReportConfig {
        serde_json::from_value(json!({
            "reportArchetype": "outcome_analysis",
            "dataConfig": data,
            "chart": chart,
            "kpiCards": cards
                .iter()
                .enumerate()
                .map(|(i, m)| json!({ "id": format!("card-{i}"), "metric": m }))
                .collect::<Vec<_>>(),
        }))
        .unwrap()
    }

    #[test]
    fn kpi_query_empty_without_cards() {
        let builder = OutcomeQueryBuilder::new("proj", &config(json!({}), json!({}), &[]));
        assert_eq!(builder.build_kpi_query(), "");
    }

    #[test]
    fn kpi_query_counts_deals_without_company_join() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(json!({ "timePeriod": "this_year" }), json!({}), &["SQL_deals"]),
        );
        let sql = builder.build_kpi_query();
        assert_eq!(
            sql.matches("COUNT(DISTINCT CASE WHEN s.stage_name = 'SQL' THEN s.id END)")
                .count(),
            1
        );
        assert!(!sql.contains("LEFT JOIN"));
        assert!(!sql.contains("companies"));
    }

    #[test]
    fn value_metric_uses_sum_case() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(json!({}), json!({}), &["Won_value"]),
        );
        let sql = builder.build_kpi_query();
        assert!(sql.contains("SUM(CASE WHEN s.stage_name = 'Won' THEN s.value ELSE 0 END)"));
    }

    #[test]
    fn country_filter_forces_company_join() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(
                json!({ "selectedCountries": ["Germany"], "reportFocus": "time_series" }),
                json!({}),
                &["SQL_deals"],
            ),
        );
        let sql = builder.build_kpi_query();
        assert!(sql.contains("LEFT JOIN `proj.analytics.companies` c ON s.company_id = c.id"));
        assert!(sql.contains("c.properties.country IN ('Germany')"));
    }

    #[test]
    fn filter_values_are_sanitized() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(
                json!({ "selectedCountries": ["Côte d'Ivoire"] }),
                json!({}),
                &["SQL_deals"],
            ),
        );
        let sql = builder.build_kpi_query();
        assert!(sql.contains("Côte d\\'Ivoire"));
    }

    #[test]
    fn segmentation_chart_caps_at_ten_ordered_by_first_metric() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(
                json!({ "reportFocus": "segmentation" }),
                json!({
                    "variant": "segmentation_bar",
                    "metrics": ["SQL_deals", "Won_value"],
                    "breakdown": "companyCountry"
                }),
                &[],
            ),
        );
        let sql = builder.build_chart_query();
        assert!(sql.contains("c.properties.country AS segment"));
        assert!(sql.contains("HAVING segment IS NOT NULL"));
        assert!(sql.contains("ORDER BY `SQL_deals` DESC"));
        assert!(sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn segmented_time_series_inner_joins_top_five() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(
                json!({ "reportFocus": "time_series" }),
                json!({
                    "variant": "time_series_segmented",
                    "metric": "SQL_deals",
                    "breakdown": "numberOfEmployees"
                }),
                &[],
            ),
        );
        let sql = builder.build_chart_query();
        assert!(sql.contains("WITH TopSegments AS ("));
        assert!(sql.contains("LIMIT 5"));
        assert!(sql.contains("INNER JOIN TopSegments t ON m.segment = t.segment"));
        // Single-segmented variant forces the company join.
        assert!(sql.contains("LEFT JOIN `proj.analytics.companies`"));
    }

    #[test]
    fn multi_metric_time_series_groups_by_month_only() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(
                json!({}),
                json!({ "variant": "time_series_line", "metrics": ["SQL_deals", "SQL_value"] }),
                &[],
            ),
        );
        let sql = builder.build_chart_query();
        assert!(sql.contains("GROUP BY month"));
        assert!(sql.contains("ORDER BY month ASC"));
        assert!(!sql.contains("segment"));
    }

    #[test]
    fn chart_query_empty_without_metrics() {
        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(json!({ "reportFocus": "segmentation" }), json!({ "metrics": [] }), &[]),
        );
        assert_eq!(builder.build_chart_query(), "");

        let builder = OutcomeQueryBuilder::new(
            "proj",
            &config(json!({}), json!({ "variant": "time_series_segmented" }), &[]),
        );
        assert_eq!(builder.build_chart_query(), "");
    }
}
