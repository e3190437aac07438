//! Query builder for the engagement-analysis archetype.
//!
//! Three independent metric categories are combined per query:
//! - base: session/event/contact/company counts from the events table,
//! - influenced: deals touched by any session, via `UNNEST(e.stages)`,
//!   deduplicated by deal id so a deal touched by several events in the
//!   same session counts once,
//! - attributed: weighted deal credit from the attribution table under the
//!   fixed model name.
//!
//! Every category counts against the same `FilteredSessions` population. A
//! category with no selected metrics contributes no CTE at all (never a
//! NULL column block).

use crate::models::{
    ChartConfig, ChartVariant, EngagementDataConfig, KpiCard, ReportConfig, SegmentProperty,
};
use crate::query::fragments::{
    funnel_length_clause, quoted_list, sanitize, time_period_to_date_clause,
    time_period_to_date_range, TimePeriod,
};
use crate::query::metric::{
    attributed_aggregate, base_aggregate, influenced_aggregate, MetricCategory, MetricId,
    MetricKind,
};
use crate::query::table_ref;

/// Fixed attribution model; other models in the table are ignored.
pub const ATTRIBUTION_MODEL: &str = "Data-Driven";

/// Segmentation charts keep this many segments.
pub const SEGMENT_ROW_LIMIT: usize = 10;

/// Segmented time-series charts keep this many segments. Deliberately
/// different from the segmentation-bar cutoff above.
pub const TOP_SEGMENT_LIMIT: usize = 5;

pub struct EngagementQueryBuilder {
    project_id: String,
    data: EngagementDataConfig,
    chart: ChartConfig,
    kpi_cards: Vec<KpiCard>,
    /// When false (the default), channel/event/signal/URL filters are
    /// computed but left out of the session WHERE clause, matching the
    /// long-standing observed behavior. See `apply_session_filters` in the
    /// service config.
    apply_session_filters: bool,
}

/// KPI-card metrics sorted into their categories, deduplicated,
/// selection order preserved.
#[derive(Debug, Default)]
struct CategorizedMetrics {
    base: Vec<MetricKind>,
    influenced: Vec<(String, MetricKind)>,
    attributed: Vec<String>,
}

impl CategorizedMetrics {
    fn collect<'a>(keys: impl Iterator<Item = &'a str>) -> Self {
        let mut cats = CategorizedMetrics::default();
        for key in keys {
            let Some(metric) = MetricId::parse_engagement(key) else {
                continue;
            };
            match metric.category {
                MetricCategory::Base => {
                    if !cats.base.contains(&metric.kind) {
                        cats.base.push(metric.kind);
                    }
                }
                MetricCategory::Influenced => {
                    let stage = metric.stage.unwrap_or_default();
                    if !cats.influenced.contains(&(stage.clone(), metric.kind)) {
                        cats.influenced.push((stage, metric.kind));
                    }
                }
                MetricCategory::Attributed => {
                    let stage = metric.stage.unwrap_or_default();
                    if !cats.attributed.contains(&stage) {
                        cats.attributed.push(stage);
                    }
                }
            }
        }
        cats
    }

    fn is_empty(&self) -> bool {
        self.base.is_empty() && self.influenced.is_empty() && self.attributed.is_empty()
    }

    fn influenced_stages(&self) -> Vec<String> {
        let mut stages = Vec::new();
        for (stage, _) in &self.influenced {
            if !stages.contains(stage) {
                stages.push(stage.clone());
            }
        }
        stages
    }
}

impl EngagementQueryBuilder {
    pub fn new(project_id: &str, config: &ReportConfig, apply_session_filters: bool) -> Self {
        EngagementQueryBuilder {
            project_id: project_id.to_string(),
            data: config.engagement_data(),
            chart: config.chart_config(),
            kpi_cards: config.kpi_cards.clone(),
            apply_session_filters,
        }
    }

    fn events_table(&self) -> String {
        table_ref(&self.project_id, "events")
    }

    fn companies_table(&self) -> String {
        table_ref(&self.project_id, "companies")
    }

    fn attribution_table(&self) -> String {
        table_ref(&self.project_id, "attribution")
    }

    /// Session-level filter clauses from the data config. Computed for
    /// every query but only appended to the WHERE clause when
    /// `apply_session_filters` is set.
    fn session_filter_clauses(&self) -> Vec<String> {
        let mut clauses = Vec::new();
        if !self.data.selected_channels.is_empty() {
            clauses.push(format!(
                "e.channel IN ({})",
                quoted_list(&self.data.selected_channels)
            ));
        }
        if !self.data.selected_event_names.is_empty() {
            clauses.push(format!(
                "e.event_name IN ({})",
                quoted_list(&self.data.selected_event_names)
            ));
        }
        if !self.data.selected_signals.is_empty() {
            clauses.push(format!(
                "e.signal_name IN ({})",
                quoted_list(&self.data.selected_signals)
            ));
        }
        if !self.data.url_contains.is_empty() {
            clauses.push(format!(
                "STRPOS(e.page_url, '{}') > 0",
                sanitize(&self.data.url_contains)
            ));
        }
        clauses
    }

    /// WHERE clause bounding events to the report time window.
    pub fn build_where_clause(&self) -> String {
        let period = TimePeriod::parse(&self.data.time_period);
        let mut conditions = vec![time_period_to_date_clause(period, "e.timestamp")];
        let filters = self.session_filter_clauses();
        if self.apply_session_filters {
            conditions.extend(filters);
        }
        format!("WHERE {}", conditions.join("\n  AND "))
    }

    fn funnel_clause(&self, touch_col: &str, stage_col: &str) -> String {
        funnel_length_clause(self.data.funnel_length, touch_col, stage_col)
    }

    /// Distinct session ids inside the time window; every metric category
    /// is scoped to this exact population.
    fn filtered_sessions_cte(&self) -> String {
        format!(
            "FilteredSessions AS (\n  SELECT DISTINCT e.session_id\n  FROM {} e\n  {}\n)",
            self.events_table(),
            self.build_where_clause().replace('\n', "\n  "),
        )
    }

    fn base_metrics_cte(&self, kinds: &[MetricKind]) -> String {
        let selects: Vec<String> = kinds
            .iter()
            .map(|kind| {
                format!(
                    "{} AS `{}`",
                    base_aggregate(*kind, "e"),
                    MetricId::base(*kind).to_key()
                )
            })
            .collect();
        format!(
            "BaseMetrics AS (\n  SELECT\n    {}\n  FROM {} e\n  \
             WHERE e.session_id IN (SELECT session_id FROM FilteredSessions)\n)",
            selects.join(",\n    "),
            self.events_table(),
        )
    }

    /// Deal rows per requested stage, deduplicated by deal id. UNION ALL
    /// per stage under a DISTINCT, so a deal reached through multiple
    /// events in the window counts once per stage.
    fn unique_influenced_deals_cte(&self, stages: &[String]) -> String {
        let funnel = self.funnel_clause("e.timestamp", "d.timestamp");
        let arms: Vec<String> = stages
            .iter()
            .map(|stage| {
                let mut arm = format!(
                    "    SELECT d.stage_name AS stage_name, d.deal_id AS deal_id, d.deal_value AS deal_value\n    \
                     FROM {} e, UNNEST(e.stages) AS d\n    \
                     WHERE e.session_id IN (SELECT session_id FROM FilteredSessions)\n      \
                     AND d.stage_name = '{}'",
                    self.events_table(),
                    sanitize(stage),
                );
                if !funnel.is_empty() {
                    arm.push_str(&format!("\n      AND {funnel}"));
                }
                arm
            })
            .collect();
        format!(
            "UniqueInfluencedDeals AS (\n  SELECT DISTINCT stage_name, deal_id, deal_value FROM (\n{}\n  )\n)",
            arms.join("\n    UNION ALL\n"),
        )
    }

    fn aggregated_influenced_cte(&self, metrics: &[(String, MetricKind)]) -> String {
        let selects: Vec<String> = metrics
            .iter()
            .map(|(stage, kind)| {
                format!(
                    "{} AS `{}`",
                    influenced_aggregate(stage, *kind),
                    MetricId::influenced(stage.clone(), *kind).to_key()
                )
            })
            .collect();
        format!(
            "AggregatedInfluenced AS (\n  SELECT\n    {}\n  FROM UniqueInfluencedDeals\n)",
            selects.join(",\n    "),
        )
    }

    fn aggregated_attributed_cte(&self, stages: &[String]) -> String {
        let selects: Vec<String> = stages
            .iter()
            .map(|stage| {
                format!(
                    "{} AS `{}`",
                    attributed_aggregate(stage, "a"),
                    MetricId::attributed(stage.clone()).to_key()
                )
            })
            .collect();
        let mut conditions = vec![
            format!("a.attribution_model = '{ATTRIBUTION_MODEL}'"),
            "a.session_id IN (SELECT session_id FROM FilteredSessions)".to_string(),
        ];
        let funnel = self.funnel_clause("a.touch_timestamp", "a.stage_timestamp");
        if !funnel.is_empty() {
            conditions.push(funnel);
        }
        format!(
            "AggregatedAttributed AS (\n  SELECT\n    {}\n  FROM {} a\n  WHERE {}\n)",
            selects.join(",\n    "),
            self.attribution_table(),
            conditions.join("\n    AND "),
        )
    }

    /// Single combined row: each present category contributes one
    /// single-row CTE, cross-joined at the end.
    pub fn build_kpi_query(&self) -> String {
        let cats = CategorizedMetrics::collect(self.kpi_cards.iter().map(|c| c.metric.as_str()));
        if cats.is_empty() {
            return String::new();
        }

        let mut ctes = vec![self.filtered_sessions_cte()];
        let mut columns: Vec<String> = Vec::new();
        let mut sources: Vec<&str> = Vec::new();

        if !cats.base.is_empty() {
            ctes.push(self.base_metrics_cte(&cats.base));
            for kind in &cats.base {
                let key = MetricId::base(*kind).to_key();
                columns.push(format!("b.`{key}` AS `{key}`"));
            }
            sources.push("BaseMetrics b");
        }
        if !cats.influenced.is_empty() {
            ctes.push(self.unique_influenced_deals_cte(&cats.influenced_stages()));
            ctes.push(self.aggregated_influenced_cte(&cats.influenced));
            for (stage, kind) in &cats.influenced {
                let key = MetricId::influenced(stage.clone(), *kind).to_key();
                columns.push(format!("i.`{key}` AS `{key}`"));
            }
            sources.push("AggregatedInfluenced i");
        }
        if !cats.attributed.is_empty() {
            ctes.push(self.aggregated_attributed_cte(&cats.attributed));
            for stage in &cats.attributed {
                let key = MetricId::attributed(stage.clone()).to_key();
                columns.push(format!("a.`{key}` AS `{key}`"));
            }
            sources.push("AggregatedAttributed a");
        }

        format!(
            "WITH {}\nSELECT\n  {}\nFROM {}",
            ctes.join(",\n"),
            columns.join(",\n  "),
            sources.join("\nCROSS JOIN "),
        )
    }

    pub fn build_chart_query(&self) -> String {
        if self.data.report_focus.is_segmentation() {
            self.build_segmentation_multi_metric_query()
        } else if self.chart.variant == ChartVariant::TimeSeriesSegmented {
            self.build_time_series_single_metric_query()
        } else {
            self.build_time_series_multi_metric_query()
        }
    }

    fn segment_column(&self) -> &'static str {
        match self.chart.breakdown {
            SegmentProperty::Channel => "e.channel",
            SegmentProperty::CompanyCountry => "c.properties.country",
            _ => "c.properties.number_of_employees",
        }
    }

    fn segment_needs_company_join(&self) -> bool {
        !matches!(self.chart.breakdown, SegmentProperty::Channel)
    }

    /// FilteredSessions variant carrying the segment value per session.
    fn segmented_sessions_cte(&self) -> String {
        let mut from = format!("FROM {} e", self.events_table());
        if self.segment_needs_company_join() {
            from.push_str(&format!(
                "\n  LEFT JOIN {} c ON e.company_id = c.id",
                self.companies_table()
            ));
        }
        format!(
            "FilteredSessions AS (\n  SELECT DISTINCT e.session_id, {} AS segment\n  {}\n  {}\n)",
            self.segment_column(),
            from,
            self.build_where_clause().replace('\n', "\n  "),
        )
    }

    /// One row per known segment, every selected metric aggregated.
    /// Segments with no rows in a category keep NULLs via the left joins.
    fn build_segmentation_multi_metric_query(&self) -> String {
        let cats = CategorizedMetrics::collect(self.chart.metrics.iter().map(String::as_str));
        // No metric category contributed; nothing to chart.
        if cats.is_empty() {
            return String::new();
        }
        let Some(order_key) = self
            .chart
            .metrics
            .iter()
            .find_map(|key| MetricId::parse_engagement(key).map(|m| m.to_key()))
        else {
            return String::new();
        };

        let mut ctes = vec![
            self.segmented_sessions_cte(),
            "Segments AS (\n  SELECT DISTINCT segment FROM FilteredSessions WHERE segment IS NOT NULL\n)"
                .to_string(),
        ];
        let mut columns: Vec<String> = Vec::new();
        let mut joins: Vec<String> = Vec::new();

        if !cats.base.is_empty() {
            let selects: Vec<String> = cats
                .base
                .iter()
                .map(|kind| {
                    format!(
                        "{} AS `{}`",
                        base_aggregate(*kind, "e"),
                        MetricId::base(*kind).to_key()
                    )
                })
                .collect();
            ctes.push(format!(
                "BaseBySegment AS (\n  SELECT\n    fs.segment AS segment,\n    {}\n  FROM {} e\n  \
                 JOIN FilteredSessions fs ON e.session_id = fs.session_id\n  GROUP BY segment\n)",
                selects.join(",\n    "),
                self.events_table(),
            ));
            for kind in &cats.base {
                let key = MetricId::base(*kind).to_key();
                columns.push(format!("b.`{key}` AS `{key}`"));
            }
            joins.push("LEFT JOIN BaseBySegment b ON s.segment = b.segment".to_string());
        }

        if !cats.influenced.is_empty() {
            let stages = cats.influenced_stages();
            let funnel = self.funnel_clause("e.timestamp", "d.timestamp");
            let mut dedup_conditions = vec![format!(
                "d.stage_name IN ({})",
                quoted_list(&stages)
            )];
            if !funnel.is_empty() {
                dedup_conditions.push(funnel);
            }
            let selects: Vec<String> = cats
                .influenced
                .iter()
                .map(|(stage, kind)| {
                    format!(
                        "{} AS `{}`",
                        influenced_aggregate(stage, *kind),
                        MetricId::influenced(stage.clone(), *kind).to_key()
                    )
                })
                .collect();
            ctes.push(format!(
                "InfluencedBySegment AS (\n  SELECT\n    segment,\n    {}\n  FROM (\n    \
                 SELECT DISTINCT fs.segment AS segment, d.stage_name AS stage_name, d.deal_id AS deal_id, d.deal_value AS deal_value\n    \
                 FROM {} e\n    JOIN FilteredSessions fs ON e.session_id = fs.session_id,\n    UNNEST(e.stages) AS d\n    \
                 WHERE {}\n  )\n  GROUP BY segment\n)",
                selects.join(",\n    "),
                self.events_table(),
                dedup_conditions.join("\n      AND "),
            ));
            for (stage, kind) in &cats.influenced {
                let key = MetricId::influenced(stage.clone(), *kind).to_key();
                columns.push(format!("i.`{key}` AS `{key}`"));
            }
            joins.push("LEFT JOIN InfluencedBySegment i ON s.segment = i.segment".to_string());
        }

        if !cats.attributed.is_empty() {
            let selects: Vec<String> = cats
                .attributed
                .iter()
                .map(|stage| {
                    format!(
                        "{} AS `{}`",
                        attributed_aggregate(stage, "a"),
                        MetricId::attributed(stage.clone()).to_key()
                    )
                })
                .collect();
            let mut conditions = vec![format!("a.attribution_model = '{ATTRIBUTION_MODEL}'")];
            let funnel = self.funnel_clause("a.touch_timestamp", "a.stage_timestamp");
            if !funnel.is_empty() {
                conditions.push(funnel);
            }
            ctes.push(format!(
                "AttributedBySegment AS (\n  SELECT\n    fs.segment AS segment,\n    {}\n  FROM {} a\n  \
                 JOIN FilteredSessions fs ON a.session_id = fs.session_id\n  WHERE {}\n  GROUP BY segment\n)",
                selects.join(",\n    "),
                self.attribution_table(),
                conditions.join("\n    AND "),
            ));
            for stage in &cats.attributed {
                let key = MetricId::attributed(stage.clone()).to_key();
                columns.push(format!("att.`{key}` AS `{key}`"));
            }
            joins.push("LEFT JOIN AttributedBySegment att ON s.segment = att.segment".to_string());
        }

        format!(
            "WITH {}\nSELECT\n  s.segment,\n  {}\nFROM Segments s\n{}\n\
             ORDER BY `{order_key}` DESC NULLS LAST\nLIMIT {SEGMENT_ROW_LIMIT}",
            ctes.join(",\n"),
            columns.join(",\n  "),
            joins.join("\n"),
        )
    }

    /// Top-N segments by whole-period value, then monthly values per
    /// segment, inner-joined so only top segments chart.
    fn build_time_series_single_metric_query(&self) -> String {
        let Some(metric) = self
            .chart
            .metric
            .as_deref()
            .and_then(MetricId::parse_engagement)
        else {
            return String::new();
        };

        let sessions_cte = self.segmented_sessions_cte();
        let (top_segments, monthly_data) = match metric.category {
            MetricCategory::Attributed => self.attributed_segment_ctes(&metric),
            MetricCategory::Influenced => self.influenced_segment_ctes(&metric),
            MetricCategory::Base => self.base_segment_ctes(&metric),
        };

        format!(
            "WITH {sessions_cte},\n{top_segments},\n{monthly_data}\n\
             SELECT m.month, m.segment, m.value\n\
             FROM MonthlyData m\n\
             INNER JOIN TopSegments t ON m.segment = t.segment\n\
             ORDER BY m.month ASC, m.segment ASC",
        )
    }

    /// Attributed metrics aggregate from the attribution table directly,
    /// scoped to the filtered-session population. Months come from the
    /// stage conversion timestamp, the same column the funnel bound uses.
    fn attributed_segment_ctes(&self, metric: &MetricId) -> (String, String) {
        let stage = metric.stage.as_deref().unwrap_or("");
        let aggregate = attributed_aggregate(stage, "a");
        let mut conditions = vec![format!("a.attribution_model = '{ATTRIBUTION_MODEL}'")];
        let funnel = self.funnel_clause("a.touch_timestamp", "a.stage_timestamp");
        if !funnel.is_empty() {
            conditions.push(funnel);
        }
        let where_sql = conditions.join("\n    AND ");

        let top = format!(
            "TopSegments AS (\n  SELECT fs.segment AS segment, {aggregate} AS total_value\n  \
             FROM {} a\n  JOIN FilteredSessions fs ON a.session_id = fs.session_id\n  \
             WHERE {where_sql}\n    AND fs.segment IS NOT NULL\n  \
             GROUP BY segment\n  ORDER BY total_value DESC\n  LIMIT {TOP_SEGMENT_LIMIT}\n)",
            self.attribution_table(),
        );
        let monthly = format!(
            "MonthlyData AS (\n  SELECT\n    FORMAT_TIMESTAMP('%Y-%m', a.stage_timestamp) AS month,\n    \
             fs.segment AS segment,\n    {aggregate} AS value\n  \
             FROM {} a\n  JOIN FilteredSessions fs ON a.session_id = fs.session_id\n  \
             WHERE {where_sql}\n  GROUP BY month, segment\n)",
            self.attribution_table(),
        );
        (top, monthly)
    }

    fn influenced_segment_ctes(&self, metric: &MetricId) -> (String, String) {
        let stage = metric.stage.as_deref().unwrap_or("");
        let aggregate = influenced_aggregate(stage, metric.kind);
        let funnel = self.funnel_clause("e.timestamp", "d.timestamp");
        let mut conditions = vec![format!("d.stage_name = '{}'", sanitize(stage))];
        if !funnel.is_empty() {
            conditions.push(funnel);
        }
        let where_sql = conditions.join("\n      AND ");

        let dedup = |extra_cols: &str| {
            format!(
                "SELECT DISTINCT {extra_cols}fs.segment AS segment, d.stage_name AS stage_name, d.deal_id AS deal_id, d.deal_value AS deal_value\n    \
                 FROM {} e\n    JOIN FilteredSessions fs ON e.session_id = fs.session_id,\n    UNNEST(e.stages) AS d\n    \
                 WHERE {where_sql}",
                self.events_table(),
            )
        };

        let top = format!(
            "TopSegments AS (\n  SELECT segment, {aggregate} AS total_value\n  FROM (\n    {}\n  )\n  \
             WHERE segment IS NOT NULL\n  GROUP BY segment\n  ORDER BY total_value DESC\n  LIMIT {TOP_SEGMENT_LIMIT}\n)",
            dedup(""),
        );
        let monthly = format!(
            "MonthlyData AS (\n  SELECT month, segment, {aggregate} AS value\n  FROM (\n    {}\n  )\n  \
             GROUP BY month, segment\n)",
            dedup("FORMAT_TIMESTAMP('%Y-%m', e.timestamp) AS month, "),
        );
        (top, monthly)
    }

    fn base_segment_ctes(&self, metric: &MetricId) -> (String, String) {
        let aggregate = base_aggregate(metric.kind, "e");
        let top = format!(
            "TopSegments AS (\n  SELECT fs.segment AS segment, {aggregate} AS total_value\n  \
             FROM {} e\n  JOIN FilteredSessions fs ON e.session_id = fs.session_id\n  \
             WHERE fs.segment IS NOT NULL\n  GROUP BY segment\n  \
             ORDER BY total_value DESC\n  LIMIT {TOP_SEGMENT_LIMIT}\n)",
            self.events_table(),
        );
        let monthly = format!(
            "MonthlyData AS (\n  SELECT\n    FORMAT_TIMESTAMP('%Y-%m', e.timestamp) AS month,\n    \
             fs.segment AS segment,\n    {aggregate} AS value\n  \
             FROM {} e\n  JOIN FilteredSessions fs ON e.session_id = fs.session_id\n  \
             GROUP BY month, segment\n)",
            self.events_table(),
        );
        (top, monthly)
    }

    /// Complete month scaffold left-joined to one monthly CTE per metric
    /// category. Months without rows keep NULL metric columns; display
    /// layers treat NULL as zero.
    fn build_time_series_multi_metric_query(&self) -> String {
        let cats = CategorizedMetrics::collect(self.chart.metrics.iter().map(String::as_str));
        if cats.is_empty() {
            return String::new();
        }

        let period = TimePeriod::parse(&self.data.time_period);
        let range = time_period_to_date_range(period);
        let mut ctes = vec![
            self.filtered_sessions_cte(),
            format!(
                "Months AS (\n  SELECT FORMAT_DATE('%Y-%m', month_start) AS month\n  \
                 FROM UNNEST(GENERATE_DATE_ARRAY(DATE '{}', DATE '{}', INTERVAL 1 MONTH)) AS month_start\n)",
                range.start.format("%Y-%m-%d"),
                range.end.format("%Y-%m-%d"),
            ),
        ];
        let mut columns: Vec<String> = Vec::new();
        let mut joins: Vec<String> = Vec::new();

        if !cats.base.is_empty() {
            let selects: Vec<String> = cats
                .base
                .iter()
                .map(|kind| {
                    format!(
                        "{} AS `{}`",
                        base_aggregate(*kind, "e"),
                        MetricId::base(*kind).to_key()
                    )
                })
                .collect();
            ctes.push(format!(
                "BaseMonthly AS (\n  SELECT\n    FORMAT_TIMESTAMP('%Y-%m', e.timestamp) AS month,\n    {}\n  \
                 FROM {} e\n  WHERE e.session_id IN (SELECT session_id FROM FilteredSessions)\n  GROUP BY month\n)",
                selects.join(",\n    "),
                self.events_table(),
            ));
            for kind in &cats.base {
                let key = MetricId::base(*kind).to_key();
                columns.push(format!("b.`{key}` AS `{key}`"));
            }
            joins.push("LEFT JOIN BaseMonthly b ON m.month = b.month".to_string());
        }

        if !cats.influenced.is_empty() {
            let stages = cats.influenced_stages();
            let funnel = self.funnel_clause("e.timestamp", "d.timestamp");
            let mut conditions = vec![
                "e.session_id IN (SELECT session_id FROM FilteredSessions)".to_string(),
                format!("d.stage_name IN ({})", quoted_list(&stages)),
            ];
            if !funnel.is_empty() {
                conditions.push(funnel);
            }
            let selects: Vec<String> = cats
                .influenced
                .iter()
                .map(|(stage, kind)| {
                    format!(
                        "{} AS `{}`",
                        influenced_aggregate(stage, *kind),
                        MetricId::influenced(stage.clone(), *kind).to_key()
                    )
                })
                .collect();
            ctes.push(format!(
                "InfluencedMonthly AS (\n  SELECT\n    month,\n    {}\n  FROM (\n    \
                 SELECT DISTINCT FORMAT_TIMESTAMP('%Y-%m', e.timestamp) AS month, d.stage_name AS stage_name, d.deal_id AS deal_id, d.deal_value AS deal_value\n    \
                 FROM {} e, UNNEST(e.stages) AS d\n    WHERE {}\n  )\n  GROUP BY month\n)",
                selects.join(",\n    "),
                self.events_table(),
                conditions.join("\n      AND "),
            ));
            for (stage, kind) in &cats.influenced {
                let key = MetricId::influenced(stage.clone(), *kind).to_key();
                columns.push(format!("i.`{key}` AS `{key}`"));
            }
            joins.push("LEFT JOIN InfluencedMonthly i ON m.month = i.month".to_string());
        }

        if !cats.attributed.is_empty() {
            let selects: Vec<String> = cats
                .attributed
                .iter()
                .map(|stage| {
                    format!(
                        "{} AS `{}`",
                        attributed_aggregate(stage, "a"),
                        MetricId::attributed(stage.clone()).to_key()
                    )
                })
                .collect();
            let mut conditions = vec![
                format!("a.attribution_model = '{ATTRIBUTION_MODEL}'"),
                "a.session_id IN (SELECT session_id FROM FilteredSessions)".to_string(),
            ];
            let funnel = self.funnel_clause("a.touch_timestamp", "a.stage_timestamp");
            if !funnel.is_empty() {
                conditions.push(funnel);
            }
            ctes.push(format!(
                "AttributedMonthly AS (\n  SELECT\n    FORMAT_TIMESTAMP('%Y-%m', a.stage_timestamp) AS month,\n    {}\n  \
                 FROM {} a\n  WHERE {}\n  GROUP BY month\n)",
                selects.join(",\n    "),
                self.attribution_table(),
                conditions.join("\n    AND "),
            ));
            for stage in &cats.attributed {
                let key = MetricId::attributed(stage.clone()).to_key();
                columns.push(format!("att.`{key}` AS `{key}`"));
            }
            joins.push("LEFT JOIN AttributedMonthly att ON m.month = att.month".to_string());
        }

        format!(
            "WITH {}\nSELECT\n  m.month,\n  {}\nFROM Months m\n{}\nORDER BY m.month ASC",
            ctes.join(",\n"),
            columns.join(",\n  "),
            joins.join("\n"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(data: serde_json::Value, chart: serde_json::Value, cards: &[&str]) -> ReportConfig {
        serde_json::from_value(json!({
            "reportArchetype": "engagement_analysis",
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

    fn builder(data: serde_json::Value, chart: serde_json::Value, cards: &[&str]) -> EngagementQueryBuilder {
        EngagementQueryBuilder::new("proj", &config(data, chart, cards), false)
    }

    #[test]
    fn kpi_query_empty_without_cards() {
        assert_eq!(builder(json!({}), json!({}), &[]).build_kpi_query(), "");
        // Unparseable metric keys contribute nothing.
        assert_eq!(builder(json!({}), json!({}), &["revenue"]).build_kpi_query(), "");
    }

    #[test]
    fn kpi_query_combines_influenced_and_attributed_without_base() {
        let b = builder(
            json!({ "funnelLength": "30" }),
            json!({}),
            &["influenced_SQL_deals", "attributed_SQL_deals"],
        );
        let sql = b.build_kpi_query();

        assert!(sql.contains("UniqueInfluencedDeals AS ("));
        assert!(sql.contains("AggregatedInfluenced AS ("));
        assert!(sql.contains("AggregatedAttributed AS ("));
        assert!(!sql.contains("BaseMetrics"));

        // Both category chains carry the funnel bound.
        assert!(sql.contains("TIMESTAMP_DIFF(d.timestamp, e.timestamp, DAY) <= 30"));
        assert!(sql.contains("TIMESTAMP_DIFF(a.stage_timestamp, a.touch_timestamp, DAY) <= 30"));

        assert!(sql.contains("FROM AggregatedInfluenced i\nCROSS JOIN AggregatedAttributed a"));
        assert_eq!(sql.matches("CROSS JOIN").count(), 1);
    }

    #[test]
    fn kpi_query_base_metrics_share_filtered_sessions() {
        let b = builder(json!({}), json!({}), &["sessions", "companies"]);
        let sql = b.build_kpi_query();
        assert!(sql.starts_with("WITH FilteredSessions AS ("));
        assert!(sql.contains("BaseMetrics AS ("));
        assert!(sql.contains("COUNT(DISTINCT e.session_id) AS `sessions`"));
        assert!(sql.contains("COUNT(DISTINCT e.company_id) AS `companies`"));
        assert!(sql.contains("WHERE e.session_id IN (SELECT session_id FROM FilteredSessions)"));
        assert!(!sql.contains("CROSS JOIN"));
    }

    #[test]
    fn attribution_is_scoped_to_fixed_model() {
        let b = builder(json!({}), json!({}), &["attributed_Won_deals"]);
        let sql = b.build_kpi_query();
        assert!(sql.contains("a.attribution_model = 'Data-Driven'"));
        assert!(sql.contains("SUM(CASE WHEN a.stage_name = 'Won' THEN a.weight ELSE 0 END)"));
    }

    #[test]
    fn unlimited_funnel_adds_no_bound() {
        let b = builder(
            json!({ "funnelLength": "unlimited" }),
            json!({}),
            &["influenced_SQL_deals"],
        );
        assert!(!b.build_kpi_query().contains("TIMESTAMP_DIFF"));
    }

    #[test]
    fn session_filters_computed_but_not_applied_by_default() {
        let data = json!({
            "timePeriod": "this_year",
            "selectedChannels": ["Paid Search"],
            "selectedEventNames": ["page_view"],
            "selectedSignals": ["pricing_intent"],
            "urlContains": "/pricing"
        });
        let b = builder(data.clone(), json!({}), &["sessions"]);
        assert_eq!(b.session_filter_clauses().len(), 4);
        let where_sql = b.build_where_clause();
        assert!(where_sql.contains("e.timestamp >="));
        assert!(!where_sql.contains("e.channel"));
        assert!(!where_sql.contains("STRPOS"));

        // Opting in appends every computed clause.
        let b = EngagementQueryBuilder::new("proj", &config(data, json!({}), &["sessions"]), true);
        let where_sql = b.build_where_clause();
        assert!(where_sql.contains("e.channel IN ('Paid Search')"));
        assert!(where_sql.contains("e.event_name IN ('page_view')"));
        assert!(where_sql.contains("e.signal_name IN ('pricing_intent')"));
        assert!(where_sql.contains("STRPOS(e.page_url, '/pricing') > 0"));
    }

    #[test]
    fn segmentation_chart_left_joins_categories_onto_segments() {
        let b = builder(
            json!({ "reportFocus": "segmentation" }),
            json!({
                "breakdown": "channel",
                "metrics": ["sessions", "influenced_SQL_deals", "attributed_SQL_deals"]
            }),
            &[],
        );
        let sql = b.build_chart_query();
        assert!(sql.contains("e.channel AS segment"));
        // Channel breakdown never joins companies.
        assert!(!sql.contains("companies"));
        assert!(sql.contains("Segments AS ("));
        assert!(sql.contains("LEFT JOIN BaseBySegment b ON s.segment = b.segment"));
        assert!(sql.contains("LEFT JOIN InfluencedBySegment i ON s.segment = i.segment"));
        assert!(sql.contains("LEFT JOIN AttributedBySegment att ON s.segment = att.segment"));
        assert!(sql.contains("ORDER BY `sessions` DESC NULLS LAST"));
        assert!(sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn segmentation_chart_empty_when_no_category_contributes() {
        let b = builder(
            json!({ "reportFocus": "segmentation" }),
            json!({ "breakdown": "channel", "metrics": ["bogus", "also_bogus"] }),
            &[],
        );
        assert_eq!(b.build_chart_query(), "");
    }

    #[test]
    fn segmentation_company_breakdown_joins_companies() {
        let b = builder(
            json!({ "reportFocus": "segmentation" }),
            json!({ "breakdown": "companyCountry", "metrics": ["sessions"] }),
            &[],
        );
        let sql = b.build_chart_query();
        assert!(sql.contains("LEFT JOIN `proj.analytics.companies` c ON e.company_id = c.id"));
        assert!(sql.contains("c.properties.country AS segment"));
    }

    #[test]
    fn segmented_time_series_attributed_reads_attribution_table() {
        let b = builder(
            json!({ "funnelLength": 14 }),
            json!({
                "variant": "time_series_segmented",
                "metric": "attributed_Won_deals",
                "breakdown": "channel"
            }),
            &[],
        );
        let sql = b.build_chart_query();
        assert!(sql.contains("FROM `proj.analytics.attribution` a"));
        assert!(sql.contains("FORMAT_TIMESTAMP('%Y-%m', a.stage_timestamp) AS month"));
        assert!(sql.contains("LIMIT 5"));
        assert!(sql.contains("INNER JOIN TopSegments t ON m.segment = t.segment"));
        assert!(sql.contains("TIMESTAMP_DIFF(a.stage_timestamp, a.touch_timestamp, DAY) <= 14"));
        // The metric never touches UNNEST for attributed aggregation.
        assert!(!sql.contains("UNNEST(e.stages)"));
    }

    #[test]
    fn segmented_time_series_influenced_reads_events() {
        let b = builder(
            json!({}),
            json!({
                "variant": "time_series_segmented",
                "metric": "influenced_SQL_deals",
                "breakdown": "companyCountry"
            }),
            &[],
        );
        let sql = b.build_chart_query();
        assert!(sql.contains("UNNEST(e.stages) AS d"));
        assert!(sql.contains("d.stage_name = 'SQL'"));
        assert!(sql.contains("LIMIT 5"));
        assert!(!sql.contains("attribution"));
    }

    #[test]
    fn segmented_time_series_base_metric() {
        let b = builder(
            json!({}),
            json!({
                "variant": "time_series_segmented",
                "metric": "sessions",
                "breakdown": "channel"
            }),
            &[],
        );
        let sql = b.build_chart_query();
        assert!(sql.contains("COUNT(DISTINCT e.session_id) AS total_value"));
        assert!(sql.contains("INNER JOIN TopSegments"));
    }

    #[test]
    fn multi_metric_time_series_scaffolds_months_without_coalesce() {
        let b = builder(
            json!({ "timePeriod": "last_quarter" }),
            json!({
                "variant": "time_series_line",
                "metrics": ["sessions", "influenced_SQL_value", "attributed_SQL_deals"]
            }),
            &[],
        );
        let sql = b.build_chart_query();
        assert!(sql.contains("GENERATE_DATE_ARRAY(DATE '"));
        assert!(sql.contains("INTERVAL 1 MONTH"));
        assert!(sql.contains("LEFT JOIN BaseMonthly b ON m.month = b.month"));
        assert!(sql.contains("LEFT JOIN InfluencedMonthly i ON m.month = i.month"));
        assert!(sql.contains("LEFT JOIN AttributedMonthly att ON m.month = att.month"));
        assert!(sql.contains("ORDER BY m.month ASC"));
        // Gaps stay NULL in this path; display treats NULL as zero.
        assert!(!sql.contains("COALESCE"));
    }

    #[test]
    fn chart_query_empty_without_metrics() {
        assert_eq!(builder(json!({}), json!({}), &[]).build_chart_query(), "");
        assert_eq!(
            builder(json!({}), json!({ "variant": "time_series_segmented" }), &[])
                .build_chart_query(),
            ""
        );
    }

    #[test]
    fn duplicate_kpi_cards_aggregate_once() {
        let b = builder(
            json!({}),
            json!({}),
            &["influenced_SQL_deals", "influenced_SQL_deals"],
        );
        let sql = b.build_kpi_query();
        assert_eq!(
            sql.matches("COUNT(DISTINCT CASE WHEN stage_name = 'SQL' THEN deal_id END)")
                .count(),
            1
        );
    }
}
