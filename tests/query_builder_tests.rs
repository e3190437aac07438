//! End-to-end query generation tests: full report configurations in,
//! SQL text out, exercised through the same dispatch the HTTP layer uses.

use funnelboard::models::ReportConfig;
use funnelboard::report::build_queries;
use serde_json::json;

fn config(value: serde_json::Value) -> ReportConfig {
    serde_json::from_value(value).unwrap()
}

#[test]
fn outcome_kpi_query_is_a_flat_select_without_filters() {
    let config = config(json!({
        "reportArchetype": "outcome_analysis",
        "dataConfig": { "timePeriod": "this_year" },
        "kpiCards": [
            { "id": "card-1", "metric": "Closed Won_deals" },
            { "id": "card-2", "metric": "Closed Won_value" }
        ]
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(!queries.kpi_query.contains("WITH"));
    assert!(queries.kpi_query.contains("FROM `acme-prod.analytics.stages` s"));
    assert!(!queries.kpi_query.contains("LEFT JOIN"));
    assert!(queries.kpi_query.contains("AS `Closed Won_deals`"));
    assert!(queries.kpi_query.contains("AS `Closed Won_value`"));
}

#[test]
fn outcome_filters_pull_in_the_company_join() {
    let config = config(json!({
        "reportArchetype": "outcome_analysis",
        "dataConfig": {
            "timePeriod": "this_year",
            "selectedCountries": ["Germany", "France"]
        },
        "kpiCards": [{ "id": "card-1", "metric": "SQL_deals" }]
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries
        .kpi_query
        .contains("LEFT JOIN `acme-prod.analytics.companies` c ON s.company_id = c.id"));
    assert!(queries
        .kpi_query
        .contains("c.properties.country IN ('Germany', 'France')"));
}

#[test]
fn outcome_segmentation_chart_orders_by_first_metric_and_limits_rows() {
    let config = config(json!({
        "reportArchetype": "outcome_analysis",
        "dataConfig": {
            "timePeriod": "last_quarter",
            "reportFocus": "segmentation"
        },
        "chart": {
            "variant": "segmentation_bar",
            "metrics": ["SQL_deals", "SQL_value"],
            "breakdown": "companyCountry"
        },
        "kpiCards": []
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries.chart_query.contains("GROUP BY segment"));
    assert!(queries.chart_query.contains("ORDER BY `SQL_deals` DESC"));
    assert!(queries.chart_query.contains("LIMIT 10"));
}

#[test]
fn outcome_segmented_time_series_keeps_five_segments() {
    let config = config(json!({
        "reportArchetype": "outcome_analysis",
        "dataConfig": { "timePeriod": "this_year" },
        "chart": {
            "variant": "time_series_segmented",
            "metric": "SQL_deals",
            "breakdown": "channel"
        },
        "kpiCards": []
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries.chart_query.contains("WITH"));
    assert!(queries.chart_query.contains("TopSegments"));
    assert!(queries.chart_query.contains("LIMIT 5"));
    assert!(queries.chart_query.contains("INNER JOIN TopSegments"));
}

#[test]
fn engagement_kpi_query_cross_joins_one_cte_per_category() {
    let config = config(json!({
        "reportArchetype": "engagement_analysis",
        "dataConfig": { "timePeriod": "last_6_months" },
        "kpiCards": [
            { "id": "a", "metric": "sessions" },
            { "id": "b", "metric": "influenced_SQL_deals" },
            { "id": "c", "metric": "attributed_SQL_deals" }
        ]
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries.kpi_query.starts_with("WITH"));
    assert!(queries.kpi_query.contains("FilteredSessions"));
    assert!(queries.kpi_query.contains("BaseMetrics"));
    assert!(queries.kpi_query.contains("AggregatedInfluenced"));
    assert!(queries.kpi_query.contains("AggregatedAttributed"));
    assert_eq!(queries.kpi_query.matches("CROSS JOIN").count(), 2);
}

#[test]
fn attributed_value_keys_contribute_no_category() {
    // Attribution weight only carries deal credit; a `attributed_*_value`
    // card must not produce an attributed CTE.
    let config = config(json!({
        "reportArchetype": "engagement_analysis",
        "dataConfig": { "timePeriod": "this_year" },
        "kpiCards": [
            { "id": "a", "metric": "sessions" },
            { "id": "b", "metric": "attributed_SQL_value" }
        ]
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries.kpi_query.contains("BaseMetrics"));
    assert!(!queries.kpi_query.contains("AggregatedAttributed"));
    assert!(!queries.kpi_query.contains("CROSS JOIN"));
}

#[test]
fn engagement_session_filters_are_not_applied_by_default() {
    let value = json!({
        "reportArchetype": "engagement_analysis",
        "dataConfig": {
            "timePeriod": "this_year",
            "selectedChannels": ["Paid Search"],
            "urlContains": "/pricing"
        },
        "kpiCards": [{ "id": "a", "metric": "sessions" }]
    });

    let unfiltered = build_queries("acme-prod", &config(value.clone()), false);
    assert!(!unfiltered.kpi_query.contains("e.channel IN"));
    assert!(!unfiltered.kpi_query.contains("STRPOS"));

    let filtered = build_queries("acme-prod", &config(value), true);
    assert!(filtered.kpi_query.contains("e.channel IN ('Paid Search')"));
    assert!(filtered.kpi_query.contains("STRPOS(e.page_url, '/pricing') > 0"));
}

#[test]
fn engagement_time_series_scaffolds_months_and_preserves_gaps() {
    let config = config(json!({
        "reportArchetype": "engagement_analysis",
        "dataConfig": { "timePeriod": "this_year" },
        "chart": {
            "variant": "time_series_line",
            "metrics": ["sessions", "influenced_SQL_deals"]
        },
        "kpiCards": []
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries.chart_query.contains("GENERATE_DATE_ARRAY"));
    assert!(queries.chart_query.contains("LEFT JOIN"));
    assert!(!queries.chart_query.contains("COALESCE"));
}

#[test]
fn single_quotes_in_filter_values_are_escaped() {
    let config = config(json!({
        "reportArchetype": "outcome_analysis",
        "dataConfig": {
            "timePeriod": "this_year",
            "selectedCountries": ["Côte d'Ivoire"]
        },
        "kpiCards": [{ "id": "a", "metric": "SQL_deals" }]
    }));

    let queries = build_queries("acme-prod", &config, false);

    assert!(queries.kpi_query.contains("Côte d\\'Ivoire"));
    assert!(!queries.kpi_query.contains("d'Ivoire"));
}

#[test]
fn no_selected_metrics_means_no_queries() {
    let outcome = config(json!({
        "reportArchetype": "outcome_analysis",
        "kpiCards": []
    }));
    let queries = build_queries("acme-prod", &outcome, false);
    assert_eq!(queries.kpi_query, "");
    assert_eq!(queries.chart_query, "");

    let engagement = config(json!({
        "reportArchetype": "engagement_analysis",
        "kpiCards": [{ "id": "a", "metric": "not_a_metric" }]
    }));
    let queries = build_queries("acme-prod", &engagement, false);
    assert_eq!(queries.kpi_query, "");
}

#[test]
fn unknown_archetype_degrades_to_empty_queries() {
    let config = config(json!({
        "reportArchetype": "competitor_analysis",
        "kpiCards": [{ "id": "a", "metric": "sessions" }]
    }));
    let queries = build_queries("acme-prod", &config, false);
    assert_eq!(queries.kpi_query, "");
    assert_eq!(queries.chart_query, "");
}

#[test]
fn malformed_data_config_degrades_instead_of_failing() {
    // A config whose dataConfig has the wrong shape still deserializes and
    // still produces SQL from defaults.
    let config = config(json!({
        "reportArchetype": "outcome_analysis",
        "dataConfig": { "timePeriod": 42, "selectedCountries": "oops" },
        "kpiCards": [{ "id": "a", "metric": "SQL_deals" }]
    }));

    let queries = build_queries("acme-prod", &config, false);
    assert!(queries.kpi_query.contains("AS `SQL_deals`"));
}
