//! Metric identifiers and their SQL aggregate expressions.
//!
//! Metric keys travel over the wire as strings (`sessions`,
//! `influenced_SQL_deals`, `attributed_Won_deals`, `SQL_value`, ...).
//! Internally they are a tagged structure; `to_key` and the `parse_*`
//! functions are the only encode/decode sites, and round-trip by stripping
//! one known prefix and one known suffix, so interior underscores in stage
//! names are safe.

use crate::query::fragments::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Deals,
    Value,
    Companies,
    Contacts,
    Events,
    Sessions,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Deals => "deals",
            MetricKind::Value => "value",
            MetricKind::Companies => "companies",
            MetricKind::Contacts => "contacts",
            MetricKind::Events => "events",
            MetricKind::Sessions => "sessions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricCategory {
    Base,
    Influenced,
    Attributed,
}

/// An engagement-report metric: category + optional stage + kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricId {
    pub category: MetricCategory,
    pub stage: Option<String>,
    pub kind: MetricKind,
}

impl MetricId {
    pub fn base(kind: MetricKind) -> Self {
        MetricId {
            category: MetricCategory::Base,
            stage: None,
            kind,
        }
    }

    pub fn influenced(stage: impl Into<String>, kind: MetricKind) -> Self {
        MetricId {
            category: MetricCategory::Influenced,
            stage: Some(stage.into()),
            kind,
        }
    }

    pub fn attributed(stage: impl Into<String>) -> Self {
        MetricId {
            category: MetricCategory::Attributed,
            stage: Some(stage.into()),
            kind: MetricKind::Deals,
        }
    }

    /// Wire key for this metric, also used as the SQL column alias.
    pub fn to_key(&self) -> String {
        let stage = self.stage.as_deref().unwrap_or("");
        match self.category {
            MetricCategory::Base => self.kind.as_str().to_string(),
            MetricCategory::Influenced => {
                format!("influenced_{stage}_{}", self.kind.as_str())
            }
            MetricCategory::Attributed => format!("attributed_{stage}_deals"),
        }
    }

    /// Decode an engagement metric key. Returns None for keys that are not
    /// well-formed (unknown base name, empty stage, bad suffix).
    pub fn parse_engagement(key: &str) -> Option<MetricId> {
        match key {
            "companies" => return Some(MetricId::base(MetricKind::Companies)),
            "contacts" => return Some(MetricId::base(MetricKind::Contacts)),
            "events" => return Some(MetricId::base(MetricKind::Events)),
            "sessions" => return Some(MetricId::base(MetricKind::Sessions)),
            _ => {}
        }

        if let Some(rest) = key.strip_prefix("influenced_") {
            let (stage, kind) = split_stage_suffix(rest)?;
            return Some(MetricId::influenced(stage, kind));
        }
        if let Some(rest) = key.strip_prefix("attributed_") {
            let (stage, kind) = split_stage_suffix(rest)?;
            // Attribution weight only carries deal credit, never value.
            if kind != MetricKind::Deals {
                return None;
            }
            return Some(MetricId::attributed(stage));
        }
        None
    }
}

/// An outcome-report metric: `<stage>_deals` or `<stage>_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeMetric {
    pub stage: String,
    pub kind: MetricKind,
}

impl OutcomeMetric {
    pub fn parse(key: &str) -> Option<OutcomeMetric> {
        let (stage, kind) = split_stage_suffix(key)?;
        Some(OutcomeMetric {
            stage: stage.to_string(),
            kind,
        })
    }

    pub fn to_key(&self) -> String {
        format!("{}_{}", self.stage, self.kind.as_str())
    }
}

fn split_stage_suffix(rest: &str) -> Option<(&str, MetricKind)> {
    let (stage, kind) = if let Some(stage) = rest.strip_suffix("_deals") {
        (stage, MetricKind::Deals)
    } else if let Some(stage) = rest.strip_suffix("_value") {
        (stage, MetricKind::Value)
    } else {
        return None;
    };
    if stage.is_empty() {
        return None;
    }
    Some((stage, kind))
}

/// Aggregate over the `stages` fact table (alias `s`).
pub fn outcome_aggregate(metric: &OutcomeMetric, alias: &str) -> String {
    let stage = sanitize(&metric.stage);
    match metric.kind {
        MetricKind::Deals => format!(
            "COUNT(DISTINCT CASE WHEN {alias}.stage_name = '{stage}' THEN {alias}.id END)"
        ),
        _ => format!(
            "SUM(CASE WHEN {alias}.stage_name = '{stage}' THEN {alias}.value ELSE 0 END)"
        ),
    }
}

/// Aggregate over the events fact table (alias `e`).
pub fn base_aggregate(kind: MetricKind, alias: &str) -> String {
    match kind {
        MetricKind::Companies => format!("COUNT(DISTINCT {alias}.company_id)"),
        MetricKind::Contacts => format!("COUNT(DISTINCT {alias}.contact_id)"),
        MetricKind::Events => "COUNT(*)".to_string(),
        _ => format!("COUNT(DISTINCT {alias}.session_id)"),
    }
}

/// Aggregate over deduplicated influenced-deal rows
/// (columns `stage_name`, `deal_id`, `deal_value`).
pub fn influenced_aggregate(stage: &str, kind: MetricKind) -> String {
    let stage = sanitize(stage);
    match kind {
        MetricKind::Deals => {
            format!("COUNT(DISTINCT CASE WHEN stage_name = '{stage}' THEN deal_id END)")
        }
        _ => format!("SUM(CASE WHEN stage_name = '{stage}' THEN deal_value ELSE 0 END)"),
    }
}

/// Weighted deal credit from the attribution table (alias `a`).
pub fn attributed_aggregate(stage: &str, alias: &str) -> String {
    let stage = sanitize(stage);
    format!("SUM(CASE WHEN {alias}.stage_name = '{stage}' THEN {alias}.weight ELSE 0 END)")
}
