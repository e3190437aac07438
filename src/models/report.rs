//! Wire shapes for report configuration.
//!
//! `ReportConfig` keeps the archetype-specific sections as raw JSON so an
//! unrecognized archetype or a malformed sub-shape degrades to "no data"
//! instead of failing deserialization at the HTTP boundary. The typed
//! sub-shapes are parsed best-effort at dispatch time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const OUTCOME_ANALYSIS: &str = "outcome_analysis";
pub const ENGAGEMENT_ANALYSIS: &str = "engagement_analysis";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    #[serde(default)]
    pub report_archetype: String,

    #[serde(default)]
    pub data_config: serde_json::Value,

    #[serde(default)]
    pub chart: serde_json::Value,

    #[serde(default)]
    pub kpi_cards: Vec<KpiCard>,
}

impl ReportConfig {
    pub fn outcome_data(&self) -> OutcomeDataConfig {
        from_value_or_default(&self.data_config)
    }

    pub fn engagement_data(&self) -> EngagementDataConfig {
        from_value_or_default(&self.data_config)
    }

    pub fn chart_config(&self) -> ChartConfig {
        from_value_or_default(&self.chart)
    }
}

/// Best-effort parse: any shape mismatch yields the default value.
fn from_value_or_default<T: DeserializeOwned + Default>(value: &serde_json::Value) -> T {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiCard {
    /// Client-generated token; display order only, not used in query building.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub metric: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFocus {
    #[default]
    TimeSeries,
    Segmentation,
    #[serde(other)]
    Other,
}

impl ReportFocus {
    pub fn is_segmentation(self) -> bool {
        matches!(self, ReportFocus::Segmentation)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartVariant {
    #[default]
    TimeSeriesLine,
    TimeSeriesSegmented,
    SegmentationBar,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentProperty {
    Channel,
    CompanyCountry,
    #[default]
    NumberOfEmployees,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartConfig {
    pub variant: ChartVariant,

    /// Single metric, used by the segmented time-series variant.
    pub metric: Option<String>,

    /// Metric set, used by multi-metric and segmentation variants.
    pub metrics: Vec<String>,

    #[serde(alias = "segmentationProperty")]
    pub breakdown: SegmentProperty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeDataConfig {
    pub time_period: String,
    pub selected_countries: Vec<String>,
    pub selected_employee_sizes: Vec<String>,
    pub report_focus: ReportFocus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngagementDataConfig {
    pub time_period: String,
    pub funnel_length: FunnelLength,
    pub selected_channels: Vec<String>,
    pub selected_event_names: Vec<String>,
    pub selected_signals: Vec<String>,
    pub url_contains: String,
    pub report_focus: ReportFocus,
}

/// Maximum days between an engagement touch and a downstream stage
/// conversion. Accepts `"unlimited"`, a positive number, or a numeric
/// string; anything else (non-numeric, zero, negative) is `Unlimited`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FunnelLength {
    #[default]
    Unlimited,
    Days(i64),
}

impl FunnelLength {
    fn from_days(days: i64) -> Self {
        if days > 0 {
            FunnelLength::Days(days)
        } else {
            FunnelLength::Unlimited
        }
    }
}

impl Serialize for FunnelLength {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FunnelLength::Unlimited => serializer.serialize_str("unlimited"),
            FunnelLength::Days(days) => serializer.serialize_i64(*days),
        }
    }
}

impl<'de> Deserialize<'de> for FunnelLength {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(FunnelLength::from_days)
                .unwrap_or(FunnelLength::Unlimited),
            serde_json::Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(FunnelLength::from_days)
                .unwrap_or(FunnelLength::Unlimited),
            _ => FunnelLength::Unlimited,
        })
    }
}
