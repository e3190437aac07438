mod report;
mod saved;

pub use report::{
    ChartConfig, ChartVariant, EngagementDataConfig, FunnelLength, KpiCard, OutcomeDataConfig,
    ReportConfig, ReportFocus, SegmentProperty, ENGAGEMENT_ANALYSIS, OUTCOME_ANALYSIS,
};
pub use saved::{Dashboard, SavedReport};
