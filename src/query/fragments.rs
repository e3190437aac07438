//! SQL fragment utilities: literal sanitization, time-period predicates,
//! calendar date ranges, and the funnel-length bound.
//!
//! Every function here is pure; the clock-dependent entry points delegate
//! to `*_at` variants taking an explicit `today` so tests are deterministic.

use chrono::{Datelike, Months, NaiveDate, Utc};

use crate::models::FunnelLength;

/// Escape single quotes for embedding in a single-quoted SQL literal.
///
/// Every user-supplied string interpolated into generated SQL must pass
/// through this first. It only handles the single-quote case; values are
/// additionally bound as parameters where the engine supports it.
pub fn sanitize(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// Quote and sanitize a list of values for an `IN (...)` clause.
pub fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", sanitize(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Closed set of report time periods. Unknown tokens parse to `ThisYear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePeriod {
    ThisMonth,
    ThisQuarter,
    ThisYear,
    LastMonth,
    LastQuarter,
    LastYear,
    Last3Months,
    Last6Months,
    Last12Months,
}

impl TimePeriod {
    pub fn parse(token: &str) -> Self {
        match token {
            "this_month" => TimePeriod::ThisMonth,
            "this_quarter" => TimePeriod::ThisQuarter,
            "this_year" => TimePeriod::ThisYear,
            "last_month" => TimePeriod::LastMonth,
            "last_quarter" => TimePeriod::LastQuarter,
            "last_year" => TimePeriod::LastYear,
            "last_3_months" => TimePeriod::Last3Months,
            "last_6_months" => TimePeriod::Last6Months,
            "last_12_months" => TimePeriod::Last12Months,
            _ => TimePeriod::ThisYear,
        }
    }
}

/// Inclusive calendar boundaries (first day .. last day).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = ((date.month0() / 3) * 3) + 1;
    date.with_day(1)
        .and_then(|d| d.with_month(month))
        .unwrap_or(date)
}

fn year_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).and_then(|d| d.with_month(1)).unwrap_or(date)
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(date)
}

fn sub_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months)).unwrap_or(date)
}

/// Lower bound (inclusive) and, for bounded periods, the exclusive upper
/// bound. The `last_N_months` family is open-ended.
fn period_bounds(period: TimePeriod, today: NaiveDate) -> (NaiveDate, Option<NaiveDate>) {
    match period {
        TimePeriod::ThisMonth => {
            let start = month_start(today);
            (start, Some(add_months(start, 1)))
        }
        TimePeriod::ThisQuarter => {
            let start = quarter_start(today);
            (start, Some(add_months(start, 3)))
        }
        TimePeriod::ThisYear => {
            let start = year_start(today);
            (start, Some(add_months(start, 12)))
        }
        TimePeriod::LastMonth => {
            let end = month_start(today);
            (sub_months(end, 1), Some(end))
        }
        TimePeriod::LastQuarter => {
            let end = quarter_start(today);
            (sub_months(end, 3), Some(end))
        }
        TimePeriod::LastYear => {
            let end = year_start(today);
            (sub_months(end, 12), Some(end))
        }
        TimePeriod::Last3Months => (sub_months(month_start(today), 3), None),
        TimePeriod::Last6Months => (sub_months(month_start(today), 6), None),
        TimePeriod::Last12Months => (sub_months(month_start(today), 12), None),
    }
}

/// Boolean predicate bounding `column` by the period, evaluated against the
/// UTC server clock. Half-open (`>= start AND < end`) except the
/// `last_N_months` family, which is lower-bound-only.
pub fn time_period_to_date_clause(period: TimePeriod, column: &str) -> String {
    time_period_to_date_clause_at(period, column, Utc::now().date_naive())
}

pub fn time_period_to_date_clause_at(
    period: TimePeriod,
    column: &str,
    today: NaiveDate,
) -> String {
    let (start, end) = period_bounds(period, today);
    let start = start.format("%Y-%m-%d");
    match end {
        Some(end) => format!(
            "{column} >= TIMESTAMP('{start}') AND {column} < TIMESTAMP('{end}')",
            end = end.format("%Y-%m-%d")
        ),
        None => format!("{column} >= TIMESTAMP('{start}')"),
    }
}

/// Literal first/last calendar days for the period, used to scaffold a
/// complete month sequence (months with zero rows still chart).
pub fn time_period_to_date_range(period: TimePeriod) -> DateRange {
    time_period_to_date_range_at(period, Utc::now().date_naive())
}

pub fn time_period_to_date_range_at(period: TimePeriod, today: NaiveDate) -> DateRange {
    let (start, end) = period_bounds(period, today);
    // Open-ended periods run through the end of the current month.
    let end_exclusive = end.unwrap_or_else(|| add_months(month_start(today), 1));
    DateRange {
        start,
        end: end_exclusive.pred_opt().unwrap_or(end_exclusive),
    }
}

/// Bound on how long after an engagement touch a downstream stage
/// conversion may still be attributed to it. `Unlimited` yields an empty
/// string (no restriction).
pub fn funnel_length_clause(
    funnel_length: FunnelLength,
    touch_col: &str,
    stage_col: &str,
) -> String {
    match funnel_length {
        FunnelLength::Unlimited => String::new(),
        FunnelLength::Days(days) => {
            format!("TIMESTAMP_DIFF({stage_col}, {touch_col}, DAY) <= {days}")
        }
    }
}
