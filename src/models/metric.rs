// SPDX-License-Identifier: MIT

//! Metric request and normalized record types.
//!
//! `MetricRecord` is the provider-agnostic shape the UI consumes: one
//! record per day per metric kind, with missing optional sub-fields
//! normalized to zero so summary aggregation never sees nulls.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// The metric families the dashboard can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    Activity,
    Sleep,
    HeartRate,
    Weight,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Activity => "activity",
            MetricKind::Sleep => "sleep",
            MetricKind::HeartRate => "heart-rate",
            MetricKind::Weight => "weight",
        };
        f.write_str(s)
    }
}

impl FromStr for MetricKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activity" => Ok(MetricKind::Activity),
            "sleep" => Ok(MetricKind::Sleep),
            "heart-rate" => Ok(MetricKind::HeartRate),
            "weight" => Ok(MetricKind::Weight),
            other => Err(AppError::BadRequest(format!(
                "Unknown metric type: {other}"
            ))),
        }
    }
}

/// Dashboard lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    SevenDays,
    FourteenDays,
    ThirtyDays,
}

impl Period {
    pub fn days(self) -> i64 {
        match self {
            Period::SevenDays => 7,
            Period::FourteenDays => 14,
            Period::ThirtyDays => 30,
        }
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(Period::SevenDays),
            "14d" => Ok(Period::FourteenDays),
            "30d" => Ok(Period::ThirtyDays),
            other => Err(AppError::BadRequest(format!(
                "Invalid period '{other}': expected 7d, 14d, or 30d"
            ))),
        }
    }
}

/// A single metric fetch, constructed per call and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricRequest {
    pub kind: MetricKind,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
}

impl MetricRequest {
    /// Build a request covering the trailing `period` window ending today.
    pub fn for_period(kind: MetricKind, period: Period, today: NaiveDate) -> Self {
        Self {
            kind,
            range_start: today - chrono::Duration::days(period.days()),
            range_end: today,
        }
    }
}

/// One normalized day of metric data.
///
/// Serialized untagged: each variant flattens to the field set the
/// dashboard expects for that metric family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricRecord {
    Activity(ActivityRecord),
    Sleep(SleepRecord),
    HeartRate(HeartRateRecord),
    Weight(WeightRecord),
}

/// Daily activity totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub date: NaiveDate,
    pub steps: u32,
    pub distance_km: f64,
    pub calories: u32,
    pub active_minutes: u32,
}

/// One night of sleep. Stage minutes default to 0 when the provider
/// returns no stage breakdown; their sum never exceeds `duration_minutes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub efficiency_percent: u8,
    pub deep_minutes: u32,
    pub light_minutes: u32,
    pub rem_minutes: u32,
    pub awake_minutes: u32,
    /// Local timestamp the sleep log started, as reported by the provider.
    pub bedtime: String,
    /// Local timestamp the sleep log ended, as reported by the provider.
    pub wake_time: String,
}

/// Daily heart rate summary with time-in-zone minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateRecord {
    pub date: NaiveDate,
    pub resting_heart_rate: u32,
    pub out_of_range_minutes: u32,
    pub fat_burn_minutes: u32,
    pub cardio_minutes: u32,
    pub peak_minutes: u32,
}

/// One weight log entry (latest of the day wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub date: NaiveDate,
    pub weight_kg: f64,
    pub bmi: f64,
    pub fat_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_parses_route_segments() {
        assert_eq!("activity".parse::<MetricKind>().unwrap(), MetricKind::Activity);
        assert_eq!("sleep".parse::<MetricKind>().unwrap(), MetricKind::Sleep);
        assert_eq!(
            "heart-rate".parse::<MetricKind>().unwrap(),
            MetricKind::HeartRate
        );
        assert_eq!("weight".parse::<MetricKind>().unwrap(), MetricKind::Weight);
        assert!("nutrition".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_period_parse_and_days() {
        assert_eq!("7d".parse::<Period>().unwrap().days(), 7);
        assert_eq!("14d".parse::<Period>().unwrap().days(), 14);
        assert_eq!("30d".parse::<Period>().unwrap().days(), 30);
        assert!("90d".parse::<Period>().is_err());
        assert!("7".parse::<Period>().is_err());
    }

    #[test]
    fn test_request_for_period_window() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        let req = MetricRequest::for_period(MetricKind::Sleep, Period::SevenDays, today);
        assert_eq!(req.range_end, today);
        assert_eq!(
            req.range_start,
            NaiveDate::from_ymd_opt(2026, 7, 31).unwrap()
        );
    }

    #[test]
    fn test_sleep_record_serializes_flat() {
        let record = MetricRecord::Sleep(SleepRecord {
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            duration_minutes: 450,
            efficiency_percent: 92,
            deep_minutes: 80,
            light_minutes: 230,
            rem_minutes: 100,
            awake_minutes: 40,
            bedtime: "2026-07-31T23:10:00.000".to_string(),
            wake_time: "2026-08-01T06:40:00.000".to_string(),
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["date"], "2026-08-01");
        assert_eq!(json["duration_minutes"], 450);
        // Untagged: no enum wrapper key in the payload
        assert!(json.get("Sleep").is_none());
    }
}
