// SPDX-License-Identifier: MIT

//! Data fetch adapter: maps metric requests to Fitbit endpoints and
//! normalizes provider payloads into [`MetricRecord`]s.
//!
//! Normalization policy is fixed: sleep durations arrive in milliseconds
//! and are converted to minutes, missing optional sub-fields become 0
//! (never null), and an empty provider response yields an empty list -
//! the adapter never fabricates data.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{
    ActivityRecord, HeartRateRecord, MetricKind, MetricRecord, MetricRequest, SleepRecord,
    WeightRecord,
};
use crate::services::fitbit::FitbitClient;

/// Fetch and normalize one metric family over the requested date range.
pub async fn fetch(
    client: &FitbitClient,
    access_token: &str,
    request: &MetricRequest,
) -> Result<Vec<MetricRecord>, AppError> {
    let (start, end) = (request.range_start, request.range_end);

    match request.kind {
        MetricKind::Activity => {
            // The daily summary endpoint only covers a single date, so the
            // range fetch joins the per-resource time series by day.
            let (steps, distance, calories, very, fairly) = futures_util::try_join!(
                get_series(client, access_token, "steps", start, end),
                get_series(client, access_token, "distance", start, end),
                get_series(client, access_token, "calories", start, end),
                get_series(client, access_token, "minutesVeryActive", start, end),
                get_series(client, access_token, "minutesFairlyActive", start, end),
            )?;
            Ok(normalize_activity(&steps, &distance, &calories, &very, &fairly))
        }
        MetricKind::Sleep => {
            let url = format!(
                "{}/1.2/user/-/sleep/date/{start}/{end}.json",
                client.api_base()
            );
            let response: SleepResponse = client.get_json(&url, access_token).await?;
            Ok(normalize_sleep(response.sleep))
        }
        MetricKind::HeartRate => {
            let url = format!(
                "{}/1/user/-/activities/heart/date/{start}/{end}.json",
                client.api_base()
            );
            let response: HeartResponse = client.get_json(&url, access_token).await?;
            Ok(normalize_heart(&response.days))
        }
        MetricKind::Weight => {
            let url = format!(
                "{}/1/user/-/body/log/weight/date/{start}/{end}.json",
                client.api_base()
            );
            let response: WeightResponse = client.get_json(&url, access_token).await?;
            Ok(normalize_weight(response.weight))
        }
    }
}

/// Fetch one activity time series (steps, distance, ...).
async fn get_series(
    client: &FitbitClient,
    access_token: &str,
    resource: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<SeriesPoint>, AppError> {
    let url = format!(
        "{}/1/user/-/activities/{resource}/date/{start}/{end}.json",
        client.api_base()
    );

    // The response keys the series by resource: {"activities-steps": [...]}
    let mut response: HashMap<String, Vec<SeriesPoint>> =
        client.get_json(&url, access_token).await?;
    Ok(response
        .remove(&format!("activities-{resource}"))
        .unwrap_or_default())
}

// ─── Provider payload shapes ─────────────────────────────────────────────────

/// One day of an activity time series. Values arrive as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub date_time: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepResponse {
    #[serde(default)]
    pub sleep: Vec<SleepLog>,
}

/// A single sleep log from the v1.2 sleep endpoint. `duration` is in
/// milliseconds; the stage summary may be absent for short or manually
/// logged sleeps.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepLog {
    pub date_of_sleep: String,
    pub duration: i64,
    #[serde(default)]
    pub efficiency: i64,
    #[serde(default)]
    pub is_main_sleep: bool,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub levels: Option<SleepLevels>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepLevels {
    #[serde(default)]
    pub summary: Option<SleepStageSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepStageSummary {
    #[serde(default)]
    pub deep: Option<StageMinutes>,
    #[serde(default)]
    pub light: Option<StageMinutes>,
    #[serde(default)]
    pub rem: Option<StageMinutes>,
    #[serde(default)]
    pub wake: Option<StageMinutes>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageMinutes {
    #[serde(default)]
    pub minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartResponse {
    #[serde(rename = "activities-heart", default)]
    pub days: Vec<HeartDay>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartDay {
    pub date_time: String,
    pub value: HeartDayValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartDayValue {
    #[serde(default)]
    pub resting_heart_rate: Option<u32>,
    #[serde(default)]
    pub heart_rate_zones: Vec<HeartZone>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartZone {
    pub name: String,
    #[serde(default)]
    pub minutes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightResponse {
    #[serde(default)]
    pub weight: Vec<WeightLog>,
}

/// One weight log entry. `weight` is in kilograms (the API defaults to
/// metric units when no Accept-Language header is sent).
#[derive(Debug, Clone, Deserialize)]
pub struct WeightLog {
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    pub weight: f64,
    #[serde(default)]
    pub bmi: Option<f64>,
    #[serde(default)]
    pub fat: Option<f64>,
}

// ─── Normalization ───────────────────────────────────────────────────────────

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_series(points: &[SeriesPoint]) -> impl Iterator<Item = (NaiveDate, &str)> + '_ {
    points
        .iter()
        .filter_map(|p| parse_date(&p.date_time).map(|d| (d, p.value.as_str())))
}

/// Join the per-resource daily series into one record per day.
/// Days missing from a series default to 0 for that field.
pub fn normalize_activity(
    steps: &[SeriesPoint],
    distance: &[SeriesPoint],
    calories: &[SeriesPoint],
    very_active: &[SeriesPoint],
    fairly_active: &[SeriesPoint],
) -> Vec<MetricRecord> {
    let mut days: BTreeMap<NaiveDate, ActivityRecord> = BTreeMap::new();

    for (date, value) in parse_series(steps) {
        day_entry(&mut days, date).steps = value.parse().unwrap_or(0);
    }
    for (date, value) in parse_series(distance) {
        day_entry(&mut days, date).distance_km = value.parse().unwrap_or(0.0);
    }
    for (date, value) in parse_series(calories) {
        day_entry(&mut days, date).calories = value.parse().unwrap_or(0);
    }
    for (date, value) in parse_series(very_active) {
        day_entry(&mut days, date).active_minutes += value.parse().unwrap_or(0u32);
    }
    for (date, value) in parse_series(fairly_active) {
        day_entry(&mut days, date).active_minutes += value.parse().unwrap_or(0u32);
    }

    days.into_values().map(MetricRecord::Activity).collect()
}

fn day_entry(
    days: &mut BTreeMap<NaiveDate, ActivityRecord>,
    date: NaiveDate,
) -> &mut ActivityRecord {
    days.entry(date).or_insert(ActivityRecord {
        date,
        steps: 0,
        distance_km: 0.0,
        calories: 0,
        active_minutes: 0,
    })
}

/// Normalize sleep logs to one record per day: the main sleep wins, and
/// among several candidates the longest one does.
pub fn normalize_sleep(logs: Vec<SleepLog>) -> Vec<MetricRecord> {
    let mut by_day: BTreeMap<NaiveDate, SleepLog> = BTreeMap::new();

    for log in logs {
        let Some(date) = parse_date(&log.date_of_sleep) else {
            tracing::warn!(date = %log.date_of_sleep, "Skipping sleep log with unparseable date");
            continue;
        };
        match by_day.get(&date) {
            Some(existing) if ranks_above(existing, &log) => {}
            _ => {
                by_day.insert(date, log);
            }
        }
    }

    by_day
        .into_iter()
        .map(|(date, log)| MetricRecord::Sleep(sleep_record(date, &log)))
        .collect()
}

/// Whether `existing` should be kept over `candidate` for the same day.
fn ranks_above(existing: &SleepLog, candidate: &SleepLog) -> bool {
    if existing.is_main_sleep != candidate.is_main_sleep {
        return existing.is_main_sleep;
    }
    existing.duration >= candidate.duration
}

fn sleep_record(date: NaiveDate, log: &SleepLog) -> SleepRecord {
    // duration arrives in milliseconds
    let duration_minutes = (log.duration.max(0) / 60_000) as u32;

    let summary = log.levels.as_ref().and_then(|l| l.summary.as_ref());
    let stage = |get: fn(&SleepStageSummary) -> &Option<StageMinutes>| {
        summary
            .and_then(|s| get(s).as_ref())
            .map_or(0, |m| m.minutes)
    };

    // Stage minutes may never sum past the total duration, even when the
    // provider reports inconsistent breakdowns.
    let mut remaining = duration_minutes;
    let deep_minutes = stage(|s| &s.deep).min(remaining);
    remaining -= deep_minutes;
    let light_minutes = stage(|s| &s.light).min(remaining);
    remaining -= light_minutes;
    let rem_minutes = stage(|s| &s.rem).min(remaining);
    remaining -= rem_minutes;
    let awake_minutes = stage(|s| &s.wake).min(remaining);

    SleepRecord {
        date,
        duration_minutes,
        efficiency_percent: log.efficiency.clamp(0, 100) as u8,
        deep_minutes,
        light_minutes,
        rem_minutes,
        awake_minutes,
        bedtime: log.start_time.clone(),
        wake_time: log.end_time.clone(),
    }
}

/// Normalize daily heart rate summaries. Absent resting rate or zone
/// breakdowns default to 0.
pub fn normalize_heart(days: &[HeartDay]) -> Vec<MetricRecord> {
    let mut records: Vec<HeartRateRecord> = days
        .iter()
        .filter_map(|day| {
            let date = parse_date(&day.date_time)?;
            let mut record = HeartRateRecord {
                date,
                resting_heart_rate: day.value.resting_heart_rate.unwrap_or(0),
                out_of_range_minutes: 0,
                fat_burn_minutes: 0,
                cardio_minutes: 0,
                peak_minutes: 0,
            };
            for zone in &day.value.heart_rate_zones {
                let minutes = zone.minutes.unwrap_or(0);
                match zone.name.as_str() {
                    "Out of Range" => record.out_of_range_minutes = minutes,
                    "Fat Burn" => record.fat_burn_minutes = minutes,
                    "Cardio" => record.cardio_minutes = minutes,
                    "Peak" => record.peak_minutes = minutes,
                    other => {
                        tracing::debug!(zone = other, "Ignoring unknown heart rate zone");
                    }
                }
            }
            Some(record)
        })
        .collect();

    records.sort_by_key(|r| r.date);
    records.into_iter().map(MetricRecord::HeartRate).collect()
}

/// Normalize weight logs to one record per day (latest log of the day
/// wins). Missing BMI and body-fat values default to 0.
pub fn normalize_weight(logs: Vec<WeightLog>) -> Vec<MetricRecord> {
    let mut by_day: BTreeMap<NaiveDate, WeightLog> = BTreeMap::new();

    for log in logs {
        let Some(date) = parse_date(&log.date) else {
            tracing::warn!(date = %log.date, "Skipping weight log with unparseable date");
            continue;
        };
        match by_day.get(&date) {
            Some(existing) if existing.time >= log.time => {}
            _ => {
                by_day.insert(date, log);
            }
        }
    }

    by_day
        .into_iter()
        .map(|(date, log)| {
            MetricRecord::Weight(WeightRecord {
                date,
                weight_kg: log.weight,
                bmi: log.bmi.unwrap_or(0.0),
                fat_percent: log.fat.unwrap_or(0.0),
            })
        })
        .collect()
}
