// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod account;
pub mod metric;

pub use account::StoredAccount;
pub use metric::{
    ActivityRecord, HeartRateRecord, MetricKind, MetricRecord, MetricRequest, Period, SleepRecord,
    WeightRecord,
};
