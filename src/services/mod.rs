// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod fitbit;
pub mod kms;
pub mod metrics;

pub use fitbit::{FitbitClient, FitbitService, LinkOutcome, RefreshLocks, TokenCache};
pub use kms::KmsService;
