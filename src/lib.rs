// SPDX-License-Identifier: MIT

//! Vitals-Tracker: backend API for a personal health dashboard.
//!
//! This crate links a user's Fitbit account over OAuth 2.0, keeps the
//! token pair fresh server-side, and serves normalized activity, sleep,
//! heart rate, and weight metrics to the dashboard UI.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use std::sync::Arc;

use config::Config;
use db::CredentialStore;
use services::FitbitService;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CredentialStore>,
    pub fitbit: FitbitService,
}
