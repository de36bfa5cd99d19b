// SPDX-License-Identifier: MIT

//! Vitals-Tracker API Server
//!
//! Links a user's Fitbit account and serves normalized activity, sleep,
//! heart rate, and weight metrics to the dashboard frontend.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitals_tracker::{
    config::Config,
    db::FirestoreStore,
    services::{FitbitClient, FitbitService, KmsService},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Vitals-Tracker API");

    // Initialize the credential store
    let store = Arc::new(
        FirestoreStore::new(&config.gcp_project_id)
            .await
            .expect("Failed to connect to Firestore"),
    );

    // Initialize KMS service for token encryption at rest
    let kms = KmsService::new(&config.gcp_project_id, &config.gcp_region, "token-encryption")
        .await
        .expect("Failed to initialize KMS service");
    tracing::info!("KMS service initialized");

    // Initialize shared token cache and refresh locks
    // These are shared across all FitbitService clones within this instance
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());
    tracing::info!("Token cache initialized");

    // Initialize Fitbit service
    let fitbit_client = FitbitClient::new(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
    );
    let fitbit = FitbitService::new(
        fitbit_client,
        store.clone(),
        kms,
        token_cache,
        refresh_locks,
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        fitbit,
    });

    // Build router
    let app = vitals_tracker::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vitals_tracker=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
