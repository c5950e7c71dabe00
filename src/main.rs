// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitness-Ingest API Server
//!
//! Syncs workouts and biometrics from the configured fitness services,
//! merges duplicates and serves the result.

use fitness_ingest::{
    config::{Config, StoreBackend},
    connectors::ConnectorRegistry,
    db::{FirestoreDb, MemoryStore, Store},
    services::{CalorieEngine, IngestionOrchestrator},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Fitness-Ingest API");

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(FirestoreDb::new(&config.gcp_project_id).await?),
        StoreBackend::Memory => {
            tracing::info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Restore learned calorie calibration
    let calories = Arc::new(CalorieEngine::new());
    let restored = calories.load_calibrations(store.as_ref()).await?;
    tracing::info!(count = restored, "Calibration records loaded");

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        &config,
        store.clone(),
        ConnectorRegistry::with_builtin(),
        calories,
    ));

    // A source with bad credentials is skipped, not fatal
    for (source, connector_config) in &config.connectors {
        if let Err(e) = orchestrator
            .register_connector(source, connector_config.clone())
            .await
        {
            tracing::error!(source = %source, error = %e, "Connector not registered");
        }
    }
    tracing::info!(
        sources = ?orchestrator.configured_sources(),
        "Connectors registered"
    );

    if let Some(every) = config.sync_interval {
        tracing::info!(interval_secs = every.as_secs(), "Periodic sync enabled");
        orchestrator
            .clone()
            .spawn_periodic_sync(every, config.default_sync_days);
    }

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        orchestrator,
    });

    // Build router
    let app = fitness_ingest::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fitness_ingest=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
