// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitness-Ingest: multi-source workout and biometric ingestion
//!
//! This crate pulls workouts and body metrics from fitness services,
//! merges duplicate reports of the same session, estimates calories with a
//! self-calibrating cascade, and serves the merged data over HTTP.

pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Store;
use services::IngestionOrchestrator;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<IngestionOrchestrator>,
}
