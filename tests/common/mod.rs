// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fitness_ingest::config::Config;
use fitness_ingest::connectors::{Connector, ConnectorRegistry};
use fitness_ingest::db::{FirestoreDb, MemoryStore, Store};
use fitness_ingest::error::ConnectorError;
use fitness_ingest::models::{BiometricReading, Workout};
use fitness_ingest::routes::create_router;
use fitness_ingest::services::{CalorieEngine, IngestionOrchestrator};
use fitness_ingest::time_utils::DateRange;
use fitness_ingest::AppState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Fixed instant on 2024-05-01.
#[allow(dead_code)]
pub fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, min, sec).unwrap()
}

/// Range covering the fixture day.
#[allow(dead_code)]
pub fn fixture_range() -> DateRange {
    let day = at(0, 0, 0).date_naive();
    DateRange::new(day, day).unwrap()
}

/// Minimal workout from `source`.
#[allow(dead_code)]
pub fn workout(
    source: &str,
    external_id: &str,
    start: DateTime<Utc>,
    minutes: u64,
    sport: &str,
) -> Workout {
    let mut w = Workout::new(source, external_id, start, minutes * 60, sport);
    w.data_quality_score = w.completeness_score();
    w
}

/// Connector returning canned data, or failing authentication.
#[allow(dead_code)]
pub struct FakeConnector {
    pub name: String,
    pub workouts: Vec<Workout>,
    pub biometrics: Vec<BiometricReading>,
    pub auth_error: Option<String>,
    pub syncs: AtomicUsize,
    authenticated: AtomicBool,
}

#[allow(dead_code)]
impl FakeConnector {
    pub fn new(name: &str, workouts: Vec<Workout>, biometrics: Vec<BiometricReading>) -> Self {
        Self {
            name: name.to_string(),
            workouts,
            biometrics,
            auth_error: None,
            syncs: AtomicUsize::new(0),
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn failing(name: &str, message: &str) -> Self {
        let mut connector = Self::new(name, Vec::new(), Vec::new());
        connector.auth_error = Some(message.to_string());
        connector
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &'static str {
        "Canned test data"
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn supported_metrics(&self) -> &'static [&'static str] {
        &["weight"]
    }

    fn supported_sports(&self) -> &'static [&'static str] {
        &["Run", "Ride"]
    }

    async fn authenticate(&self) -> Result<bool, ConnectorError> {
        if let Some(message) = &self.auth_error {
            return Err(ConnectorError::Authentication(message.clone()));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn fetch_workouts(&self, range: &DateRange) -> Result<Vec<Workout>, ConnectorError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .workouts
            .iter()
            .filter(|w| range.contains(w.start_time))
            .cloned()
            .collect())
    }

    async fn fetch_biometrics(
        &self,
        range: &DateRange,
    ) -> Result<Vec<BiometricReading>, ConnectorError> {
        Ok(self
            .biometrics
            .iter()
            .filter(|r| range.contains_date(r.date))
            .cloned()
            .collect())
    }
}

/// Orchestrator over a fresh memory store with built-in connectors.
#[allow(dead_code)]
pub fn test_orchestrator(store: Arc<MemoryStore>) -> Arc<IngestionOrchestrator> {
    Arc::new(IngestionOrchestrator::new(
        &Config::test_default(),
        store,
        ConnectorRegistry::with_builtin(),
        Arc::new(CalorieEngine::new()),
    ))
}

/// Create a test app over an in-memory store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let store = Arc::new(MemoryStore::new());
    let orchestrator = test_orchestrator(store.clone());

    let state = Arc::new(AppState {
        config,
        store: store as Arc<dyn Store>,
        orchestrator,
    });

    (create_router(state.clone()), state)
}
