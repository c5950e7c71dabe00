// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes: sync trigger, sync status, connector discovery and reads
//! of the merged dataset.

use crate::connectors::ConnectorInfo;
use crate::db::{BiometricQuery, WorkoutQuery};
use crate::error::{AppError, Result};
use crate::models::{
    BiometricReading, BiometricSummary, SyncState, SyncSummary, Workout, WorkoutSummary,
};
use crate::time_utils::DateRange;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Longest window a single sync request may cover.
const MAX_SYNC_DAYS: u32 = 3650;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/status", get(get_sync_status))
        .route("/api/connectors", get(get_connectors))
        .route("/api/connectors/test", post(test_connectors))
        .route("/api/workouts", get(get_workouts))
        .route("/api/biometrics", get(get_biometrics))
        .route("/api/summary/workouts", get(get_workout_summary))
        .route("/api/summary/biometrics", get(get_biometric_summary))
}

// ─── Sync ────────────────────────────────────────────────────

/// Body of `POST /api/sync`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Trailing window when `start_date` is absent.
    pub days: Option<u32>,
    /// Restrict the cycle to these sources.
    pub sources: Option<Vec<String>>,
}

impl SyncRequest {
    /// Parse a JSON body; an empty body means "all defaults".
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid sync request: {e}")))
    }

    /// Resolve the requested window, defaulting to the last `default_days`.
    ///
    /// Explicit and trailing windows alike may span at most
    /// `MAX_SYNC_DAYS` days.
    pub fn date_range(&self, default_days: u32) -> Result<DateRange> {
        let days = self.days.unwrap_or(default_days);
        let range = match (self.start_date, self.end_date) {
            (Some(start), end) => {
                let end = end.unwrap_or_else(|| chrono::Utc::now().date_naive());
                DateRange::new(start, end).ok_or_else(|| {
                    AppError::BadRequest("start_date must not be after end_date".to_string())
                })?
            }
            (None, Some(end)) => DateRange::last_days_from(end, days),
            (None, None) => DateRange::last_days(days),
        };

        if days > MAX_SYNC_DAYS || range.num_days() > i64::from(MAX_SYNC_DAYS) {
            return Err(AppError::BadRequest(format!(
                "sync window must be at most {MAX_SYNC_DAYS} days"
            )));
        }
        Ok(range)
    }
}

/// Run one ingestion cycle and return its summary.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SyncSummary>> {
    let request = SyncRequest::from_body(&body)?;
    let range = request.date_range(state.config.default_sync_days)?;

    tracing::info!(
        start = %range.start,
        end = %range.end,
        sources = ?request.sources,
        "Sync requested"
    );

    let summary = state
        .orchestrator
        .sync_all_sources(range, request.sources.as_deref())
        .await;
    Ok(Json(summary))
}

#[derive(Serialize)]
pub struct SyncStatusResponse {
    pub sources: Vec<SyncState>,
}

async fn get_sync_status(State(state): State<Arc<AppState>>) -> Result<Json<SyncStatusResponse>> {
    let sources = state.orchestrator.sync_status().await?;
    Ok(Json(SyncStatusResponse { sources }))
}

// ─── Connectors ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct ConnectorsResponse {
    /// Every source this build can sync.
    pub available: Vec<String>,
    /// Sources registered with credentials.
    pub configured: Vec<ConnectorInfo>,
}

async fn get_connectors(State(state): State<Arc<AppState>>) -> Json<ConnectorsResponse> {
    Json(ConnectorsResponse {
        available: state.orchestrator.available_sources(),
        configured: state.orchestrator.connector_infos(),
    })
}

async fn test_connectors(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, bool>> {
    Json(state.orchestrator.test_connections().await)
}

// ─── Workouts & Biometrics ───────────────────────────────────

fn check_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    match (start, end) {
        (Some(s), Some(e)) if s > e => Err(AppError::BadRequest(
            "start_date must not be after end_date".to_string(),
        )),
        _ => Ok(()),
    }
}

#[derive(Serialize)]
pub struct WorkoutsResponse {
    pub count: usize,
    pub workouts: Vec<Workout>,
}

async fn get_workouts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkoutQuery>,
) -> Result<Json<WorkoutsResponse>> {
    check_dates(query.start_date, query.end_date)?;
    let workouts = state.orchestrator.get_workouts(&query).await?;
    Ok(Json(WorkoutsResponse {
        count: workouts.len(),
        workouts,
    }))
}

#[derive(Serialize)]
pub struct BiometricsResponse {
    pub count: usize,
    pub biometrics: Vec<BiometricReading>,
}

async fn get_biometrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BiometricQuery>,
) -> Result<Json<BiometricsResponse>> {
    check_dates(query.start_date, query.end_date)?;
    let biometrics = state.orchestrator.get_biometrics(&query).await?;
    Ok(Json(BiometricsResponse {
        count: biometrics.len(),
        biometrics,
    }))
}

// ─── Summaries ───────────────────────────────────────────────

async fn get_workout_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkoutQuery>,
) -> Result<Json<WorkoutSummary>> {
    check_dates(query.start_date, query.end_date)?;
    Ok(Json(state.orchestrator.workout_summary(&query).await?))
}

async fn get_biometric_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BiometricQuery>,
) -> Result<Json<BiometricSummary>> {
    check_dates(query.start_date, query.end_date)?;
    Ok(Json(state.orchestrator.biometric_summary(&query).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_explicit_range() {
        let request = SyncRequest {
            start_date: Some(day(1)),
            end_date: Some(day(10)),
            ..Default::default()
        };
        let range = request.date_range(30).unwrap();
        assert_eq!((range.start, range.end), (day(1), day(10)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let request = SyncRequest {
            start_date: Some(day(10)),
            end_date: Some(day(1)),
            ..Default::default()
        };
        assert!(matches!(
            request.date_range(30),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_trailing_window_from_end_date() {
        let request = SyncRequest {
            end_date: Some(day(20)),
            days: Some(7),
            ..Default::default()
        };
        let range = request.date_range(30).unwrap();
        assert_eq!((range.start, range.end), (day(14), day(20)));
        assert_eq!(range.num_days(), 7);
    }

    #[test]
    fn test_empty_body_uses_defaults() {
        let request = SyncRequest::from_body(b"").unwrap();
        assert!(request.sources.is_none());
        assert!(SyncRequest::from_body(b"{\"days\": \"x\"}").is_err());
    }

    #[test]
    fn test_oversized_window_rejected() {
        let request = SyncRequest {
            days: Some(MAX_SYNC_DAYS + 1),
            ..Default::default()
        };
        assert!(request.date_range(30).is_err());
    }

    #[test]
    fn test_oversized_explicit_range_rejected() {
        let request = SyncRequest {
            start_date: NaiveDate::from_ymd_opt(1990, 1, 1),
            end_date: Some(day(1)),
            ..Default::default()
        };
        assert!(matches!(
            request.date_range(30),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_trailing_window_at_earliest_date() {
        let request = SyncRequest {
            end_date: Some(NaiveDate::MIN),
            days: Some(30),
            ..Default::default()
        };
        let range = request.date_range(30).unwrap();
        assert_eq!(range.start, NaiveDate::MIN);
    }
}
