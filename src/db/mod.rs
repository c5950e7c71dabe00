// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer.
//!
//! [`Store`] is the storage contract the orchestrator and HTTP handlers
//! depend on. Every write is an upsert on the record's natural key, so
//! replaying a sync never duplicates rows.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{
    AthleteProfile, BiometricReading, CalibrationRecord, SportCategory, SyncState, Workout,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

/// Collection names as constants.
pub mod collections {
    /// Keyed by workout_id
    pub const WORKOUTS: &str = "workouts";
    /// Keyed by (date, metric_type, source)
    pub const BIOMETRICS: &str = "biometrics";
    /// Keyed by source name
    pub const SYNC_STATUS: &str = "sync_status";
    /// Keyed by athlete id
    pub const ATHLETE_PROFILES: &str = "athlete_profiles";
    /// Keyed by (athlete id, sport category)
    pub const CALIBRATION: &str = "athlete_calorie_calibration";
}

/// Filters for workout reads. Date bounds are inclusive calendar days on
/// the workout start time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkoutQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub source: Option<String>,
    pub sport_category: Option<SportCategory>,
    pub athlete_id: Option<String>,
    pub limit: Option<usize>,
}

impl WorkoutQuery {
    pub fn matches(&self, workout: &Workout) -> bool {
        let day = workout.start_time.date_naive();
        self.start_date.is_none_or(|d| day >= d)
            && self.end_date.is_none_or(|d| day <= d)
            && self.source.as_ref().is_none_or(|s| &workout.source == s)
            && self
                .sport_category
                .is_none_or(|c| workout.sport_category == c)
            && self
                .athlete_id
                .as_ref()
                .is_none_or(|a| &workout.athlete_id == a)
    }
}

/// Filters for biometric reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BiometricQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub metric_type: Option<String>,
    pub source: Option<String>,
}

impl BiometricQuery {
    pub fn matches(&self, reading: &BiometricReading) -> bool {
        self.start_date.is_none_or(|d| reading.date >= d)
            && self.end_date.is_none_or(|d| reading.date <= d)
            && self
                .metric_type
                .as_ref()
                .is_none_or(|m| &reading.metric_type == m)
            && self.source.as_ref().is_none_or(|s| &reading.source == s)
    }
}

/// Storage contract for every ingestion table.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert workouts keyed by `workout_id`. Returns rows written.
    async fn upsert_workouts(&self, workouts: &[Workout]) -> Result<usize>;

    /// Workouts matching `query`, most recent first.
    async fn get_workouts(&self, query: &WorkoutQuery) -> Result<Vec<Workout>>;

    /// Upsert readings keyed by `(date, metric_type, source)`.
    async fn upsert_biometrics(&self, readings: &[BiometricReading]) -> Result<usize>;

    /// Readings matching `query`, most recent first.
    async fn get_biometrics(&self, query: &BiometricQuery) -> Result<Vec<BiometricReading>>;

    async fn get_sync_state(&self, source: &str) -> Result<Option<SyncState>>;
    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()>;
    async fn list_sync_states(&self) -> Result<Vec<SyncState>>;

    async fn get_athlete_profile(&self, athlete_id: &str) -> Result<Option<AthleteProfile>>;
    async fn upsert_athlete_profile(&self, profile: &AthleteProfile) -> Result<()>;

    async fn upsert_calibration(&self, record: &CalibrationRecord) -> Result<()>;
    async fn list_calibrations(&self) -> Result<Vec<CalibrationRecord>>;
}

/// Newest-first ordering shared by backends that sort in memory.
pub(crate) fn sort_workouts_desc(workouts: &mut [Workout]) {
    workouts.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.workout_id.cmp(&b.workout_id))
    });
}

pub(crate) fn sort_biometrics_desc(readings: &mut [BiometricReading]) {
    readings.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.metric_type.cmp(&b.metric_type))
            .then_with(|| a.source.cmp(&b.source))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_workout_query_filters() {
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap();
        let workout = Workout::new("strava", "1", start, 600, "Run");

        let day = |d| NaiveDate::from_ymd_opt(2024, 5, d);
        let mut query = WorkoutQuery {
            start_date: day(10),
            end_date: day(10),
            ..Default::default()
        };
        assert!(query.matches(&workout));

        query.sport_category = Some(SportCategory::Cycling);
        assert!(!query.matches(&workout));

        query.sport_category = None;
        query.source = Some("garmin".into());
        assert!(!query.matches(&workout));

        let later = WorkoutQuery {
            start_date: day(11),
            ..Default::default()
        };
        assert!(!later.matches(&workout));
    }
}
