// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing [`Store`].
//!
//! One collection per table:
//! - `workouts/{workout_id}`
//! - `biometrics/{date}_{metric}_{source}`
//! - `sync_status/{source}`
//! - `athlete_profiles/{athlete_id}`
//! - `athlete_calorie_calibration/{athlete_id}_{category}`

use super::{collections, sort_biometrics_desc, BiometricQuery, Store, WorkoutQuery};
use crate::error::AppError;
use crate::models::{AthleteProfile, BiometricReading, CalibrationRecord, SyncState, Workout};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Serialize;

const MAX_CONCURRENT_DB_OPS: usize = 50;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client for testing.
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Upsert one document.
    async fn put<T>(&self, collection: &str, doc_id: &str, object: &T) -> Result<(), AppError>
    where
        T: Serialize + Sync + Send + for<'de> serde::Deserialize<'de>,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(doc_id)
            .object(object)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Upsert many documents with bounded concurrency.
    async fn put_all<T, F>(
        &self,
        collection: &'static str,
        records: &[T],
        id_of: F,
    ) -> Result<usize, AppError>
    where
        T: Serialize + Sync + Send + for<'de> serde::Deserialize<'de>,
        F: Fn(&T) -> String + Sync,
    {
        let client = self.get_client()?;

        stream::iter(records.iter().map(|r| (id_of(r), r)))
            .map(|(doc_id, record)| async move {
                let _: () = client
                    .fluent()
                    .update()
                    .in_col(collection)
                    .document_id(&doc_id)
                    .object(record)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok::<_, AppError>(())
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .boxed()
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        Ok(records.len())
    }
}

#[async_trait]
impl Store for FirestoreDb {
    // ─── Workouts ────────────────────────────────────────────────

    async fn upsert_workouts(&self, workouts: &[Workout]) -> Result<usize, AppError> {
        let written = self
            .put_all(collections::WORKOUTS, workouts, |w| w.workout_id.clone())
            .await?;
        tracing::debug!(count = written, "Workouts upserted");
        Ok(written)
    }

    async fn get_workouts(&self, query: &WorkoutQuery) -> Result<Vec<Workout>, AppError> {
        // Date bounds are pushed down; the remaining filters run in memory.
        let start = query
            .start_date
            .map(|d| format_utc_rfc3339(d.and_time(chrono::NaiveTime::MIN).and_utc()));
        let end = query
            .end_date
            .and_then(|d| d.succ_opt())
            .map(|d| format_utc_rfc3339(d.and_time(chrono::NaiveTime::MIN).and_utc()));

        let found: Vec<Workout> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::WORKOUTS)
            .filter(move |q| {
                q.for_all([
                    start
                        .clone()
                        .and_then(|s| q.field("start_time").greater_than_or_equal(s)),
                    end.clone().and_then(|e| q.field("start_time").less_than(e)),
                ])
            })
            .order_by([("start_time", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut found: Vec<Workout> = found.into_iter().filter(|w| query.matches(w)).collect();
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    // ─── Biometrics ──────────────────────────────────────────────

    async fn upsert_biometrics(&self, readings: &[BiometricReading]) -> Result<usize, AppError> {
        self.put_all(collections::BIOMETRICS, readings, |r| r.storage_id())
            .await
    }

    async fn get_biometrics(
        &self,
        query: &BiometricQuery,
    ) -> Result<Vec<BiometricReading>, AppError> {
        let metric = query.metric_type.clone();

        let found: Vec<BiometricReading> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::BIOMETRICS)
            .filter(move |q| q.for_all([metric.clone().and_then(|m| q.field("metric_type").eq(m))]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut found: Vec<BiometricReading> =
            found.into_iter().filter(|r| query.matches(r)).collect();
        sort_biometrics_desc(&mut found);
        Ok(found)
    }

    // ─── Sync Status ─────────────────────────────────────────────

    async fn get_sync_state(&self, source: &str) -> Result<Option<SyncState>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SYNC_STATUS)
            .obj()
            .one(source)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        self.put(collections::SYNC_STATUS, &state.source, state)
            .await
    }

    async fn list_sync_states(&self) -> Result<Vec<SyncState>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::SYNC_STATUS)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Athlete Profiles ────────────────────────────────────────

    async fn get_athlete_profile(
        &self,
        athlete_id: &str,
    ) -> Result<Option<AthleteProfile>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ATHLETE_PROFILES)
            .obj()
            .one(&urlencoding::encode(athlete_id))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_athlete_profile(&self, profile: &AthleteProfile) -> Result<(), AppError> {
        let doc_id = urlencoding::encode(&profile.athlete_id).into_owned();
        self.put(collections::ATHLETE_PROFILES, &doc_id, profile)
            .await
    }

    // ─── Calibration ─────────────────────────────────────────────

    async fn upsert_calibration(&self, record: &CalibrationRecord) -> Result<(), AppError> {
        self.put(collections::CALIBRATION, &record.storage_id(), record)
            .await
    }

    async fn list_calibrations(&self) -> Result<Vec<CalibrationRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::CALIBRATION)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
