// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ingestion orchestrator.
//!
//! One sync cycle:
//! 1. Run every selected connector concurrently (bounded pool)
//! 2. Record per-source [`SyncState`]
//! 3. Deduplicate the union of successful results
//! 4. Persist merged workouts and biometrics
//! 5. Feed device calorie values of newly seen workouts into calibration
//!
//! Connector failures never abort the cycle; a [`SyncSummary`] is always
//! returned.

use crate::config::{Config, ExecutorPolicy};
use crate::connectors::{
    Connector, ConnectorConfig, ConnectorContext, ConnectorInfo, ConnectorRegistry,
};
use crate::db::{BiometricQuery, Store, WorkoutQuery};
use crate::error::{AppError, Result};
use crate::models::biometric::metrics;
use crate::models::{
    ActivityLevel, AthleteProfile, BiometricReading, BiometricSummary, DedupStats, SourceOutcome,
    SummaryStatus, SyncResult, SyncState, SyncSummary, Workout, WorkoutSummary,
};
use crate::services::calories::CalorieEngine;
use crate::services::dedup::DeduplicationEngine;
use crate::time_utils::DateRange;
use chrono::Utc;
use futures_util::{stream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use validator::Validate;

/// Athlete synced when none is configured.
pub const DEFAULT_ATHLETE_ID: &str = "default";

pub struct IngestionOrchestrator {
    store: Arc<dyn Store>,
    registry: ConnectorRegistry,
    connectors: RwLock<BTreeMap<String, Arc<dyn Connector>>>,
    dedup: DeduplicationEngine,
    calories: Arc<CalorieEngine>,
    executor_policy: ExecutorPolicy,
    max_concurrent_syncs: usize,
    athlete_id: String,
}

impl IngestionOrchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        registry: ConnectorRegistry,
        calories: Arc<CalorieEngine>,
    ) -> Self {
        Self {
            store,
            registry,
            connectors: RwLock::new(BTreeMap::new()),
            dedup: DeduplicationEngine::new(config.dedup.clone()),
            calories,
            executor_policy: config.executor.clone(),
            max_concurrent_syncs: config.max_concurrent_syncs.max(1),
            athlete_id: DEFAULT_ATHLETE_ID.to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn calories(&self) -> &Arc<CalorieEngine> {
        &self.calories
    }

    pub fn athlete_id(&self) -> &str {
        &self.athlete_id
    }

    // ─── Connector Registration ──────────────────────────────────────────────

    /// Build a connector from the registry and attach it.
    ///
    /// Fails when the source is unknown or a required config key is missing.
    pub async fn register_connector(&self, name: &str, config: ConnectorConfig) -> Result<()> {
        let ctx = ConnectorContext {
            profile: self.resolve_profile().await?,
            calories: self.calories.clone(),
            executor: self.executor_policy.clone(),
        };
        let connector = self.registry.create(name, config, ctx)?;
        self.attach_connector(connector).await
    }

    /// Attach an already-built connector, creating its sync state if new.
    pub async fn attach_connector(&self, connector: Arc<dyn Connector>) -> Result<()> {
        let source = connector.source_name().to_string();

        if self.store.get_sync_state(&source).await?.is_none() {
            self.store
                .upsert_sync_state(&SyncState::pending(&source))
                .await?;
        }

        self.connectors_write()?.insert(source.clone(), connector);
        tracing::info!(source = %source, "Connector registered");
        Ok(())
    }

    /// Names of attached connectors, sorted.
    pub fn configured_sources(&self) -> Vec<String> {
        self.connectors
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every source the registry can build.
    pub fn available_sources(&self) -> Vec<String> {
        self.registry.available()
    }

    /// Descriptors of attached connectors.
    pub fn connector_infos(&self) -> Vec<ConnectorInfo> {
        self.connectors
            .read()
            .map(|c| c.values().map(|conn| conn.info()).collect())
            .unwrap_or_default()
    }

    /// Authenticate and probe every attached connector.
    pub async fn test_connections(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for (source, connector) in self.snapshot(None) {
            results.insert(source, connector.test_connection().await);
        }
        results
    }

    fn connectors_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn Connector>>>> {
        self.connectors
            .write()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("connector table lock poisoned")))
    }

    /// Attached connectors, optionally filtered by name (case-insensitive).
    fn snapshot(&self, sources: Option<&[String]>) -> Vec<(String, Arc<dyn Connector>)> {
        let Ok(connectors) = self.connectors.read() else {
            return Vec::new();
        };
        connectors
            .iter()
            .filter(|(name, _)| {
                sources.is_none_or(|wanted| wanted.iter().any(|w| w.eq_ignore_ascii_case(name)))
            })
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect()
    }

    // ─── Profile ─────────────────────────────────────────────────────────────

    /// Stored profile, or a default refined from stored data.
    ///
    /// The default takes weight, height, resting and max heart rate from
    /// the latest plausible biometric readings. Its activity level follows
    /// the number of workouts in the last 30 days once there are any.
    pub async fn resolve_profile(&self) -> Result<AthleteProfile> {
        if let Some(profile) = self.store.get_athlete_profile(&self.athlete_id).await? {
            match profile.validate() {
                Ok(()) => return Ok(profile),
                Err(e) => {
                    tracing::warn!(athlete_id = %self.athlete_id, error = %e, "Stored profile invalid, using defaults");
                }
            }
        }

        let mut profile = AthleteProfile::default_for(&self.athlete_id);
        if let Some(weight) = self.latest_reading(metrics::WEIGHT, 25.0..=350.0).await? {
            profile.weight_kg = weight;
        }
        profile.height_cm = self.latest_reading(metrics::HEIGHT, 100.0..=250.0).await?;
        profile.resting_hr = self
            .latest_reading(metrics::RESTING_HEART_RATE, 25.0..=120.0)
            .await?;
        profile.max_hr = self
            .latest_reading(metrics::MAX_HEART_RATE, 100.0..=230.0)
            .await?;

        let month = DateRange::last_days(30);
        let recent = self
            .store
            .get_workouts(&WorkoutQuery {
                start_date: Some(month.start),
                end_date: Some(month.end),
                athlete_id: Some(self.athlete_id.clone()),
                ..Default::default()
            })
            .await?
            .len();
        if recent > 0 {
            profile.activity_level = ActivityLevel::from_monthly_workouts(recent);
        }
        Ok(profile)
    }

    /// Newest reading of `metric` whose value lies in `plausible`.
    async fn latest_reading(
        &self,
        metric: &str,
        plausible: RangeInclusive<f64>,
    ) -> Result<Option<f64>> {
        let query = BiometricQuery {
            metric_type: Some(metric.to_string()),
            ..Default::default()
        };
        Ok(self
            .store
            .get_biometrics(&query)
            .await?
            .into_iter()
            .map(|r| r.value)
            .find(|v| plausible.contains(v)))
    }

    // ─── Sync ────────────────────────────────────────────────────────────────

    /// Run one ingestion cycle over `range`.
    ///
    /// `sources` restricts the cycle to the named connectors.
    pub async fn sync_all_sources(
        &self,
        range: DateRange,
        sources: Option<&[String]>,
    ) -> SyncSummary {
        let started_at = Utc::now();
        let selected = self.snapshot(sources);

        if selected.is_empty() {
            let message = if sources.is_some() {
                "No matching sources configured"
            } else {
                "No sources configured"
            };
            tracing::warn!(message, "Sync skipped");
            return SyncSummary::no_data(range, message, Vec::new(), started_at);
        }

        tracing::info!(
            sources = selected.len(),
            start = %range.start,
            end = %range.end,
            "Sync cycle started"
        );

        let mut results = self.run_connectors(selected, range).await;
        results.sort_by(|a, b| a.source.cmp(&b.source));

        let outcomes: Vec<SourceOutcome> = results
            .iter()
            .map(|r| SourceOutcome {
                source: r.source.clone(),
                success: r.success,
                workouts: r.workouts.len(),
                biometrics: r.biometrics.len(),
                error: r.error.clone(),
            })
            .collect();
        self.record_sync_states(&results).await;

        let successful = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - successful;
        if successful == 0 {
            tracing::warn!(failed, "No data synced");
            return SyncSummary::no_data(range, "No data synced", outcomes, started_at);
        }

        let (workouts, biometrics): (Vec<Workout>, Vec<BiometricReading>) = results
            .into_iter()
            .filter(|r| r.success)
            .fold((Vec::new(), Vec::new()), |(mut w, mut b), r| {
                w.extend(r.workouts);
                b.extend(r.biometrics);
                (w, b)
            });

        let workout_outcome = self.dedup.deduplicate_workouts(workouts);
        let biometric_outcome = self.dedup.deduplicate_biometrics(biometrics);

        let mut persistence_error = None;
        let previously_stored = match self.stored_workout_ids(&range).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read existing workouts");
                HashSet::new()
            }
        };

        let workouts_persisted = match self.store.upsert_workouts(&workout_outcome.records).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist workouts");
                persistence_error = Some(e.to_string());
                0
            }
        };
        let biometrics_persisted = match self
            .store
            .upsert_biometrics(&biometric_outcome.records)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist biometrics");
                persistence_error.get_or_insert_with(|| e.to_string());
                0
            }
        };

        let calibration_updates = if persistence_error.is_none() {
            let fresh: Vec<Workout> = workout_outcome
                .records
                .iter()
                .filter(|w| !previously_stored.contains(&w.workout_id))
                .cloned()
                .collect();
            self.update_calibration(&fresh).await
        } else {
            0
        };

        let summary = SyncSummary {
            range,
            status: if failed == 0 {
                SummaryStatus::Completed
            } else {
                SummaryStatus::Partial
            },
            message: None,
            sources_attempted: outcomes.len(),
            successful_syncs: successful,
            failed_syncs: failed,
            source_results: outcomes,
            workout_dedup: workout_outcome.stats,
            biometric_dedup: biometric_outcome.stats,
            workouts_persisted,
            biometrics_persisted,
            calibration_updates,
            persistence_error,
            started_at,
            finished_at: Utc::now(),
        };
        log_summary(&summary);
        summary
    }

    /// Sync each connector in its own task, at most `max_concurrent_syncs`
    /// at a time. A panicking connector becomes a failure result.
    async fn run_connectors(
        &self,
        selected: Vec<(String, Arc<dyn Connector>)>,
        range: DateRange,
    ) -> Vec<SyncResult> {
        stream::iter(selected)
            .map(|(source, connector)| async move {
                let handle = tokio::spawn(async move { connector.sync(&range).await });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => SyncResult::failure(&source, format!("Sync task failed: {e}")),
                }
            })
            .buffer_unordered(self.max_concurrent_syncs)
            .boxed()
            .collect()
            .await
    }

    async fn record_sync_states(&self, results: &[SyncResult]) {
        for result in results {
            let mut state = match self.store.get_sync_state(&result.source).await {
                Ok(Some(state)) => state,
                Ok(None) => SyncState::pending(&result.source),
                Err(e) => {
                    tracing::warn!(source = %result.source, error = %e, "Could not read sync state");
                    SyncState::pending(&result.source)
                }
            };

            if result.success {
                state.record_success(result.sync_time);
            } else {
                let error = result.error.as_deref().unwrap_or("unknown error");
                tracing::error!(source = %result.source, error, "Source sync failed");
                state.record_failure(error, result.sync_time);
            }

            if let Err(e) = self.store.upsert_sync_state(&state).await {
                tracing::warn!(source = %result.source, error = %e, "Could not store sync state");
            }
        }
    }

    async fn stored_workout_ids(&self, range: &DateRange) -> Result<HashSet<String>> {
        let query = WorkoutQuery {
            start_date: Some(range.start),
            end_date: Some(range.end),
            ..Default::default()
        };
        Ok(self
            .store
            .get_workouts(&query)
            .await?
            .into_iter()
            .map(|w| w.workout_id)
            .collect())
    }

    /// Learn calibration from `workouts` and persist changed records.
    async fn update_calibration(&self, workouts: &[Workout]) -> usize {
        if !workouts.iter().any(|w| w.device_calories.is_some()) {
            return 0;
        }

        let mut profiles = HashMap::new();
        match self.resolve_profile().await {
            Ok(profile) => {
                profiles.insert(profile.athlete_id.clone(), profile);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile unavailable, calibrating with defaults");
            }
        }

        let updated = self.calories.calibrate_from_workouts(workouts, &profiles);
        let mut stored = 0;
        for record in &updated {
            match self.store.upsert_calibration(record).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    tracing::warn!(
                        athlete_id = %record.athlete_id,
                        sport = %record.sport_category,
                        error = %e,
                        "Could not store calibration"
                    );
                }
            }
        }
        stored
    }

    /// Run `sync_all_sources` over the trailing `days` every `every`.
    ///
    /// The first cycle starts after one full interval.
    pub fn spawn_periodic_sync(self: Arc<Self>, every: Duration, days: u32) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let summary = self
                    .sync_all_sources(DateRange::last_days(days), None)
                    .await;
                tracing::info!(status = ?summary.status, "Periodic sync finished");
            }
        })
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub async fn sync_status(&self) -> Result<Vec<SyncState>> {
        self.store.list_sync_states().await
    }

    pub async fn get_workouts(&self, query: &WorkoutQuery) -> Result<Vec<Workout>> {
        self.store.get_workouts(query).await
    }

    pub async fn get_biometrics(&self, query: &BiometricQuery) -> Result<Vec<BiometricReading>> {
        self.store.get_biometrics(query).await
    }

    pub async fn workout_summary(&self, query: &WorkoutQuery) -> Result<WorkoutSummary> {
        let workouts = self.store.get_workouts(query).await?;
        Ok(WorkoutSummary::from_workouts(&workouts))
    }

    pub async fn biometric_summary(&self, query: &BiometricQuery) -> Result<BiometricSummary> {
        let readings = self.store.get_biometrics(query).await?;
        Ok(BiometricSummary::from_readings(&readings))
    }
}

fn log_summary(summary: &SyncSummary) {
    let DedupStats {
        original_count,
        final_count,
        reduction_percent,
        ..
    } = summary.workout_dedup;
    tracing::info!(
        status = ?summary.status,
        successful = summary.successful_syncs,
        failed = summary.failed_syncs,
        workouts_before = original_count,
        workouts_after = final_count,
        reduction_percent,
        biometrics = summary.biometric_dedup.final_count,
        calibration_updates = summary.calibration_updates,
        "Sync cycle finished"
    );
}
