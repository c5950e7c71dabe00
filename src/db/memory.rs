// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store for local runs and tests.

use super::{sort_biometrics_desc, sort_workouts_desc, BiometricQuery, Store, WorkoutQuery};
use crate::error::{AppError, Result};
use crate::models::{
    AthleteProfile, BiometricKey, BiometricReading, CalibrationRecord, SyncState, Workout,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    workouts: HashMap<String, Workout>,
    biometrics: BTreeMap<BiometricKey, BiometricReading>,
    sync_states: BTreeMap<String, SyncState>,
    profiles: HashMap<String, AthleteProfile>,
    calibrations: BTreeMap<String, CalibrationRecord>,
}

/// Store backed by in-memory maps behind a lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| AppError::Database("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| AppError::Database("memory store lock poisoned".to_string()))
    }

    /// Number of stored workouts.
    pub fn workout_count(&self) -> usize {
        self.read().map(|t| t.workouts.len()).unwrap_or(0)
    }

    /// Number of stored biometric readings.
    pub fn biometric_count(&self) -> usize {
        self.read().map(|t| t.biometrics.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_workouts(&self, workouts: &[Workout]) -> Result<usize> {
        let mut tables = self.write()?;
        for workout in workouts {
            tables
                .workouts
                .insert(workout.workout_id.clone(), workout.clone());
        }
        Ok(workouts.len())
    }

    async fn get_workouts(&self, query: &WorkoutQuery) -> Result<Vec<Workout>> {
        let tables = self.read()?;
        let mut found: Vec<Workout> = tables
            .workouts
            .values()
            .filter(|w| query.matches(w))
            .cloned()
            .collect();
        sort_workouts_desc(&mut found);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn upsert_biometrics(&self, readings: &[BiometricReading]) -> Result<usize> {
        let mut tables = self.write()?;
        for reading in readings {
            tables.biometrics.insert(reading.key(), reading.clone());
        }
        Ok(readings.len())
    }

    async fn get_biometrics(&self, query: &BiometricQuery) -> Result<Vec<BiometricReading>> {
        let tables = self.read()?;
        let mut found: Vec<BiometricReading> = tables
            .biometrics
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        sort_biometrics_desc(&mut found);
        Ok(found)
    }

    async fn get_sync_state(&self, source: &str) -> Result<Option<SyncState>> {
        Ok(self.read()?.sync_states.get(source).cloned())
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()> {
        self.write()?
            .sync_states
            .insert(state.source.clone(), state.clone());
        Ok(())
    }

    async fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        Ok(self.read()?.sync_states.values().cloned().collect())
    }

    async fn get_athlete_profile(&self, athlete_id: &str) -> Result<Option<AthleteProfile>> {
        Ok(self.read()?.profiles.get(athlete_id).cloned())
    }

    async fn upsert_athlete_profile(&self, profile: &AthleteProfile) -> Result<()> {
        self.write()?
            .profiles
            .insert(profile.athlete_id.clone(), profile.clone());
        Ok(())
    }

    async fn upsert_calibration(&self, record: &CalibrationRecord) -> Result<()> {
        self.write()?
            .calibrations
            .insert(record.storage_id(), record.clone());
        Ok(())
    }

    async fn list_calibrations(&self) -> Result<Vec<CalibrationRecord>> {
        Ok(self.read()?.calibrations.values().cloned().collect())
    }
}
