// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync bookkeeping: per-source state, per-run results and cycle summaries.

use crate::models::{BiometricReading, Workout};
use crate::time_utils::DateRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Registered, never synced.
    Pending,
    /// Last sync succeeded.
    Active,
    /// Last sync failed.
    Error,
}

/// Persistent per-source sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub source: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub success_count: u64,
}

impl SyncState {
    pub fn pending(source: &str) -> Self {
        Self {
            source: source.to_string(),
            last_sync: None,
            status: SyncStatus::Pending,
            last_error: None,
            last_error_at: None,
            success_count: 0,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
        self.status = SyncStatus::Active;
        self.last_error = None;
        self.success_count += 1;
    }

    /// A failure leaves `last_sync` and the success counter alone.
    pub fn record_failure(&mut self, error: &str, at: DateTime<Utc>) {
        self.status = SyncStatus::Error;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(at);
    }
}

/// What one connector returned from one `sync` call.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub source: String,
    pub workouts: Vec<Workout>,
    pub biometrics: Vec<BiometricReading>,
    pub sync_time: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn success(
        source: &str,
        workouts: Vec<Workout>,
        biometrics: Vec<BiometricReading>,
    ) -> Self {
        Self {
            source: source.to_string(),
            workouts,
            biometrics,
            sync_time: Utc::now(),
            success: true,
            error: None,
        }
    }

    pub fn failure(source: &str, error: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            workouts: Vec::new(),
            biometrics: Vec::new(),
            sync_time: Utc::now(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Counts from one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    pub original_count: usize,
    pub final_count: usize,
    pub duplicates_removed: usize,
    /// Percentage of input records removed.
    pub reduction_percent: f64,
    /// Kept records as a fraction of input (1.0 when nothing was removed).
    pub efficiency: f64,
}

impl DedupStats {
    pub fn new(original_count: usize, final_count: usize) -> Self {
        let removed = original_count.saturating_sub(final_count);
        let (reduction_percent, efficiency) = if original_count == 0 {
            (0.0, 1.0)
        } else {
            (
                removed as f64 / original_count as f64 * 100.0,
                final_count as f64 / original_count as f64,
            )
        };
        Self {
            original_count,
            final_count,
            duplicates_removed: removed,
            reduction_percent,
            efficiency,
        }
    }
}

/// Per-source line of a sync summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub success: bool,
    pub workouts: usize,
    pub biometrics: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Every selected source succeeded.
    Completed,
    /// At least one source succeeded and at least one failed.
    Partial,
    /// No source produced data (all failed, or none selected).
    NoDataSynced,
}

/// Result of one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub range: DateRange,
    pub status: SummaryStatus,
    pub message: Option<String>,
    pub sources_attempted: usize,
    pub successful_syncs: usize,
    pub failed_syncs: usize,
    pub source_results: Vec<SourceOutcome>,
    pub workout_dedup: DedupStats,
    pub biometric_dedup: DedupStats,
    pub workouts_persisted: usize,
    pub biometrics_persisted: usize,
    pub calibration_updates: usize,
    /// Set when writing the merged batch failed; source results still stand.
    pub persistence_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncSummary {
    /// Summary for a cycle that produced nothing to store.
    pub fn no_data(
        range: DateRange,
        message: &str,
        source_results: Vec<SourceOutcome>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let failed = source_results.iter().filter(|r| !r.success).count();
        Self {
            range,
            status: SummaryStatus::NoDataSynced,
            message: Some(message.to_string()),
            sources_attempted: source_results.len(),
            successful_syncs: 0,
            failed_syncs: failed,
            source_results,
            workout_dedup: DedupStats::default(),
            biometric_dedup: DedupStats::default(),
            workouts_persisted: 0,
            biometrics_persisted: 0,
            calibration_updates: 0,
            persistence_error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
