// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod athlete;
pub mod biometric;
pub mod calibration;
pub mod stats;
pub mod sync;
pub mod workout;

pub use athlete::{ActivityLevel, AthleteProfile, Gender};
pub use biometric::{BiometricKey, BiometricReading};
pub use calibration::CalibrationRecord;
pub use stats::{BiometricSummary, WorkoutSummary};
pub use sync::{
    DedupStats, SourceOutcome, SummaryStatus, SyncResult, SyncState, SyncStatus, SyncSummary,
};
pub use workout::{CalorieMethod, GpsTrack, RawPayload, SportCategory, Workout};
