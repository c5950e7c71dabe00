// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-athlete, per-sport calorie calibration factors.

use crate::models::SportCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ratios outside this band are treated as outliers and ignored.
pub const MIN_CALIBRATION_RATIO: f64 = 0.5;
pub const MAX_CALIBRATION_RATIO: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub athlete_id: String,
    pub sport_category: SportCategory,
    /// Multiplier applied to cascade estimates.
    pub factor: f64,
    pub sample_count: u32,
    pub last_updated: DateTime<Utc>,
}

impl CalibrationRecord {
    /// Fresh record with a neutral factor.
    pub fn new(athlete_id: &str, sport_category: SportCategory, now: DateTime<Utc>) -> Self {
        Self {
            athlete_id: athlete_id.to_string(),
            sport_category,
            factor: 1.0,
            sample_count: 0,
            last_updated: now,
        }
    }

    /// Fold one observed `actual / estimated` ratio into the running mean.
    ///
    /// Returns `false` (and leaves the record untouched) for outliers.
    pub fn observe(&mut self, ratio: f64, now: DateTime<Utc>) -> bool {
        if !is_plausible_ratio(ratio) {
            return false;
        }
        let n = self.sample_count as f64;
        self.factor = (self.factor * n + ratio) / (n + 1.0);
        self.sample_count += 1;
        self.last_updated = now;
        true
    }

    /// Document id used by persistence backends.
    pub fn storage_id(&self) -> String {
        storage_id(&self.athlete_id, self.sport_category)
    }
}

/// Whether an `actual / estimated` ratio may feed calibration.
pub fn is_plausible_ratio(ratio: f64) -> bool {
    ratio.is_finite() && (MIN_CALIBRATION_RATIO..=MAX_CALIBRATION_RATIO).contains(&ratio)
}

pub fn storage_id(athlete_id: &str, sport_category: SportCategory) -> String {
    format!("{}_{}", urlencoding::encode(athlete_id), sport_category)
}
