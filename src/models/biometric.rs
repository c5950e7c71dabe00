// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily biometric readings (weight, resting heart rate, HRV, sleep...).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Well-known metric names. Connectors may emit others.
pub mod metrics {
    pub const WEIGHT: &str = "weight";
    pub const HEIGHT: &str = "height";
    pub const RESTING_HEART_RATE: &str = "resting_heart_rate";
    pub const HRV: &str = "hrv";
    pub const SLEEP_DURATION: &str = "sleep_duration";
    pub const STEPS: &str = "steps";
    pub const ACTIVE_CALORIES: &str = "active_calories";
    pub const MAX_HEART_RATE: &str = "max_heart_rate";
    pub const RECENT_RUN_DISTANCE: &str = "recent_run_distance";
    pub const RECENT_RIDE_DISTANCE: &str = "recent_ride_distance";
}

/// One reading of one metric on one day from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricReading {
    pub date: NaiveDate,
    pub metric_type: String,
    pub value: f64,
    pub unit: String,
    pub source: String,
    /// Confidence in [0, 1]; defaults to 1.0 for direct measurements.
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub external_id: Option<String>,
}

fn full_confidence() -> f64 {
    1.0
}

/// Natural key of a reading: `(date, metric_type, source)`.
pub type BiometricKey = (NaiveDate, String, String);

impl BiometricReading {
    pub fn new(date: NaiveDate, metric_type: &str, value: f64, unit: &str, source: &str) -> Self {
        Self {
            date,
            metric_type: metric_type.to_string(),
            value,
            unit: unit.to_string(),
            source: source.to_string(),
            confidence: 1.0,
            external_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn key(&self) -> BiometricKey {
        (self.date, self.metric_type.clone(), self.source.clone())
    }

    /// Document id used by persistence backends.
    pub fn storage_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.date,
            urlencoding::encode(&self.metric_type),
            urlencoding::encode(&self.source)
        )
    }
}
