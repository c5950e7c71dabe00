// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calorie estimation with per-athlete calibration.
//!
//! The estimator walks a cascade of methods, most accurate first, and
//! stops at the first one whose inputs are present:
//!
//! 1. device-reported calories (only when the record's quality > 0.9)
//! 2. mechanical work in kilojoules
//! 3. heart-rate regression (sex-specific, optional VO2max)
//! 4. sport MET scaled by heart-rate-reserve intensity
//! 5. work/rest intervals for strength sessions
//! 6. plain sport MET
//! 7. sport MET over a duration derived from distance
//!
//! Anything but a device value is then multiplied by the athlete's
//! calibration factor for the sport and capped at a per-sport
//! calories-per-minute ceiling.

use crate::db::Store;
use crate::error::Result;
use crate::models::calibration::is_plausible_ratio;
use crate::models::{
    AthleteProfile, CalibrationRecord, CalorieMethod, Gender, SportCategory, Workout,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Device values are trusted as-is above this quality score.
pub const DIRECT_QUALITY_THRESHOLD: f64 = 0.9;
/// kJ of mechanical work per kilocalorie.
pub const KJ_PER_KCAL: f64 = 4.184;
/// No estimate may exceed this many calories per minute.
pub const ABSOLUTE_MAX_CAL_PER_MIN: f64 = 25.0;
/// Share of a strength session spent under load.
pub const STRENGTH_WORK_RATIO: f64 = 0.4;
/// Upper bound on the heart-rate-reserve intensity multiplier.
pub const MAX_INTENSITY_FACTOR: f64 = 1.2;

const STRENGTH_WORK_MET: f64 = 6.0;
const STRENGTH_REST_MET: f64 = 1.5;

/// Plausible average heart rate for regression input.
const MIN_REGRESSION_HR: f64 = 40.0;
const MAX_REGRESSION_HR: f64 = 230.0;

/// Baseline MET per sport category.
pub fn base_met(category: SportCategory) -> f64 {
    match category {
        SportCategory::Running => 8.0,
        SportCategory::Cycling => 6.0,
        SportCategory::Swimming => 6.0,
        SportCategory::Walking => 3.5,
        SportCategory::Hiking => 4.5,
        SportCategory::Strength => 4.0,
        SportCategory::Rowing => 6.0,
        SportCategory::BallSport => 7.0,
        SportCategory::Yoga => 2.5,
        SportCategory::Other => 4.0,
    }
}

/// Per-sport ceiling in calories per minute, never above the absolute cap.
pub fn max_calories_per_minute(category: SportCategory) -> f64 {
    let sport_cap: f64 = match category {
        SportCategory::Running => 15.0,
        SportCategory::Cycling => 14.0,
        SportCategory::Swimming => 13.0,
        SportCategory::Walking => 8.0,
        SportCategory::Hiking => 11.0,
        SportCategory::Strength => 8.0,
        SportCategory::Rowing => 14.0,
        SportCategory::BallSport => 13.0,
        SportCategory::Yoga => 6.0,
        SportCategory::Other => 12.0,
    };
    sport_cap.min(ABSOLUTE_MAX_CAL_PER_MIN)
}

/// Typical moving speed in m/s, used to derive a missing duration.
pub fn typical_speed(category: SportCategory) -> f64 {
    match category {
        SportCategory::Running => 2.8,
        SportCategory::Cycling => 8.0,
        SportCategory::Swimming => 1.0,
        SportCategory::Walking => 1.4,
        SportCategory::Hiking => 1.1,
        SportCategory::Rowing => 3.0,
        _ => 2.0,
    }
}

/// Ambient conditions that shift heart-rate based estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvironmentalConditions {
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
}

impl EnvironmentalConditions {
    /// Multiplier for heat (+5% above 25°C), cold (+3% below 5°C) and
    /// humidity (+2% above 70%).
    pub fn adjustment(&self) -> f64 {
        let mut factor = 1.0;
        match self.temperature_c {
            Some(t) if t > 25.0 => factor *= 1.05,
            Some(t) if t < 5.0 => factor *= 1.03,
            _ => {}
        }
        if self.humidity_percent.is_some_and(|h| h > 70.0) {
            factor *= 1.02;
        }
        factor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalorieEstimate {
    pub calories: f64,
    pub method: CalorieMethod,
    pub confidence: f64,
    /// Inputs and intermediate values that produced the figure.
    pub factors: BTreeMap<String, f64>,
    pub quality_score: f64,
}

impl CalorieEstimate {
    fn failed(quality_score: f64) -> Self {
        Self {
            calories: 0.0,
            method: CalorieMethod::Failed,
            confidence: 0.0,
            factors: BTreeMap::new(),
            quality_score,
        }
    }
}

/// Raw cascade output before calibration and capping.
struct Candidate {
    calories: f64,
    method: CalorieMethod,
    confidence: f64,
    minutes: f64,
    factors: BTreeMap<String, f64>,
}

/// Calorie estimator that owns the calibration table.
#[derive(Default)]
pub struct CalorieEngine {
    calibrations: DashMap<(String, SportCategory), CalibrationRecord>,
}

impl CalorieEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warm the calibration table from persistence.
    pub async fn load_calibrations(&self, store: &dyn Store) -> Result<usize> {
        let records = store.list_calibrations().await?;
        let count = records.len();
        for record in records {
            self.calibrations
                .insert((record.athlete_id.clone(), record.sport_category), record);
        }
        tracing::info!(count, "Calibration factors loaded");
        Ok(count)
    }

    pub fn calibration(
        &self,
        athlete_id: &str,
        category: SportCategory,
    ) -> Option<CalibrationRecord> {
        self.calibrations
            .get(&(athlete_id.to_string(), category))
            .map(|r| r.value().clone())
    }

    /// Current factor, 1.0 when the pair has never been calibrated.
    pub fn calibration_factor(&self, athlete_id: &str, category: SportCategory) -> f64 {
        self.calibration(athlete_id, category)
            .map(|r| r.factor)
            .unwrap_or(1.0)
    }

    /// Full cascade with calibration applied.
    pub fn estimate(
        &self,
        workout: &Workout,
        profile: &AthleteProfile,
        env: Option<&EnvironmentalConditions>,
    ) -> CalorieEstimate {
        let factor = self.calibration_factor(&profile.athlete_id, workout.sport_category);
        finish(workout, run_cascade(workout, profile, env, true), factor)
    }

    /// Cascade without the device shortcut and without calibration.
    ///
    /// This is the independent estimate a device value is compared against
    /// when learning calibration factors.
    pub fn estimate_uncalibrated(
        &self,
        workout: &Workout,
        profile: &AthleteProfile,
        env: Option<&EnvironmentalConditions>,
    ) -> CalorieEstimate {
        finish(workout, run_cascade(workout, profile, env, false), 1.0)
    }

    /// Estimate and store the result as the workout's canonical calories.
    ///
    /// A workout reported without a duration but with a distance gets the
    /// duration implied by the sport's typical speed.
    pub fn apply(
        &self,
        workout: &mut Workout,
        profile: &AthleteProfile,
        env: Option<&EnvironmentalConditions>,
    ) -> CalorieEstimate {
        let estimate = self.estimate(workout, profile, env);
        if workout.duration_secs == 0 {
            if let Some(secs) = derived_duration_secs(workout) {
                workout.duration_secs = secs;
                let end = workout.start_time + chrono::Duration::seconds(secs as i64);
                workout.end_time = Some(end);
            }
        }
        if estimate.method == CalorieMethod::Failed {
            workout.calories = None;
        } else {
            workout.calories = Some(estimate.calories);
        }
        workout.calorie_method = Some(estimate.method);
        estimate
    }

    /// Fold one device-vs-estimate pair into the calibration table.
    ///
    /// Returns the updated record, or `None` when the ratio was rejected.
    pub fn record_observation(
        &self,
        athlete_id: &str,
        category: SportCategory,
        device_calories: f64,
        estimated_calories: f64,
        now: DateTime<Utc>,
    ) -> Option<CalibrationRecord> {
        if estimated_calories <= 0.0 || device_calories <= 0.0 {
            return None;
        }
        let ratio = device_calories / estimated_calories;
        if !is_plausible_ratio(ratio) {
            tracing::warn!(athlete_id, sport = %category, ratio, "Calibration ratio out of range, ignored");
            return None;
        }
        let mut entry = self
            .calibrations
            .entry((athlete_id.to_string(), category))
            .or_insert_with(|| CalibrationRecord::new(athlete_id, category, now));

        if !entry.observe(ratio, now) {
            return None;
        }
        tracing::debug!(
            athlete_id,
            sport = %category,
            ratio,
            factor = entry.factor,
            samples = entry.sample_count,
            "Calibration updated"
        );
        Some(entry.value().clone())
    }

    /// Learn from every workout carrying a device calorie value.
    ///
    /// Returns the final state of each record that changed.
    pub fn calibrate_from_workouts(
        &self,
        workouts: &[Workout],
        profiles: &HashMap<String, AthleteProfile>,
    ) -> Vec<CalibrationRecord> {
        let now = Utc::now();
        let mut updated: BTreeMap<String, CalibrationRecord> = BTreeMap::new();

        for workout in workouts {
            let Some(device) = workout.device_calories.filter(|c| *c > 0.0) else {
                continue;
            };
            let fallback;
            let profile = match profiles.get(&workout.athlete_id) {
                Some(p) => p,
                None => {
                    fallback = AthleteProfile::default_for(&workout.athlete_id);
                    &fallback
                }
            };

            let estimate = self.estimate_uncalibrated(workout, profile, None);
            if estimate.method == CalorieMethod::Failed {
                continue;
            }
            if let Some(record) = self.record_observation(
                &workout.athlete_id,
                workout.sport_category,
                device,
                estimate.calories,
                now,
            ) {
                updated.insert(record.storage_id(), record);
            }
        }

        updated.into_values().collect()
    }
}

/// Apply calibration and the per-minute cap to a cascade result.
fn finish(workout: &Workout, candidate: Option<Candidate>, calibration: f64) -> CalorieEstimate {
    let quality_score = workout.data_quality_score;
    let Some(mut c) = candidate else {
        return CalorieEstimate::failed(quality_score);
    };

    if c.method != CalorieMethod::Direct {
        c.calories *= calibration;
        c.factors.insert("calibration_factor".into(), calibration);

        let per_minute = max_calories_per_minute(workout.sport_category);
        let ceiling = per_minute * c.minutes;
        c.factors.insert("cap_cal_per_min".into(), per_minute);
        if c.calories > ceiling {
            c.factors.insert("capped_from".into(), c.calories);
            c.calories = ceiling;
        }
    }

    CalorieEstimate {
        calories: c.calories.max(0.0),
        method: c.method,
        confidence: c.confidence,
        factors: c.factors,
        quality_score,
    }
}

fn run_cascade(
    workout: &Workout,
    profile: &AthleteProfile,
    env: Option<&EnvironmentalConditions>,
    allow_direct: bool,
) -> Option<Candidate> {
    let category = workout.sport_category;
    let weight = profile.weight_kg;

    if allow_direct && workout.data_quality_score > DIRECT_QUALITY_THRESHOLD {
        if let Some(device) = workout.device_calories.filter(|c| *c > 0.0) {
            return Some(Candidate {
                calories: device,
                method: CalorieMethod::Direct,
                confidence: workout.data_quality_score,
                minutes: workout.duration_minutes(),
                factors: BTreeMap::from([("device_calories".to_string(), device)]),
            });
        }
    }

    if workout.duration_secs == 0 {
        return distance_met(workout, weight);
    }
    let minutes = workout.duration_minutes();
    let hours = minutes / 60.0;

    if let Some(kj) = workout.kilojoules.filter(|k| *k > 0.0) {
        return Some(Candidate {
            calories: kj / KJ_PER_KCAL,
            method: CalorieMethod::Kilojoules,
            confidence: 0.85,
            minutes,
            factors: BTreeMap::from([("kilojoules".to_string(), kj)]),
        });
    }

    if let Some(hr) = workout
        .heart_rate_avg
        .filter(|hr| (MIN_REGRESSION_HR..=MAX_REGRESSION_HR).contains(hr))
    {
        if let Some(per_minute) = heart_rate_regression(hr, profile) {
            let adjustment = env.map(|e| e.adjustment()).unwrap_or(1.0);
            return Some(Candidate {
                calories: per_minute * minutes * adjustment,
                method: CalorieMethod::HeartRate,
                confidence: if profile.vo2max.is_some() { 0.85 } else { 0.83 },
                minutes,
                factors: BTreeMap::from([
                    ("heart_rate_avg".to_string(), hr),
                    ("cal_per_min".to_string(), per_minute),
                    ("environment_adjustment".to_string(), adjustment),
                ]),
            });
        }

        if let Some(reserve) = profile.heart_rate_reserve() {
            let fraction = ((hr - profile.effective_resting_hr()) / reserve).clamp(0.0, 1.0);
            let intensity = (0.5 + fraction).min(MAX_INTENSITY_FACTOR);
            let met = base_met(category);
            return Some(Candidate {
                calories: met * intensity * weight * hours,
                method: CalorieMethod::MetHeartRateReserve,
                confidence: 0.75,
                minutes,
                factors: BTreeMap::from([
                    ("met".to_string(), met),
                    ("hrr_fraction".to_string(), fraction),
                    ("intensity_factor".to_string(), intensity),
                ]),
            });
        }
    }

    if category == SportCategory::Strength {
        let met = STRENGTH_WORK_MET * STRENGTH_WORK_RATIO
            + STRENGTH_REST_MET * (1.0 - STRENGTH_WORK_RATIO);
        return Some(Candidate {
            calories: met * weight * hours,
            method: CalorieMethod::StrengthIntervals,
            confidence: 0.70,
            minutes,
            factors: BTreeMap::from([
                ("met".to_string(), met),
                ("work_ratio".to_string(), STRENGTH_WORK_RATIO),
            ]),
        });
    }

    let met = base_met(category);
    Some(Candidate {
        calories: met * weight * hours,
        method: CalorieMethod::BasicMet,
        confidence: 0.60,
        minutes,
        factors: BTreeMap::from([("met".to_string(), met), ("weight_kg".to_string(), weight)]),
    })
}

/// Duration implied by distance at the sport's typical speed.
fn derived_duration_secs(workout: &Workout) -> Option<u64> {
    let distance = workout.distance_meters.filter(|d| *d > 0.0)?;
    let secs = (distance / typical_speed(workout.sport_category)).round();
    Some(secs.max(1.0) as u64)
}

/// Last resort when no duration was reported.
fn distance_met(workout: &Workout, weight: f64) -> Option<Candidate> {
    let distance = workout.distance_meters.filter(|d| *d > 0.0)?;
    let speed = typical_speed(workout.sport_category);
    let minutes = distance / speed / 60.0;
    let met = base_met(workout.sport_category);
    Some(Candidate {
        calories: met * weight * minutes / 60.0,
        method: CalorieMethod::DistanceMet,
        confidence: 0.50,
        minutes,
        factors: BTreeMap::from([
            ("met".to_string(), met),
            ("derived_minutes".to_string(), minutes),
            ("typical_speed".to_string(), speed),
        ]),
    })
}

/// Keytel et al. regression, kcal per minute. `None` when the formula
/// does not apply or yields a non-positive value.
fn heart_rate_regression(hr: f64, profile: &AthleteProfile) -> Option<f64> {
    let w = profile.weight_kg;
    let age = profile.age as f64;
    let kj_per_min = match (profile.gender, profile.vo2max) {
        (Gender::Male, Some(vo2)) => -95.7735 + 0.634 * hr + 0.404 * vo2 + 0.394 * w + 0.271 * age,
        (Gender::Female, Some(vo2)) => -59.3954 + 0.45 * hr + 0.380 * vo2 + 0.103 * w + 0.274 * age,
        (Gender::Male, None) => -55.0969 + 0.6309 * hr + 0.1988 * w + 0.2017 * age,
        (Gender::Female, None) => -20.4022 + 0.4472 * hr - 0.1263 * w + 0.074 * age,
        (Gender::Unspecified, _) => return None,
    };
    let per_minute = kj_per_min / KJ_PER_KCAL;
    (per_minute > 0.0).then_some(per_minute)
}
