//! Workout and biometric summaries for dashboard-style queries.
//!
//! Built by folding records one at a time, so a summary can be computed
//! from a store query or updated incrementally as a sync lands.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::models::{BiometricReading, Workout};

/// Totals and breakdowns over a set of workouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkoutSummary {
    // ─── Totals ──────────────────────────────────────────────────
    #[serde(default)]
    pub total_workouts: u32,
    #[serde(default)]
    pub total_duration_secs: u64,
    #[serde(default)]
    pub total_distance_meters: f64,
    #[serde(default)]
    pub total_calories: f64,
    /// Workouts with a GPS track or fingerprint
    #[serde(default)]
    pub gps_workouts: u32,

    // ─── Breakdowns ──────────────────────────────────────────────
    /// Workout count per vendor sport label
    #[serde(default)]
    pub workouts_by_sport: BTreeMap<String, u32>,
    /// Workout count per sport category
    #[serde(default)]
    pub workouts_by_category: BTreeMap<String, u32>,
    /// Workout count per primary source
    #[serde(default)]
    pub workouts_by_source: BTreeMap<String, u32>,
    /// Total distance per sport category (meters)
    #[serde(default)]
    pub distance_by_category: BTreeMap<String, f64>,
    /// Count of workouts whose calories came from each method
    #[serde(default)]
    pub calorie_methods: BTreeMap<String, u32>,

    // ─── Time Series ─────────────────────────────────────────────
    /// Workout count per ISO week ("YYYY-Www")
    #[serde(default)]
    pub workouts_by_week: BTreeMap<String, u32>,
    /// Workout count per month ("YYYY-MM")
    #[serde(default)]
    pub workouts_by_month: BTreeMap<String, u32>,

    #[serde(skip)]
    seen: HashSet<String>,
}

impl WorkoutSummary {
    pub fn from_workouts<'a>(workouts: impl IntoIterator<Item = &'a Workout>) -> Self {
        let mut summary = Self::default();
        for workout in workouts {
            summary.add(workout);
        }
        summary
    }

    /// Fold in a workout.
    ///
    /// Returns `false` if this workout id was already counted.
    pub fn add(&mut self, workout: &Workout) -> bool {
        if !self.seen.insert(workout.workout_id.clone()) {
            return false;
        }

        let distance = workout.distance_meters.unwrap_or(0.0);
        self.total_workouts += 1;
        self.total_duration_secs += workout.duration_secs;
        self.total_distance_meters += distance;
        self.total_calories += workout.calories.unwrap_or(0.0);
        if workout.has_gps {
            self.gps_workouts += 1;
        }

        *self
            .workouts_by_sport
            .entry(workout.sport.clone())
            .or_insert(0) += 1;
        let category = workout.sport_category.as_str().to_string();
        *self
            .distance_by_category
            .entry(category.clone())
            .or_insert(0.0) += distance;
        *self.workouts_by_category.entry(category).or_insert(0) += 1;
        *self
            .workouts_by_source
            .entry(workout.source.clone())
            .or_insert(0) += 1;
        if let Some(method) = workout.calorie_method {
            *self
                .calorie_methods
                .entry(method.as_str().to_string())
                .or_insert(0) += 1;
        }

        let week = workout.start_time.iso_week();
        *self
            .workouts_by_week
            .entry(format!("{}-W{:02}", week.year(), week.week()))
            .or_insert(0) += 1;
        *self
            .workouts_by_month
            .entry(workout.start_time.format("%Y-%m").to_string())
            .or_insert(0) += 1;

        true
    }

    pub fn total_duration_hours(&self) -> f64 {
        self.total_duration_secs as f64 / 3600.0
    }
}

/// Per-metric aggregate inside a biometric summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: u32,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sources: Vec<String>,
    /// Mean value per day ("YYYY-MM-DD")
    pub daily_average: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiometricSummary {
    pub total_readings: u32,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl BiometricSummary {
    pub fn from_readings<'a>(readings: impl IntoIterator<Item = &'a BiometricReading>) -> Self {
        // metric -> day -> values
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
        let mut summary = Self::default();

        for reading in readings {
            summary.total_readings += 1;
            let metric = summary
                .metrics
                .entry(reading.metric_type.clone())
                .or_insert_with(|| MetricSummary {
                    unit: reading.unit.clone(),
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                    ..Default::default()
                });
            metric.count += 1;
            metric.min = metric.min.min(reading.value);
            metric.max = metric.max.max(reading.value);
            metric.mean += reading.value;
            if !metric.sources.contains(&reading.source) {
                metric.sources.push(reading.source.clone());
            }
            grouped
                .entry(reading.metric_type.clone())
                .or_default()
                .entry(reading.date.to_string())
                .or_default()
                .push(reading.value);
        }

        for (name, metric) in summary.metrics.iter_mut() {
            metric.mean /= metric.count as f64;
            metric.sources.sort();
            if let Some(days) = grouped.remove(name) {
                metric.daily_average = days
                    .into_iter()
                    .map(|(day, values)| {
                        let mean = values.iter().sum::<f64>() / values.len() as f64;
                        (day, mean)
                    })
                    .collect();
            }
        }

        summary
    }
}
