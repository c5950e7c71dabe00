// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cross-source deduplication.
//!
//! Workouts are clustered by three independent matchers (shared external
//! id, start time + duration, GPS route) into connected components, and
//! each component is collapsed into one record. The primary record of a
//! component is chosen by source precedence, never by arrival order, so
//! the output does not depend on the order of the input.

use crate::config::DedupPolicy;
use crate::models::{BiometricKey, BiometricReading, DedupStats, Workout};
use crate::services::route::gps_similarity;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Records that survived deduplication plus counts.
#[derive(Debug, Clone)]
pub struct DedupOutcome<T> {
    pub records: Vec<T>,
    pub stats: DedupStats,
}

/// Union-find over record indices.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Components as lists of member indices, ordered by smallest member.
    fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

pub struct DeduplicationEngine {
    policy: DedupPolicy,
}

impl DeduplicationEngine {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DedupPolicy {
        &self.policy
    }

    /// Position of `source` in the precedence list; unknown sources rank
    /// after every known one.
    pub fn precedence_rank(&self, source: &str) -> usize {
        self.policy
            .precedence
            .iter()
            .position(|s| s.eq_ignore_ascii_case(source))
            .unwrap_or(self.policy.precedence.len())
    }

    /// Same workout by time: same sport category, starts within the window
    /// and durations within the relative tolerance.
    pub fn is_temporal_match(&self, a: &Workout, b: &Workout) -> bool {
        if a.sport_category != b.sport_category {
            return false;
        }
        let start_diff = (a.start_time - b.start_time)
            .num_milliseconds()
            .unsigned_abs();
        if start_diff > self.policy.temporal_window.as_millis() as u64 {
            return false;
        }
        let longest = a.duration_secs.max(b.duration_secs);
        if longest == 0 {
            return true;
        }
        let diff = a.duration_secs.abs_diff(b.duration_secs) as f64;
        diff / longest as f64 <= self.policy.duration_tolerance
    }

    /// Same workout by route: identical fingerprints or enough aligned
    /// points within tolerance.
    ///
    /// Differing fingerprints do not rule a match out. Two recordings of
    /// one route rarely round to the same fingerprint, so when both
    /// tracks are present they are compared point by point.
    pub fn is_gps_match(&self, a: &Workout, b: &Workout) -> bool {
        if !a.has_gps || !b.has_gps {
            return false;
        }
        if let (Some(fa), Some(fb)) = (&a.route_fingerprint, &b.route_fingerprint) {
            if fa == fb {
                return true;
            }
        }
        match (&a.track, &b.track) {
            (Some(ta), Some(tb)) => {
                gps_similarity(ta, tb, self.policy.gps_point_tolerance_m)
                    >= self.policy.gps_similarity_threshold
            }
            _ => false,
        }
    }

    /// Collapse duplicate workouts across sources.
    pub fn deduplicate_workouts(&self, workouts: Vec<Workout>) -> DedupOutcome<Workout> {
        let original_count = workouts.len();
        let mut set = DisjointSet::new(original_count);

        // Pass 1: shared (source, native id).
        let mut seen_ids: HashMap<(&str, &str), usize> = HashMap::new();
        for (i, workout) in workouts.iter().enumerate() {
            for (source, id) in &workout.external_ids {
                match seen_ids.get(&(source.as_str(), id.as_str())) {
                    Some(&j) => set.union(i, j),
                    None => {
                        seen_ids.insert((source.as_str(), id.as_str()), i);
                    }
                }
            }
        }

        // Pass 2 and 3: pairwise temporal and route matching.
        for i in 0..original_count {
            for j in (i + 1)..original_count {
                if set.find(i) == set.find(j) {
                    continue;
                }
                let (a, b) = (&workouts[i], &workouts[j]);
                if self.is_temporal_match(a, b) || self.is_gps_match(a, b) {
                    set.union(i, j);
                }
            }
        }

        let groups = set.groups();
        let mut slots: Vec<Option<Workout>> = workouts.into_iter().map(Some).collect();
        let mut merged: Vec<Workout> = groups
            .into_iter()
            .map(|indices| {
                let members: Vec<Workout> =
                    indices.iter().filter_map(|&i| slots[i].take()).collect();
                self.merge_group(members)
            })
            .collect();

        merged.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.workout_id.cmp(&b.workout_id))
        });

        let stats = DedupStats::new(original_count, merged.len());
        if stats.duplicates_removed > 0 {
            tracing::debug!(
                original = stats.original_count,
                merged = stats.final_count,
                removed = stats.duplicates_removed,
                "Workout duplicates merged"
            );
        }

        DedupOutcome {
            records: merged,
            stats,
        }
    }

    /// Merge one duplicate group into a single workout.
    ///
    /// The highest-precedence record supplies identity and timing; numeric
    /// measurements take the best value any member reported.
    pub fn merge_group(&self, mut members: Vec<Workout>) -> Workout {
        members.sort_by(|a, b| {
            self.precedence_rank(&a.source)
                .cmp(&self.precedence_rank(&b.source))
                .then_with(|| a.workout_id.cmp(&b.workout_id))
        });

        if members.len() == 1 {
            if let Some(only) = members.pop() {
                return only;
            }
        }

        let mut merged = members[0].clone();

        merged.distance_meters = max_of(&members, |w| w.distance_meters);
        merged.device_calories = max_of(&members, |w| w.device_calories);
        merged.kilojoules = max_of(&members, |w| w.kilojoules);
        merged.elevation_gain = max_of(&members, |w| w.elevation_gain);
        merged.power_avg = max_of(&members, |w| w.power_avg);
        merged.cadence_avg = max_of(&members, |w| w.cadence_avg);
        merged.training_load = max_of(&members, |w| w.training_load);
        merged.heart_rate_max = max_of(&members, |w| w.heart_rate_max);

        // Calories follow the member that reported the most, method included.
        let calorie_source =
            members
                .iter()
                .filter(|w| w.calories.is_some())
                .fold(None::<&Workout>, |best, w| match best {
                    Some(b) if b.calories >= w.calories => Some(b),
                    _ => Some(w),
                });
        merged.calories = calorie_source.and_then(|w| w.calories);
        merged.calorie_method = calorie_source.and_then(|w| w.calorie_method);

        let heart_rates: Vec<f64> = members.iter().filter_map(|w| w.heart_rate_avg).collect();
        merged.heart_rate_avg = (!heart_rates.is_empty())
            .then(|| heart_rates.iter().sum::<f64>() / heart_rates.len() as f64);

        merged.perceived_exertion = members.iter().find_map(|w| w.perceived_exertion);

        match members.iter().find(|w| w.has_gps) {
            Some(gps) => {
                merged.has_gps = true;
                merged.route_fingerprint = gps.route_fingerprint.clone();
                merged.track = gps.track.clone();
            }
            None => {
                merged.has_gps = false;
                merged.route_fingerprint = None;
                merged.track = None;
            }
        }

        merged.data_quality_score = members
            .iter()
            .map(|w| w.data_quality_score)
            .fold(0.0, f64::max);

        for member in &members[1..] {
            for (source, id) in &member.external_ids {
                merged
                    .external_ids
                    .entry(source.clone())
                    .or_insert_with(|| id.clone());
            }
            merged.raw_payload.merge(&member.raw_payload);
        }

        merged.ml_features_extracted = false;
        merged
    }

    /// Collapse biometric readings sharing `(date, metric_type, source)`.
    ///
    /// Values are averaged weighted by confidence; the most confident
    /// reading supplies unit and external id.
    pub fn deduplicate_biometrics(
        &self,
        readings: Vec<BiometricReading>,
    ) -> DedupOutcome<BiometricReading> {
        let original_count = readings.len();
        let mut groups: BTreeMap<BiometricKey, Vec<BiometricReading>> = BTreeMap::new();
        for reading in readings {
            groups.entry(reading.key()).or_default().push(reading);
        }

        let merged: Vec<BiometricReading> = groups.into_values().map(merge_readings).collect();
        let stats = DedupStats::new(original_count, merged.len());

        DedupOutcome {
            records: merged,
            stats,
        }
    }
}

fn max_of<F>(members: &[Workout], field: F) -> Option<f64>
where
    F: Fn(&Workout) -> Option<f64>,
{
    members
        .iter()
        .filter_map(field)
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        })
}

fn merge_readings(mut group: Vec<BiometricReading>) -> BiometricReading {
    if group.len() == 1 {
        let mut only = group.remove(0);
        only.confidence = only.confidence.min(1.0);
        return only;
    }

    group.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.external_id.cmp(&b.external_id))
            .then_with(|| a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal))
    });

    let count = group.len() as f64;
    let total_weight: f64 = group.iter().map(|r| r.confidence).sum();
    let value = if total_weight > 0.0 {
        group.iter().map(|r| r.value * r.confidence).sum::<f64>() / total_weight
    } else {
        group.iter().map(|r| r.value).sum::<f64>() / count
    };

    let mut merged = group.swap_remove(0);
    merged.value = value;
    merged.confidence = (total_weight / count).min(1.0);
    merged
}
