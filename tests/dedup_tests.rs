// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Deduplication engine properties.
//!
//! The merge outcome must depend only on which records belong together,
//! never on the order connectors happened to deliver them in.

use chrono::Duration;
use fitness_ingest::config::DedupPolicy;
use fitness_ingest::models::{GpsTrack, Workout};
use fitness_ingest::services::DeduplicationEngine;
use proptest::prelude::*;

mod common;
use common::{at, workout};

const SOURCES: [&str; 4] = ["garmin", "strava", "oura", "whoop"];
const SPORTS: [&str; 3] = ["Run", "Ride", "Walk"];

fn engine() -> DeduplicationEngine {
    DeduplicationEngine::new(DedupPolicy::default())
}

fn track_near(base: (f64, f64), offsets: &[(f64, f64)]) -> GpsTrack {
    GpsTrack::new(
        offsets
            .iter()
            .map(|(dx, dy)| [base.0 + dx, base.1 + dy])
            .collect(),
    )
}

/// (source, minute offset from 06:00, duration minutes, sport, calories)
type Spec = (usize, i64, u64, usize, Option<f64>);

fn build(specs: &[Spec]) -> Vec<Workout> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (source, offset, minutes, sport, calories))| {
            let start = at(6, 0, 0) + Duration::minutes(*offset);
            let mut w = workout(
                SOURCES[*source],
                &i.to_string(),
                start,
                *minutes,
                SPORTS[*sport],
            );
            w.calories = *calories;
            w
        })
        .collect()
}

fn spec_strategy() -> impl Strategy<Value = Spec> {
    (
        0..SOURCES.len(),
        0i64..240,
        10u64..90,
        0..SPORTS.len(),
        proptest::option::of(0.0f64..1500.0),
    )
}

#[test]
fn test_example_scenario_merges_into_primary() {
    let mut a = workout("garmin", "a-1", at(8, 0, 0), 42, "Run");
    a.calories = Some(420.0);

    let mut b = workout("strava", "b-1", at(8, 0, 20), 43, "Run");
    b.calories = Some(0.0);
    b.set_track(track_near(
        (-122.17, 37.42),
        &[(0.0, 0.0), (0.001, 0.001), (0.002, 0.002)],
    ));

    let out = engine().deduplicate_workouts(vec![b.clone(), a.clone()]);
    assert_eq!(out.records.len(), 1);

    let merged = &out.records[0];
    assert_eq!(merged.start_time, at(8, 0, 0));
    assert_eq!(merged.duration_secs, 42 * 60);
    assert_eq!(merged.calories, Some(420.0));
    assert!(merged.has_gps);
    assert_eq!(merged.route_fingerprint, b.route_fingerprint);
    assert_eq!(merged.track, b.track);
    assert_eq!(merged.external_ids["garmin"], "a-1");
    assert_eq!(merged.external_ids["strava"], "b-1");
}

#[test]
fn test_unknown_source_never_becomes_primary() {
    let a = workout("homebrew", "h", at(9, 0, 0), 30, "Ride");
    let b = workout("health_connect", "hc", at(9, 1, 0), 30, "Ride");
    let out = engine().deduplicate_workouts(vec![a, b]);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].source, "health_connect");
}

#[test]
fn test_gps_match_merges_offset_starts() {
    let route = [(0.0, 0.0), (0.001, 0.0), (0.002, 0.0), (0.003, 0.0)];
    let mut a = workout("garmin", "1", at(10, 0, 0), 60, "Run");
    a.set_track(track_near((-122.1, 37.4), &route));
    // Starts 20 minutes later, outside the temporal window.
    let mut b = workout("strava", "2", at(10, 20, 0), 60, "Run");
    b.set_track(track_near((-122.1, 37.4), &route));

    let e = engine();
    assert!(!e.is_temporal_match(&a, &b));
    assert!(e.is_gps_match(&a, &b));
    assert_eq!(e.deduplicate_workouts(vec![a, b]).records.len(), 1);
}

#[test]
fn test_empty_input() {
    let out = engine().deduplicate_workouts(Vec::new());
    assert!(out.records.is_empty());
    assert_eq!(out.stats.original_count, 0);
    assert_eq!(out.stats.duplicates_removed, 0);
}

proptest! {
    #[test]
    fn prop_precedence_wins_and_calories_take_max(
        cal_a in 0.0f64..2000.0,
        cal_b in 0.0f64..2000.0,
        lag in 0i64..300,
    ) {
        let mut a = workout("garmin", "a", at(7, 0, 0), 40, "TrailRun");
        a.calories = Some(cal_a);
        let mut b = workout("strava", "b", at(7, 0, 0) + Duration::seconds(lag), 41, "Run");
        b.calories = Some(cal_b);

        let merged = engine().merge_group(vec![b, a.clone()]);
        prop_assert_eq!(merged.start_time, a.start_time);
        prop_assert_eq!(merged.duration_secs, a.duration_secs);
        prop_assert_eq!(&merged.sport, &a.sport);
        prop_assert_eq!(merged.calories, Some(cal_a.max(cal_b)));
    }

    #[test]
    fn prop_gps_match_is_symmetric(
        offsets_a in prop::collection::vec((-0.0005f64..0.0005, -0.0005f64..0.0005), 1..20),
        offsets_b in prop::collection::vec((-0.0005f64..0.0005, -0.0005f64..0.0005), 1..20),
    ) {
        let e = engine();
        let mut x = workout("garmin", "x", at(6, 0, 0), 30, "Run");
        x.set_track(track_near((-122.0, 37.0), &offsets_a));
        let mut y = workout("strava", "y", at(12, 0, 0), 30, "Run");
        y.set_track(track_near((-122.0, 37.0), &offsets_b));

        prop_assert_eq!(e.is_gps_match(&x, &y), e.is_gps_match(&y, &x));
    }

    #[test]
    fn prop_outcome_is_order_independent(
        (specs, order) in prop::collection::vec(spec_strategy(), 1..12).prop_flat_map(|specs| {
            let n = specs.len();
            (Just(specs), Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
        })
    ) {
        let e = engine();
        let workouts = build(&specs);
        let shuffled: Vec<Workout> = order.iter().map(|&i| workouts[i].clone()).collect();

        let forward = e.deduplicate_workouts(workouts);
        let permuted = e.deduplicate_workouts(shuffled);
        prop_assert_eq!(forward.stats, permuted.stats);
        prop_assert_eq!(forward.records, permuted.records);
    }

    #[test]
    fn prop_dedup_is_idempotent(specs in prop::collection::vec(spec_strategy(), 0..12)) {
        let e = engine();
        let once = e.deduplicate_workouts(build(&specs));
        let twice = e.deduplicate_workouts(once.records.clone());

        prop_assert_eq!(twice.stats.duplicates_removed, 0);
        prop_assert_eq!(twice.records, once.records);
    }

    #[test]
    fn prop_final_count_never_exceeds_input(specs in prop::collection::vec(spec_strategy(), 0..12)) {
        let out = engine().deduplicate_workouts(build(&specs));
        prop_assert!(out.records.len() <= specs.len());
        prop_assert_eq!(out.stats.original_count, specs.len());
        prop_assert_eq!(
            out.stats.original_count - out.stats.final_count,
            out.stats.duplicates_removed
        );
    }
}
