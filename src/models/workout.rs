// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Canonical workout model shared by every connector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Coarse sport grouping used for calorie tables, caps and calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SportCategory {
    Running,
    Cycling,
    Swimming,
    Walking,
    Hiking,
    Strength,
    Rowing,
    BallSport,
    Yoga,
    Other,
}

impl SportCategory {
    pub const ALL: [SportCategory; 10] = [
        SportCategory::Running,
        SportCategory::Cycling,
        SportCategory::Swimming,
        SportCategory::Walking,
        SportCategory::Hiking,
        SportCategory::Strength,
        SportCategory::Rowing,
        SportCategory::BallSport,
        SportCategory::Yoga,
        SportCategory::Other,
    ];

    /// Normalize a free-form vendor sport label.
    ///
    /// Labels are compared case-insensitively with separators removed, so
    /// `TrailRun`, `trail_run` and `Trail Run` all land on running.
    pub fn from_label(label: &str) -> Self {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "run" | "running" | "trailrun" | "trailrunning" | "virtualrun" | "treadmill"
            | "treadmillrunning" => SportCategory::Running,
            "ride" | "cycling" | "biking" | "bike" | "mountainbikeride" | "mountainbike"
            | "gravelride" | "virtualride" | "ebikeride" | "indoorcycling" | "velomobile" => {
                SportCategory::Cycling
            }
            "swim" | "swimming" | "openwaterswim" | "poolswim" => SportCategory::Swimming,
            "walk" | "walking" => SportCategory::Walking,
            "hike" | "hiking" => SportCategory::Hiking,
            "weighttraining" | "strengthtraining" | "strength" | "crossfit" | "workout"
            | "hiit" => SportCategory::Strength,
            "rowing" | "rowingmachine" | "row" | "canoeing" | "kayaking" => SportCategory::Rowing,
            "soccer" | "football" | "basketball" | "tennis" | "volleyball" | "badminton"
            | "pickleball" | "squash" | "racquetball" | "tabletennis" => SportCategory::BallSport,
            "yoga" | "pilates" | "stretching" => SportCategory::Yoga,
            _ => SportCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SportCategory::Running => "running",
            SportCategory::Cycling => "cycling",
            SportCategory::Swimming => "swimming",
            SportCategory::Walking => "walking",
            SportCategory::Hiking => "hiking",
            SportCategory::Strength => "strength",
            SportCategory::Rowing => "rowing",
            SportCategory::BallSport => "ball_sport",
            SportCategory::Yoga => "yoga",
            SportCategory::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for SportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the canonical calorie figure of a workout was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalorieMethod {
    Direct,
    Kilojoules,
    HeartRate,
    MetHeartRateReserve,
    StrengthIntervals,
    BasicMet,
    DistanceMet,
    Failed,
}

impl CalorieMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalorieMethod::Direct => "direct",
            CalorieMethod::Kilojoules => "kilojoules",
            CalorieMethod::HeartRate => "heart_rate",
            CalorieMethod::MetHeartRateReserve => "met_heart_rate_reserve",
            CalorieMethod::StrengthIntervals => "strength_intervals",
            CalorieMethod::BasicMet => "basic_met",
            CalorieMethod::DistanceMet => "distance_met",
            CalorieMethod::Failed => "failed",
        }
    }
}

/// Ordered GPS samples as `[longitude, latitude]` pairs.
///
/// Serialized as a list of `{lon, lat}` maps: Firestore rejects arrays
/// nested directly inside arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsTrack {
    #[serde(with = "track_points")]
    pub coordinates: Vec<[f64; 2]>,
}

mod track_points {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct TrackPoint {
        lon: f64,
        lat: f64,
    }

    pub fn serialize<S: Serializer>(coordinates: &[[f64; 2]], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(coordinates.iter().map(|[lon, lat]| TrackPoint {
            lon: *lon,
            lat: *lat,
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[f64; 2]>, D::Error> {
        let points = Vec::<TrackPoint>::deserialize(d)?;
        Ok(points.into_iter().map(|p| [p.lon, p.lat]).collect())
    }
}

impl GpsTrack {
    pub fn new(coordinates: Vec<[f64; 2]>) -> Self {
        Self { coordinates }
    }

    /// Build from a geo line string (x = longitude, y = latitude).
    pub fn from_line_string(line: &geo::LineString<f64>) -> Self {
        Self {
            coordinates: line.coords().map(|c| [c.x, c.y]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }
}

/// Vendor payloads kept verbatim for audit, keyed by source name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(pub BTreeMap<String, serde_json::Value>);

impl RawPayload {
    pub fn from_source(source: &str, payload: serde_json::Value) -> Self {
        let mut map = BTreeMap::new();
        map.insert(source.to_string(), payload);
        Self(map)
    }

    /// Union with another payload; entries already present win.
    pub fn merge(&mut self, other: &RawPayload) {
        for (source, payload) in &other.0 {
            self.0
                .entry(source.clone())
                .or_insert_with(|| payload.clone());
        }
    }
}

/// Deterministic workout id derived from the originating source and its
/// native id, so re-fetching the same vendor record always maps to the
/// same row.
pub fn workout_id(source: &str, external_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(external_id.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Canonical workout record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub workout_id: String,
    #[serde(default = "default_athlete")]
    pub athlete_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Authoritative over `end_time - start_time` when the two disagree.
    pub duration_secs: u64,
    /// Vendor sport label as reported.
    pub sport: String,
    pub sport_category: SportCategory,

    pub distance_meters: Option<f64>,
    /// Canonical calorie figure (device-reported or estimated).
    pub calories: Option<f64>,
    /// Calories as reported by the device, kept for calibration.
    pub device_calories: Option<f64>,
    /// Mechanical work reported by a power meter.
    pub kilojoules: Option<f64>,
    pub calorie_method: Option<CalorieMethod>,

    pub heart_rate_avg: Option<f64>,
    pub heart_rate_max: Option<f64>,
    pub elevation_gain: Option<f64>,
    pub power_avg: Option<f64>,
    pub cadence_avg: Option<f64>,
    pub training_load: Option<f64>,
    pub perceived_exertion: Option<u8>,

    pub has_gps: bool,
    pub route_fingerprint: Option<String>,
    pub track: Option<GpsTrack>,

    /// Source whose record is primary.
    pub source: String,
    /// Every source's native id for this workout.
    pub external_ids: BTreeMap<String, String>,
    pub data_quality_score: f64,
    #[serde(default)]
    pub ml_features_extracted: bool,
    #[serde(default)]
    pub raw_payload: RawPayload,
}

fn default_athlete() -> String {
    "default".to_string()
}

/// Why a normalized workout was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkoutValidationError {
    #[error("duration must be positive")]
    ZeroDuration,
    #[error("end time precedes start time")]
    EndBeforeStart,
    #[error("data quality score {0} outside [0, 1]")]
    QualityOutOfRange(f64),
    #[error("no external id for primary source {0}")]
    MissingExternalId(String),
    #[error("has_gps is set without a track or fingerprint")]
    GpsWithoutData,
}

impl Workout {
    /// Minimal workout for a source record; connectors fill the rest.
    pub fn new(
        source: &str,
        external_id: &str,
        start_time: DateTime<Utc>,
        duration_secs: u64,
        sport: &str,
    ) -> Self {
        let mut external_ids = BTreeMap::new();
        external_ids.insert(source.to_string(), external_id.to_string());
        Self {
            workout_id: workout_id(source, external_id),
            athlete_id: default_athlete(),
            start_time,
            end_time: Some(start_time + chrono::Duration::seconds(duration_secs as i64)),
            duration_secs,
            sport: sport.to_string(),
            sport_category: SportCategory::from_label(sport),
            distance_meters: None,
            calories: None,
            device_calories: None,
            kilojoules: None,
            calorie_method: None,
            heart_rate_avg: None,
            heart_rate_max: None,
            elevation_gain: None,
            power_avg: None,
            cadence_avg: None,
            training_load: None,
            perceived_exertion: None,
            has_gps: false,
            route_fingerprint: None,
            track: None,
            source: source.to_string(),
            external_ids,
            data_quality_score: 0.5,
            ml_features_extracted: false,
            raw_payload: RawPayload::default(),
        }
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_secs as f64 / 60.0
    }

    /// Attach a GPS track and its route fingerprint.
    pub fn set_track(&mut self, track: GpsTrack) {
        if track.is_empty() {
            return;
        }
        self.route_fingerprint = crate::services::route::route_fingerprint(&track);
        self.has_gps = true;
        self.track = Some(track);
    }

    /// Fraction of optional measurements present, in [0, 1].
    pub fn completeness_score(&self) -> f64 {
        let checks = [
            self.distance_meters.is_some_and(|d| d > 0.0),
            self.heart_rate_avg.is_some(),
            self.heart_rate_max.is_some(),
            self.device_calories.is_some_and(|c| c > 0.0),
            self.kilojoules.is_some() || self.power_avg.is_some(),
            self.elevation_gain.is_some(),
            self.cadence_avg.is_some(),
            self.has_gps,
        ];
        let present = checks.iter().filter(|c| **c).count() as f64;
        (0.4 + 0.6 * present / checks.len() as f64).min(1.0)
    }

    pub fn validate(&self) -> Result<(), WorkoutValidationError> {
        if self.duration_secs == 0 {
            return Err(WorkoutValidationError::ZeroDuration);
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(WorkoutValidationError::EndBeforeStart);
            }
        }
        if !(0.0..=1.0).contains(&self.data_quality_score) {
            return Err(WorkoutValidationError::QualityOutOfRange(
                self.data_quality_score,
            ));
        }
        if !self.external_ids.contains_key(&self.source) {
            return Err(WorkoutValidationError::MissingExternalId(
                self.source.clone(),
            ));
        }
        if self.has_gps && self.track.is_none() && self.route_fingerprint.is_none() {
            return Err(WorkoutValidationError::GpsWithoutData);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_workout_id_is_stable_and_source_scoped() {
        let a = workout_id("strava", "123");
        assert_eq!(a, workout_id("strava", "123"));
        assert_ne!(a, workout_id("garmin", "123"));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_sport_label_normalization() {
        assert_eq!(
            SportCategory::from_label("TrailRun"),
            SportCategory::Running
        );
        assert_eq!(
            SportCategory::from_label("Mountain Bike Ride"),
            SportCategory::Cycling
        );
        assert_eq!(
            SportCategory::from_label("WeightTraining"),
            SportCategory::Strength
        );
        assert_eq!(
            SportCategory::from_label("Tennis"),
            SportCategory::BallSport
        );
        assert_eq!(SportCategory::from_label("Curling"), SportCategory::Other);
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for category in SportCategory::ALL {
            assert_eq!(SportCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let workout = Workout::new("strava", "1", start(), 0, "Run");
        assert_eq!(
            workout.validate(),
            Err(WorkoutValidationError::ZeroDuration)
        );
    }

    #[test]
    fn test_validate_rejects_end_before_start() {
        let mut workout = Workout::new("strava", "1", start(), 600, "Run");
        workout.end_time = Some(start() - chrono::Duration::minutes(1));
        assert_eq!(
            workout.validate(),
            Err(WorkoutValidationError::EndBeforeStart)
        );
    }

    #[test]
    fn test_completeness_grows_with_data() {
        let mut workout = Workout::new("strava", "1", start(), 600, "Run");
        let bare = workout.completeness_score();
        workout.heart_rate_avg = Some(140.0);
        workout.distance_meters = Some(5000.0);
        assert!(workout.completeness_score() > bare);
        assert!(workout.completeness_score() <= 1.0);
    }

    #[test]
    fn test_track_serializes_as_point_maps() {
        let track = GpsTrack::new(vec![[-122.1, 37.4], [-122.2, 37.5]]);
        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"coordinates": [
                {"lon": -122.1, "lat": 37.4},
                {"lon": -122.2, "lat": 37.5}
            ]})
        );
        assert!(value["coordinates"][0].is_object());

        let back: GpsTrack = serde_json::from_value(value).unwrap();
        assert_eq!(back, track);
    }

    #[test]
    fn test_raw_payload_merge_keeps_existing() {
        let mut a = RawPayload::from_source("garmin", serde_json::json!({"id": 1}));
        let b = RawPayload::from_source("garmin", serde_json::json!({"id": 2}));
        let c = RawPayload::from_source("strava", serde_json::json!({"id": 3}));
        a.merge(&b);
        a.merge(&c);
        assert_eq!(a.0["garmin"]["id"], 1);
        assert_eq!(a.0["strava"]["id"], 3);
    }
}
