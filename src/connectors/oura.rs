// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Oura ring connector (API v2, personal access token).
//!
//! Workouts come from the `workout` collection. Biometrics are steps and
//! active calories from `daily_activity`, plus HRV, lowest heart rate and
//! total sleep from `sleep`.

use super::{Connector, ConnectorConfig, ConnectorContext, RateLimitInfo, RateLimitedExecutor};
use crate::error::ConnectorError;
use crate::models::biometric::metrics;
use crate::models::{BiometricReading, RawPayload, Workout};
use crate::time_utils::DateRange;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub const SOURCE: &str = "oura";

const DEFAULT_BASE_URL: &str = "https://api.ouraring.com/v2/usercollection";

const REQUIRED_FIELDS: &[&str] = &["access_token"];
const OPTIONAL_FIELDS: &[&str] = &["base_url"];
const SUPPORTED_METRICS: &[&str] = &[
    metrics::STEPS,
    metrics::ACTIVE_CALORIES,
    metrics::HRV,
    metrics::RESTING_HEART_RATE,
    metrics::SLEEP_DURATION,
];
const SUPPORTED_SPORTS: &[&str] = &[
    "running",
    "cycling",
    "walking",
    "hiking",
    "swimming",
    "strength_training",
    "yoga",
];

/// Paged collection envelope shared by every v2 endpoint.
#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OuraWorkout {
    id: String,
    activity: String,
    start_datetime: DateTime<Utc>,
    end_datetime: DateTime<Utc>,
    calories: Option<f64>,
    distance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct DailyActivity {
    day: NaiveDate,
    steps: Option<u64>,
    active_calories: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct SleepPeriod {
    day: NaiveDate,
    #[serde(rename = "type")]
    kind: Option<String>,
    average_hrv: Option<f64>,
    lowest_heart_rate: Option<f64>,
    total_sleep_duration: Option<u64>,
}

pub struct OuraConnector {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    authenticated: AtomicBool,
    executor: RateLimitedExecutor,
    ctx: ConnectorContext,
}

impl OuraConnector {
    pub fn new(config: ConnectorConfig, ctx: ConnectorContext) -> Result<Self, ConnectorError> {
        config.require(REQUIRED_FIELDS)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config
                .get("base_url")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token: config.get("access_token").unwrap_or_default().to_string(),
            authenticated: AtomicBool::new(false),
            executor: RateLimitedExecutor::new(SOURCE, ctx.executor.clone()),
            ctx,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ConnectorError> {
        let url = format!("{}/{}", self.base_url, path);
        let url = &url;
        let this = self;
        self.executor
            .execute(path, move || async move {
                let response = this
                    .http
                    .get(url.as_str())
                    .bearer_auth(&this.access_token)
                    .query(query)
                    .send()
                    .await?;
                this.executor.read_json(response).await
            })
            .await
    }

    /// Every document of a collection within the date range, following
    /// `next_token` until exhausted.
    async fn fetch_collection<T: DeserializeOwned>(
        &self,
        collection: &str,
        range: &DateRange,
    ) -> Result<Vec<T>, ConnectorError> {
        // Oura treats end_date as exclusive for datetime collections.
        let end = range.end.succ_opt().unwrap_or(range.end);
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("start_date", range.start.to_string()),
                ("end_date", end.to_string()),
            ];
            if let Some(token) = next_token.take() {
                query.push(("next_token", token));
            }
            let page: Page<serde_json::Value> = self.get_json(collection, &query).await?;
            for item in page.data {
                match serde_json::from_value(item) {
                    Ok(parsed) => items.push(parsed),
                    Err(e) => {
                        tracing::warn!(source = SOURCE, collection, error = %e, "Skipping undecodable document")
                    }
                }
            }
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(items)
    }

    /// Decode one vendor document, keeping it verbatim as the raw payload.
    fn convert_workout(&self, document: serde_json::Value) -> Option<Workout> {
        let raw: OuraWorkout = match serde_json::from_value(document.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(source = SOURCE, error = %e, "Skipping undecodable workout");
                return None;
            }
        };
        self.normalize_workout(raw, document)
    }

    fn normalize_workout(&self, raw: OuraWorkout, document: serde_json::Value) -> Option<Workout> {
        let duration = (raw.end_datetime - raw.start_datetime).num_seconds();
        if duration < 0 {
            tracing::warn!(source = SOURCE, id = %raw.id, "Dropping workout that ends before it starts");
            return None;
        }

        let mut workout = Workout::new(
            SOURCE,
            &raw.id,
            raw.start_datetime,
            duration as u64,
            &raw.activity,
        );
        workout.athlete_id = self.ctx.athlete_id().to_string();
        workout.end_time = Some(raw.end_datetime);
        workout.distance_meters = raw.distance.filter(|d| *d > 0.0);
        workout.device_calories = raw.calories.filter(|c| *c > 0.0);
        workout.data_quality_score = workout.completeness_score();
        workout.raw_payload = RawPayload::from_source(SOURCE, document);
        self.ctx
            .calories
            .apply(&mut workout, &self.ctx.profile, None);

        match workout.validate() {
            Ok(()) => Some(workout),
            Err(e) => {
                tracing::warn!(source = SOURCE, error = %e, "Dropping invalid workout");
                None
            }
        }
    }
}

/// Collapse sleep periods into one set of readings per day.
///
/// Sleep durations are summed across periods (naps included). HRV comes
/// from the main `long_sleep` period when present, and resting heart rate
/// is the lowest value seen that day.
fn sleep_readings(periods: &[SleepPeriod], range: &DateRange) -> Vec<BiometricReading> {
    #[derive(Default)]
    struct Day {
        seconds: u64,
        hrv: Option<f64>,
        hrv_is_main: bool,
        lowest_hr: Option<f64>,
    }

    let mut days: BTreeMap<NaiveDate, Day> = BTreeMap::new();
    for period in periods.iter().filter(|p| range.contains_date(p.day)) {
        let day = days.entry(period.day).or_default();
        day.seconds += period.total_sleep_duration.unwrap_or(0);

        let is_main = period.kind.as_deref() == Some("long_sleep");
        if let Some(hrv) = period.average_hrv {
            if day.hrv.is_none() || (is_main && !day.hrv_is_main) {
                day.hrv = Some(hrv);
                day.hrv_is_main = is_main;
            }
        }
        if let Some(hr) = period.lowest_heart_rate.filter(|hr| *hr > 0.0) {
            day.lowest_hr = Some(day.lowest_hr.map_or(hr, |current| current.min(hr)));
        }
    }

    let mut readings = Vec::new();
    for (date, day) in days {
        if day.seconds > 0 {
            readings.push(BiometricReading::new(
                date,
                metrics::SLEEP_DURATION,
                day.seconds as f64 / 3600.0,
                "hours",
                SOURCE,
            ));
        }
        if let Some(hrv) = day.hrv {
            readings.push(BiometricReading::new(date, metrics::HRV, hrv, "ms", SOURCE));
        }
        if let Some(hr) = day.lowest_hr {
            readings.push(BiometricReading::new(
                date,
                metrics::RESTING_HEART_RATE,
                hr,
                "bpm",
                SOURCE,
            ));
        }
    }
    readings
}

#[async_trait]
impl Connector for OuraConnector {
    fn source_name(&self) -> &str {
        SOURCE
    }

    fn description(&self) -> &'static str {
        "Oura ring workouts, daily activity and sleep"
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        REQUIRED_FIELDS
    }

    fn optional_config_fields(&self) -> &'static [&'static str] {
        OPTIONAL_FIELDS
    }

    fn supported_metrics(&self) -> &'static [&'static str] {
        SUPPORTED_METRICS
    }

    fn supported_sports(&self) -> &'static [&'static str] {
        SUPPORTED_SPORTS
    }

    async fn authenticate(&self) -> Result<bool, ConnectorError> {
        let result = self
            .get_json::<serde_json::Value>("personal_info", &[])
            .await;
        let ok = match result {
            Ok(_) => true,
            Err(ConnectorError::Authentication(msg)) => {
                tracing::warn!(source = SOURCE, error = %msg, "Access token rejected");
                false
            }
            Err(e) => return Err(e),
        };
        self.authenticated.store(ok, Ordering::SeqCst);
        Ok(ok)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn rate_limit(&self) -> Option<RateLimitInfo> {
        self.executor.rate_limit_info()
    }

    async fn fetch_workouts(&self, range: &DateRange) -> Result<Vec<Workout>, ConnectorError> {
        let documents: Vec<serde_json::Value> = self.fetch_collection("workout", range).await?;
        let workouts: Vec<Workout> = documents
            .into_iter()
            .filter_map(|doc| self.convert_workout(doc))
            .filter(|w| range.contains(w.start_time))
            .collect();
        tracing::info!(source = SOURCE, count = workouts.len(), "Fetched workouts");
        Ok(workouts)
    }

    async fn fetch_biometrics(
        &self,
        range: &DateRange,
    ) -> Result<Vec<BiometricReading>, ConnectorError> {
        let mut readings = Vec::new();

        let activity: Vec<DailyActivity> = self.fetch_collection("daily_activity", range).await?;
        for day in activity.iter().filter(|d| range.contains_date(d.day)) {
            if let Some(steps) = day.steps {
                readings.push(BiometricReading::new(
                    day.day,
                    metrics::STEPS,
                    steps as f64,
                    "steps",
                    SOURCE,
                ));
            }
            if let Some(active) = day.active_calories {
                readings.push(BiometricReading::new(
                    day.day,
                    metrics::ACTIVE_CALORIES,
                    active,
                    "kcal",
                    SOURCE,
                ));
            }
        }

        let sleep: Vec<SleepPeriod> = self.fetch_collection("sleep", range).await?;
        readings.extend(sleep_readings(&sleep, range));

        tracing::info!(
            source = SOURCE,
            count = readings.len(),
            "Fetched biometrics"
        );
        Ok(readings)
    }
}
