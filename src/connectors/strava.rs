// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava connector.
//!
//! Handles:
//! - OAuth token refresh from a long-lived refresh token
//! - Paginated activity listing for a date range
//! - Profile weight and recent run/ride totals as biometrics
//! - Rate limit detection (429 and `X-RateLimit-*` headers)

use super::{Connector, ConnectorConfig, ConnectorContext, RateLimitInfo, RateLimitedExecutor};
use crate::error::ConnectorError;
use crate::models::biometric::metrics;
use crate::models::{BiometricReading, RawPayload, Workout};
use crate::services::route::decode_polyline;
use crate::time_utils::DateRange;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub const SOURCE: &str = "strava";

const DEFAULT_BASE_URL: &str = "https://www.strava.com/api/v3";
const DEFAULT_AUTH_URL: &str = "https://www.strava.com/oauth/token";
const PER_PAGE: usize = 200;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

const REQUIRED_FIELDS: &[&str] = &["client_id", "client_secret", "refresh_token"];
const OPTIONAL_FIELDS: &[&str] = &["access_token", "base_url", "auth_url"];
const SUPPORTED_METRICS: &[&str] = &[
    metrics::WEIGHT,
    metrics::RECENT_RUN_DISTANCE,
    metrics::RECENT_RIDE_DISTANCE,
];
const SUPPORTED_SPORTS: &[&str] = &[
    "Run",
    "TrailRun",
    "Ride",
    "VirtualRide",
    "GravelRide",
    "Swim",
    "Walk",
    "Hike",
    "WeightTraining",
    "Rowing",
    "Yoga",
    "Workout",
];

/// Current OAuth credentials.
struct TokenState {
    access_token: Option<String>,
    refresh_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    /// Access token that will not expire within the refresh margin.
    fn usable(&self, now: DateTime<Utc>) -> Option<&str> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) if now + margin < expires_at => Some(token),
            (Some(token), None) => Some(token),
            _ => None,
        }
    }
}

pub struct StravaConnector {
    http: reqwest::Client,
    base_url: String,
    auth_url: String,
    client_id: String,
    client_secret: String,
    tokens: Mutex<TokenState>,
    authenticated: AtomicBool,
    executor: RateLimitedExecutor,
    ctx: ConnectorContext,
}

impl StravaConnector {
    pub fn new(config: ConnectorConfig, ctx: ConnectorContext) -> Result<Self, ConnectorError> {
        config.require(REQUIRED_FIELDS)?;
        let field = |key: &str| config.get(key).unwrap_or_default().to_string();

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config
                .get("base_url")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            auth_url: config
                .get("auth_url")
                .unwrap_or(DEFAULT_AUTH_URL)
                .to_string(),
            client_id: field("client_id"),
            client_secret: field("client_secret"),
            tokens: Mutex::new(TokenState {
                access_token: config.get("access_token").map(str::to_string),
                refresh_token: field("refresh_token"),
                expires_at: None,
            }),
            authenticated: AtomicBool::new(false),
            executor: RateLimitedExecutor::new(SOURCE, ctx.executor.clone()),
            ctx,
        })
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Valid access token, refreshing when missing or about to expire.
    async fn access_token(&self) -> Result<String, ConnectorError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.usable(Utc::now()) {
            return Ok(token.to_string());
        }
        self.refresh_locked(&mut tokens).await
    }

    /// Force a refresh, e.g. after the vendor rejected the current token.
    async fn refresh_access_token(&self) -> Result<String, ConnectorError> {
        let mut tokens = self.tokens.lock().await;
        self.refresh_locked(&mut tokens).await
    }

    async fn refresh_locked(&self, tokens: &mut TokenState) -> Result<String, ConnectorError> {
        tracing::info!(source = SOURCE, "Refreshing access token");

        let refresh_token = tokens.refresh_token.clone();
        let this = self;
        let refresh_token = &refresh_token;
        let response: TokenRefreshResponse = self
            .executor
            .execute("token refresh", move || async move {
                let response = this
                    .http
                    .post(&this.auth_url)
                    .form(&[
                        ("client_id", this.client_id.as_str()),
                        ("client_secret", this.client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                        ("grant_type", "refresh_token"),
                    ])
                    .send()
                    .await?;
                this.executor.read_json(response).await
            })
            .await
            .map_err(|e| match e {
                // A rejected refresh token is a credential problem, not a bad request.
                ConnectorError::InvalidRequest(msg) => ConnectorError::Authentication(msg),
                other => other,
            })?;

        tokens.access_token = Some(response.access_token.clone());
        tokens.refresh_token = response.refresh_token;
        tokens.expires_at = DateTime::from_timestamp(response.expires_at, 0);
        Ok(response.access_token)
    }

    // ─── API Access ──────────────────────────────────────────────────────────

    /// GET a JSON document, retrying once with a fresh token on 401.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ConnectorError> {
        let token = self.access_token().await?;
        match self.get_json_with(path, query, &token).await {
            Err(ConnectorError::Authentication(msg)) => {
                tracing::info!(
                    source = SOURCE,
                    path,
                    "Token rejected, retrying after refresh"
                );
                let token = self.refresh_access_token().await.map_err(|e| match e {
                    ConnectorError::Authentication(_) => ConnectorError::Authentication(msg),
                    other => other,
                })?;
                self.get_json_with(path, query, &token).await
            }
            other => other,
        }
    }

    async fn get_json_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<T, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        let url = &url;
        let this = self;
        self.executor
            .execute(path, move || async move {
                let response = this
                    .http
                    .get(url.as_str())
                    .bearer_auth(token)
                    .query(query)
                    .send()
                    .await?;
                this.executor.read_json(response).await
            })
            .await
    }

    async fn get_athlete(&self) -> Result<StravaAthlete, ConnectorError> {
        self.get_json("/athlete", &[]).await
    }

    /// List activities started within `[after, before)` (paginated).
    async fn list_activities(
        &self,
        after: i64,
        before: i64,
        page: usize,
    ) -> Result<Vec<serde_json::Value>, ConnectorError> {
        self.get_json(
            "/athlete/activities",
            &[
                ("after", after.to_string()),
                ("before", before.to_string()),
                ("page", page.to_string()),
                ("per_page", PER_PAGE.to_string()),
            ],
        )
        .await
    }

    // ─── Normalization ───────────────────────────────────────────────────────

    /// Map one activity to a workout, or `None` if it is unusable.
    fn normalize_activity(&self, raw: serde_json::Value) -> Option<Workout> {
        let activity: StravaActivity = match serde_json::from_value(raw.clone()) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(source = SOURCE, error = %e, "Skipping undecodable activity");
                return None;
            }
        };

        let sport = activity
            .sport_type
            .as_deref()
            .or(activity.kind.as_deref())
            .unwrap_or("Workout");
        let mut workout = Workout::new(
            SOURCE,
            &activity.id.to_string(),
            activity.start_date,
            activity.elapsed_time,
            sport,
        );
        workout.athlete_id = self.ctx.athlete_id().to_string();
        workout.distance_meters = activity.distance.filter(|d| *d > 0.0);
        workout.heart_rate_avg = activity.average_heartrate;
        workout.heart_rate_max = activity.max_heartrate;
        workout.elevation_gain = activity.total_elevation_gain;
        workout.power_avg = activity.average_watts;
        workout.cadence_avg = activity.average_cadence;
        workout.kilojoules = activity.kilojoules.filter(|kj| *kj > 0.0);
        workout.device_calories = activity.calories.filter(|c| *c > 0.0);
        workout.training_load = activity.suffer_score;
        workout.perceived_exertion = activity
            .perceived_exertion
            .map(|p| p.round().clamp(1.0, 10.0) as u8);

        if let Some(track) = activity
            .map
            .as_ref()
            .and_then(|m| m.summary_polyline.as_deref())
            .and_then(decode_polyline)
        {
            workout.set_track(track);
        }

        workout.data_quality_score = workout.completeness_score();
        workout.raw_payload = RawPayload::from_source(SOURCE, raw);
        self.ctx
            .calories
            .apply(&mut workout, &self.ctx.profile, None);

        match workout.validate() {
            Ok(()) => Some(workout),
            Err(e) => {
                tracing::warn!(source = SOURCE, activity_id = activity.id, error = %e, "Dropping invalid activity");
                None
            }
        }
    }
}

#[async_trait]
impl Connector for StravaConnector {
    fn source_name(&self) -> &str {
        SOURCE
    }

    fn description(&self) -> &'static str {
        "Strava activities, profile weight and recent training totals"
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
        match self.get_athlete().await {
            Ok(athlete) => {
                tracing::info!(source = SOURCE, athlete_id = athlete.id, "Authenticated");
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Err(ConnectorError::Authentication(msg)) => {
                tracing::warn!(source = SOURCE, error = %msg, "Authentication rejected");
                self.authenticated.store(false, Ordering::SeqCst);
                Ok(false)
            }
            Err(e) => {
                self.authenticated.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn rate_limit(&self) -> Option<RateLimitInfo> {
        self.executor.rate_limit_info()
    }

    async fn fetch_workouts(&self, range: &DateRange) -> Result<Vec<Workout>, ConnectorError> {
        let after = range.start_time().timestamp();
        let before = range.end_time_exclusive().timestamp();

        let mut workouts = Vec::new();
        let mut page = 1;
        loop {
            let activities = self.list_activities(after, before, page).await?;
            let fetched = activities.len();
            workouts.extend(
                activities
                    .into_iter()
                    .filter_map(|raw| self.normalize_activity(raw))
                    .filter(|w| range.contains(w.start_time)),
            );
            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        tracing::info!(
            source = SOURCE,
            count = workouts.len(),
            pages = page,
            "Fetched activities"
        );
        Ok(workouts)
    }

    async fn fetch_biometrics(
        &self,
        range: &DateRange,
    ) -> Result<Vec<BiometricReading>, ConnectorError> {
        // Profile and totals are current values, dated today (or the range end
        // when syncing history).
        let day = Utc::now().date_naive().min(range.end);
        let mut readings = Vec::new();

        let athlete = self.get_athlete().await?;
        if let Some(weight) = athlete.weight.filter(|w| *w > 0.0) {
            readings.push(BiometricReading::new(
                day,
                metrics::WEIGHT,
                weight,
                "kg",
                SOURCE,
            ));
        }

        let stats_path = format!("/athletes/{}/stats", athlete.id);
        match self.get_json::<StravaAthleteStats>(&stats_path, &[]).await {
            Ok(stats) => {
                let totals = [
                    (metrics::RECENT_RUN_DISTANCE, stats.recent_run_totals),
                    (metrics::RECENT_RIDE_DISTANCE, stats.recent_ride_totals),
                ];
                for (metric, total) in totals {
                    if let Some(total) = total.filter(|t| t.count > 0) {
                        readings.push(BiometricReading::new(
                            day,
                            metric,
                            total.distance,
                            "m",
                            SOURCE,
                        ));
                    }
                }
            }
            Err(e @ ConnectorError::Authentication(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(source = SOURCE, error = %e, "Athlete stats unavailable");
            }
        }

        Ok(readings)
    }
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct StravaAthlete {
    id: u64,
    weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct StravaAthleteStats {
    recent_run_totals: Option<StravaTotals>,
    recent_ride_totals: Option<StravaTotals>,
}

#[derive(Debug, Clone, Deserialize)]
struct StravaTotals {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    distance: f64,
}

/// Summary activity from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
struct StravaActivity {
    id: u64,
    sport_type: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    start_date: DateTime<Utc>,
    #[serde(default)]
    elapsed_time: u64,
    distance: Option<f64>,
    average_heartrate: Option<f64>,
    max_heartrate: Option<f64>,
    total_elevation_gain: Option<f64>,
    average_watts: Option<f64>,
    average_cadence: Option<f64>,
    kilojoules: Option<f64>,
    calories: Option<f64>,
    suffer_score: Option<f64>,
    perceived_exertion: Option<f64>,
    map: Option<StravaMap>,
}

#[derive(Debug, Clone, Deserialize)]
struct StravaMap {
    summary_polyline: Option<String>,
}
