// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava connector against a mock HTTP server.

use chrono::{Duration, Utc};
use fitness_ingest::config::Config;
use fitness_ingest::connectors::{Connector, ConnectorConfig, ConnectorContext, StravaConnector};
use fitness_ingest::models::biometric::metrics;
use fitness_ingest::models::{AthleteProfile, CalorieMethod};
use fitness_ingest::services::CalorieEngine;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;

mod common;
use common::fixture_range;

fn connector(server: &ServerGuard, access_token: Option<&str>) -> StravaConnector {
    let base_url = server.url();
    let auth_url = format!("{}/oauth/token", server.url());
    let mut config = ConnectorConfig::from([
        ("client_id", "1234"),
        ("client_secret", "shh"),
        ("refresh_token", "refresh-1"),
        ("base_url", base_url.as_str()),
        ("auth_url", auth_url.as_str()),
    ]);
    if let Some(token) = access_token {
        config = config.with("access_token", token);
    }

    let ctx = ConnectorContext {
        profile: AthleteProfile::default_for("default"),
        calories: Arc::new(CalorieEngine::new()),
        executor: Config::test_default().executor,
    };
    StravaConnector::new(config, ctx).unwrap()
}

fn token_body(access_token: &str) -> String {
    json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "refresh_token": "refresh-2",
        "expires_at": (Utc::now() + Duration::hours(6)).timestamp(),
        "expires_in": 21600
    })
    .to_string()
}

fn activity(id: u64, start: &str, minutes: u64) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Activity",
        "sport_type": "Run",
        "type": "Run",
        "start_date": start,
        "elapsed_time": minutes * 60,
        "distance": 5000.0,
        "average_heartrate": 148.0
    })
}

/// Activity with neither a duration nor a distance.
fn zero_length(id: u64, start: &str) -> serde_json::Value {
    let mut value = activity(id, start, 0);
    value["distance"] = serde_json::Value::Null;
    value
}

#[tokio::test]
async fn test_refreshes_token_then_fetches_activities() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh"))
        .expect(1)
        .create_async()
        .await;
    let athlete = server
        .mock("GET", Matcher::Regex(r"^/athlete(\?|$)".into()))
        .match_header("authorization", "Bearer fresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 42, "weight": 70.0}).to_string())
        .create_async()
        .await;
    let activities = server
        .mock("GET", Matcher::Regex(r"^/athlete/activities".into()))
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .match_header("authorization", "Bearer fresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-limit", "200,2000")
        .with_header("x-ratelimit-usage", "34,150")
        .with_body(
            json!([
                activity(1, "2024-05-01T06:30:00Z", 45),
                activity(2, "2024-05-02T06:30:00Z", 30),
                zero_length(3, "2024-05-01T18:00:00Z"),
            ])
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let strava = connector(&server, None);
    assert!(strava.authenticate().await.unwrap());
    assert!(strava.is_authenticated());

    let workouts = strava.fetch_workouts(&fixture_range()).await.unwrap();
    // Out-of-range and zero-length activities are dropped.
    assert_eq!(workouts.len(), 1);
    assert_eq!(workouts[0].external_ids["strava"], "1");
    assert!(workouts[0].calories.unwrap() > 0.0);

    let rate_limit = strava.info().rate_limit.unwrap();
    assert_eq!(rate_limit.remaining, Some(166));
    assert_eq!(rate_limit.retry_after_secs, None);

    token.assert_async().await;
    athlete.assert_async().await;
    activities.assert_async().await;
}

#[tokio::test]
async fn test_paginates_until_short_page() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh"))
        .create_async()
        .await;

    let full_page: Vec<serde_json::Value> = (0..200u64)
        .map(|i| {
            let start = format!("2024-05-01T{:02}:{:02}:00Z", i / 60, i % 60);
            activity(1000 + i, &start, 20)
        })
        .collect();
    let page_one = server
        .mock("GET", Matcher::Regex(r"^/athlete/activities".into()))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), "1".into()),
            Matcher::UrlEncoded("per_page".into(), "200".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::Value::Array(full_page).to_string())
        .expect(1)
        .create_async()
        .await;
    let page_two = server
        .mock("GET", Matcher::Regex(r"^/athlete/activities".into()))
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([activity(5000, "2024-05-01T22:00:00Z", 30)]).to_string())
        .expect(1)
        .create_async()
        .await;

    let strava = connector(&server, None);
    let workouts = strava.fetch_workouts(&fixture_range()).await.unwrap();
    assert_eq!(workouts.len(), 201);

    page_one.assert_async().await;
    page_two.assert_async().await;
}

#[tokio::test]
async fn test_distance_only_activity_gets_derived_duration() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh"))
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/athlete/activities".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([activity(7, "2024-05-01T06:30:00Z", 0)]).to_string())
        .create_async()
        .await;

    let strava = connector(&server, None);
    let workouts = strava.fetch_workouts(&fixture_range()).await.unwrap();

    assert_eq!(workouts.len(), 1);
    let run = &workouts[0];
    assert_eq!(run.calorie_method, Some(CalorieMethod::DistanceMet));
    // 5 km at a typical running pace of 2.8 m/s
    assert_eq!(run.duration_secs, 1786);
    assert!(run.calories.unwrap() > 0.0);
}

#[tokio::test]
async fn test_rejected_refresh_token_reports_unauthenticated() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "message": "Bad Request",
                "errors": [{"resource": "RefreshToken", "field": "refresh_token", "code": "invalid"}]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let strava = connector(&server, None);
    assert!(!strava.authenticate().await.unwrap());
    assert!(!strava.is_authenticated());

    let result = strava.sync(&fixture_range()).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("strava"));
}

#[tokio::test]
async fn test_stale_access_token_is_refreshed_once() {
    let mut server = Server::new_async().await;
    let stale = server
        .mock("GET", Matcher::Regex(r"^/athlete(\?|$)".into()))
        .match_header("authorization", "Bearer stale")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({"message": "Authorization Error"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let token = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh"))
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", Matcher::Regex(r"^/athlete(\?|$)".into()))
        .match_header("authorization", "Bearer fresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 42}).to_string())
        .expect(1)
        .create_async()
        .await;

    let strava = connector(&server, Some("stale"));
    assert!(strava.authenticate().await.unwrap());

    stale.assert_async().await;
    token.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn test_biometrics_from_profile_and_totals() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh"))
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/athlete(\?|$)".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 42, "weight": 68.5}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/athletes/42/stats".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "recent_run_totals": {"count": 3, "distance": 21000.0},
                "recent_ride_totals": {"count": 0, "distance": 0.0}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let strava = connector(&server, None);
    let range = fixture_range();
    let readings = strava.fetch_biometrics(&range).await.unwrap();

    assert_eq!(readings.len(), 2);
    let weight = readings
        .iter()
        .find(|r| r.metric_type == metrics::WEIGHT)
        .unwrap();
    assert_eq!(weight.value, 68.5);
    assert_eq!(weight.date, range.end);
    let run = readings
        .iter()
        .find(|r| r.metric_type == metrics::RECENT_RUN_DISTANCE)
        .unwrap();
    assert_eq!(run.value, 21000.0);
}

#[tokio::test]
async fn test_stats_failure_keeps_weight() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh"))
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/athlete(\?|$)".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 42, "weight": 68.5}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/athletes/42/stats".into()))
        .with_status(404)
        .with_body("{}")
        .create_async()
        .await;

    let strava = connector(&server, None);
    let readings = strava.fetch_biometrics(&fixture_range()).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].metric_type, metrics::WEIGHT);
}
