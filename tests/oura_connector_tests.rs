// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Oura connector against a mock HTTP server.

use fitness_ingest::config::Config;
use fitness_ingest::connectors::{Connector, ConnectorConfig, ConnectorContext, OuraConnector};
use fitness_ingest::models::biometric::metrics;
use fitness_ingest::models::{AthleteProfile, SportCategory};
use fitness_ingest::services::CalorieEngine;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;

mod common;
use common::fixture_range;

fn connector(server: &ServerGuard) -> OuraConnector {
    let base_url = server.url();
    let config =
        ConnectorConfig::from([("access_token", "pat-123"), ("base_url", base_url.as_str())]);
    let ctx = ConnectorContext {
        profile: AthleteProfile::default_for("default"),
        calories: Arc::new(CalorieEngine::new()),
        executor: Config::test_default().executor,
    };
    OuraConnector::new(config, ctx).unwrap()
}

#[tokio::test]
async fn test_workouts_follow_next_token() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", Matcher::Regex(r"^/workout".into()))
        .match_query(Matcher::Regex(
            r"^start_date=2024-05-01&end_date=2024-05-02$".into(),
        ))
        .match_header("authorization", "Bearer pat-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": [{
                    "id": "w-1",
                    "activity": "running",
                    "start_datetime": "2024-05-01T06:00:00Z",
                    "end_datetime": "2024-05-01T06:40:00Z",
                    "calories": 410.0,
                    "distance": 7000.0,
                    "intensity": "moderate"
                }],
                "next_token": "abc"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", Matcher::Regex(r"^/workout".into()))
        .match_query(Matcher::UrlEncoded("next_token".into(), "abc".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": [
                    {
                        "id": "w-2",
                        "activity": "cycling",
                        "start_datetime": "2024-05-01T17:00:00Z",
                        "end_datetime": "2024-05-01T18:00:00Z"
                    },
                    {
                        "id": "w-3",
                        "activity": "walking",
                        "start_datetime": "2024-05-01T20:00:00Z",
                        "end_datetime": "2024-05-01T20:00:00Z"
                    }
                ],
                "next_token": null
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let oura = connector(&server);
    let workouts = oura.fetch_workouts(&fixture_range()).await.unwrap();

    // The zero-length walk is dropped.
    assert_eq!(workouts.len(), 2);
    let run = workouts
        .iter()
        .find(|w| w.external_ids["oura"] == "w-1")
        .unwrap();
    assert_eq!(run.sport_category, SportCategory::Running);
    assert_eq!(run.duration_secs, 40 * 60);
    assert_eq!(run.device_calories, Some(410.0));
    let payload = &run.raw_payload.0["oura"];
    assert_eq!(payload["start_datetime"], "2024-05-01T06:00:00Z");
    assert_eq!(payload["intensity"], "moderate");
    let ride = workouts
        .iter()
        .find(|w| w.external_ids["oura"] == "w-2")
        .unwrap();
    assert_eq!(ride.sport_category, SportCategory::Cycling);

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_rejected_token_reports_unauthenticated() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/personal_info".into()))
        .with_status(401)
        .with_body(json!({"detail": "invalid token"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let oura = connector(&server);
    assert!(!oura.authenticate().await.unwrap());
    assert!(!oura.is_authenticated());
}

#[tokio::test]
async fn test_biometrics_from_activity_and_sleep() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/daily_activity".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": [{"day": "2024-05-01", "steps": 10432, "active_calories": 512.0}],
                "next_token": null
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/sleep".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": [{
                    "day": "2024-05-01",
                    "type": "long_sleep",
                    "average_hrv": 52.0,
                    "lowest_heart_rate": 47.0,
                    "total_sleep_duration": 27000
                }],
                "next_token": null
            })
            .to_string(),
        )
        .create_async()
        .await;

    let oura = connector(&server);
    let readings = oura.fetch_biometrics(&fixture_range()).await.unwrap();

    let value = |metric: &str| {
        readings
            .iter()
            .find(|r| r.metric_type == metric)
            .map(|r| r.value)
    };
    assert_eq!(readings.len(), 5);
    assert_eq!(value(metrics::STEPS), Some(10432.0));
    assert_eq!(value(metrics::ACTIVE_CALORIES), Some(512.0));
    assert_eq!(value(metrics::SLEEP_DURATION), Some(7.5));
    assert_eq!(value(metrics::HRV), Some(52.0));
    assert_eq!(value(metrics::RESTING_HEART_RATE), Some(47.0));
}
