// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Connector credentials follow a `<SOURCE>_<KEY>` naming scheme, so
//! `STRAVA_CLIENT_ID` becomes the `client_id` entry of the `strava`
//! connector config.

use crate::connectors::ConnectorConfig;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default source precedence, most trusted first.
pub const DEFAULT_PRECEDENCE: [&str; 8] = [
    "garmin",
    "strava",
    "fitbit",
    "oura",
    "whoop",
    "withings",
    "healthkit",
    "health_connect",
];

/// Thresholds used when clustering workouts into duplicate groups.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupPolicy {
    /// Source names, most trusted first. Unknown sources rank last.
    pub precedence: Vec<String>,
    /// Maximum start-time difference for a temporal match.
    pub temporal_window: Duration,
    /// Maximum relative duration difference for a temporal match (0.10 = 10%).
    pub duration_tolerance: f64,
    /// Minimum fraction of matching GPS points for a route match.
    pub gps_similarity_threshold: f64,
    /// Two GPS points "match" when closer than this many meters.
    pub gps_point_tolerance_m: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            precedence: DEFAULT_PRECEDENCE.iter().map(|s| s.to_string()).collect(),
            temporal_window: Duration::from_secs(5 * 60),
            duration_tolerance: 0.10,
            gps_similarity_threshold: 0.8,
            gps_point_tolerance_m: 10.0,
        }
    }
}

/// Spacing and retry settings for the per-connector request executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorPolicy {
    /// Minimum spacing between consecutive requests of one connector.
    pub min_interval: Duration,
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Backoff base; attempt `n` waits `base * 2^n` plus jitter.
    pub base_delay: Duration,
    /// Upper bound on the uniform jitter added to exponential backoff.
    pub max_jitter: Duration,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Persistence backend: "memory" or "firestore"
    pub store_backend: StoreBackend,
    /// GCP project ID (firestore backend only)
    pub gcp_project_id: String,

    /// Sources to register at startup
    pub enabled_sources: Vec<String>,
    /// Per-source connector settings, keyed by source name
    pub connectors: BTreeMap<String, ConnectorConfig>,

    pub dedup: DedupPolicy,
    pub executor: ExecutorPolicy,

    /// Upper bound on connectors syncing at the same time
    pub max_concurrent_syncs: usize,
    /// Window used when a sync request names no dates
    pub default_sync_days: u32,
    /// Run a background sync this often, if set
    pub sync_interval: Option<Duration>,
}

/// Where workouts, biometrics and bookkeeping are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Firestore,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "firestore" => Ok(StoreBackend::Firestore),
            _ => Err(ConfigError::Invalid("STORE_BACKEND", s.to_string())),
        }
    }
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            frontend_url: "http://localhost:5173".to_string(),
            store_backend: StoreBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            enabled_sources: Vec::new(),
            connectors: BTreeMap::new(),
            dedup: DedupPolicy::default(),
            executor: ExecutorPolicy {
                min_interval: Duration::ZERO,
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_jitter: Duration::from_millis(5),
            },
            max_concurrent_syncs: 4,
            default_sync_days: 30,
            sync_interval: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;

        let gcp_project_id = match store_backend {
            StoreBackend::Firestore => {
                env::var("GCP_PROJECT_ID").map_err(|_| ConfigError::Missing("GCP_PROJECT_ID"))?
            }
            StoreBackend::Memory => {
                env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string())
            }
        };

        let enabled_sources = env::var("ENABLED_SOURCES")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let precedence = env::var("SOURCE_PRECEDENCE")
            .map(|v| split_list(&v))
            .unwrap_or_else(|_| DEFAULT_PRECEDENCE.iter().map(|s| s.to_string()).collect());

        let dedup = DedupPolicy {
            precedence,
            temporal_window: Duration::from_secs(parse_var("DEDUP_TEMPORAL_MINUTES", 5u64)? * 60),
            duration_tolerance: parse_var("DEDUP_DURATION_PERCENT", 10.0f64)? / 100.0,
            gps_similarity_threshold: parse_var("DEDUP_GPS_SIMILARITY", 0.8f64)?,
            gps_point_tolerance_m: parse_var("DEDUP_GPS_POINT_METERS", 10.0f64)?,
        };

        let executor = ExecutorPolicy {
            min_interval: Duration::from_millis(parse_var("EXECUTOR_MIN_INTERVAL_MS", 100u64)?),
            max_attempts: parse_var("EXECUTOR_MAX_ATTEMPTS", 3u32)?.max(1),
            base_delay: Duration::from_millis(parse_var("EXECUTOR_BASE_DELAY_MS", 1000u64)?),
            max_jitter: Duration::from_secs(1),
        };

        let sync_interval = match env::var("SYNC_INTERVAL_HOURS") {
            Ok(v) => {
                let hours: u64 = v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("SYNC_INTERVAL_HOURS", v.clone()))?;
                (hours > 0).then(|| Duration::from_secs(hours * 3600))
            }
            Err(_) => None,
        };

        let connectors = enabled_sources
            .iter()
            .map(|source| (source.clone(), connector_config_from_env(source)))
            .collect();

        Ok(Self {
            port: parse_var("PORT", 8080u16)?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            store_backend,
            gcp_project_id,
            enabled_sources,
            connectors,
            dedup,
            executor,
            max_concurrent_syncs: parse_var("MAX_CONCURRENT_SYNCS", 8usize)?.max(1),
            default_sync_days: parse_var("DEFAULT_SYNC_DAYS", 30u32)?,
            sync_interval,
        })
    }
}

/// Collect every `<SOURCE>_<KEY>` variable into a connector config.
pub fn connector_config_from_env(source: &str) -> ConnectorConfig {
    connector_config_from_vars(source, env::vars())
}

fn connector_config_from_vars(
    source: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> ConnectorConfig {
    let prefix = format!("{}_", source.to_ascii_uppercase());
    let mut config = ConnectorConfig::default();
    for (key, value) in vars {
        if let Some(field) = key.strip_prefix(&prefix) {
            config.insert(field.to_ascii_lowercase(), value.trim().to_string());
        }
    }
    config
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(name, v)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
