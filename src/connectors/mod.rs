// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Vendor connectors.
//!
//! Each connector authenticates against one vendor, fetches workouts and
//! biometrics for a date range, and normalizes them into the canonical
//! models. All vendor calls go through a [`RateLimitedExecutor`].

pub mod executor;
pub mod oura;
pub mod strava;

pub use executor::{RateLimitInfo, RateLimitedExecutor};
pub use oura::OuraConnector;
pub use strava::StravaConnector;

use crate::config::ExecutorPolicy;
use crate::error::ConnectorError;
use crate::models::{AthleteProfile, BiometricReading, SyncResult, Workout};
use crate::services::calories::CalorieEngine;
use crate::time_utils::DateRange;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// String key/value settings for one connector (credentials, base URLs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectorConfig(BTreeMap<String, String>);

impl ConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Fail with the list of required keys that are missing or blank.
    pub fn require(&self, required: &[&str]) -> Result<(), ConnectorError> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::Configuration(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ConnectorConfig {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Shared services handed to a connector when it is built.
#[derive(Clone)]
pub struct ConnectorContext {
    /// Profile of the athlete whose data this connector syncs.
    pub profile: AthleteProfile,
    pub calories: Arc<CalorieEngine>,
    pub executor: ExecutorPolicy,
}

impl ConnectorContext {
    pub fn athlete_id(&self) -> &str {
        &self.profile.athlete_id
    }
}

/// Self-description of a connector's configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSchema {
    pub required: Vec<&'static str>,
    pub optional: Vec<&'static str>,
    pub description: &'static str,
}

/// Descriptor returned by the registry for discovery endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorInfo {
    pub name: String,
    pub config_schema: ConfigSchema,
    pub supported_metrics: Vec<&'static str>,
    pub supported_sports: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

/// Contract every vendor connector implements.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable source name ("strava", "oura", ...).
    fn source_name(&self) -> &str;

    fn description(&self) -> &'static str;

    fn required_config_fields(&self) -> &'static [&'static str];

    fn optional_config_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn supported_metrics(&self) -> &'static [&'static str];

    fn supported_sports(&self) -> &'static [&'static str];

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema {
            required: self.required_config_fields().to_vec(),
            optional: self.optional_config_fields().to_vec(),
            description: self.description(),
        }
    }

    /// Establish (or refresh) credentials. Idempotent.
    async fn authenticate(&self) -> Result<bool, ConnectorError>;

    fn is_authenticated(&self) -> bool;

    /// Last rate-limit headers the vendor sent, if any.
    fn rate_limit(&self) -> Option<RateLimitInfo> {
        None
    }

    async fn fetch_workouts(&self, range: &DateRange) -> Result<Vec<Workout>, ConnectorError>;

    async fn fetch_biometrics(
        &self,
        range: &DateRange,
    ) -> Result<Vec<BiometricReading>, ConnectorError>;

    /// Authenticate if needed, then fetch both record kinds.
    ///
    /// Never returns an error: failures are reported in the result.
    async fn sync(&self, range: &DateRange) -> SyncResult {
        let source = self.source_name().to_string();

        if !self.is_authenticated() {
            match self.authenticate().await {
                Ok(true) => {}
                Ok(false) => {
                    return SyncResult::failure(
                        &source,
                        format!("Failed to authenticate with {source}"),
                    )
                }
                Err(e) => return sync_failure(&source, "authenticate", e),
            }
        }

        let workouts = match self.fetch_workouts(range).await {
            Ok(w) => w,
            Err(e) => return sync_failure(&source, "fetch_workouts", e),
        };
        let biometrics = match self.fetch_biometrics(range).await {
            Ok(b) => b,
            Err(e) => return sync_failure(&source, "fetch_biometrics", e),
        };

        tracing::info!(
            source = %source,
            workouts = workouts.len(),
            biometrics = biometrics.len(),
            "Connector sync complete"
        );
        SyncResult::success(&source, workouts, biometrics)
    }

    /// Authenticate and probe a one-day fetch. Never errors.
    async fn test_connection(&self) -> bool {
        match self.authenticate().await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!(source = self.source_name(), error = %e, "Connection test failed");
                return false;
            }
        }
        let today = DateRange::last_days(1);
        match self.fetch_workouts(&today).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(source = self.source_name(), error = %e, "Connection test failed");
                false
            }
        }
    }

    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            name: self.source_name().to_string(),
            config_schema: self.config_schema(),
            supported_metrics: self.supported_metrics().to_vec(),
            supported_sports: self.supported_sports().to_vec(),
            rate_limit: self.rate_limit(),
        }
    }
}

fn sync_failure(source: &str, stage: &str, e: ConnectorError) -> SyncResult {
    tracing::warn!(source, stage, error_kind = e.kind(), error = %e, "Connector sync failed");
    SyncResult::failure(source, e.to_string())
}

/// Builds a connector from its config.
pub type ConnectorConstructor =
    fn(ConnectorConfig, ConnectorContext) -> Result<Arc<dyn Connector>, ConnectorError>;

/// Maps source names to connector constructors.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    constructors: HashMap<String, ConnectorConstructor>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in connector.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(strava::SOURCE, |config, ctx| {
            Ok(Arc::new(StravaConnector::new(config, ctx)?))
        });
        registry.register(oura::SOURCE, |config, ctx| {
            Ok(Arc::new(OuraConnector::new(config, ctx)?))
        });
        registry
    }

    pub fn register(&mut self, name: &str, constructor: ConnectorConstructor) {
        self.constructors
            .insert(name.to_ascii_lowercase(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    /// Instantiate a connector, validating its config.
    pub fn create(
        &self,
        name: &str,
        config: ConnectorConfig,
        ctx: ConnectorContext,
    ) -> Result<Arc<dyn Connector>, ConnectorError> {
        let constructor = self
            .constructors
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| ConnectorError::Configuration(format!("unknown connector: {name}")))?;
        constructor(config, ctx)
    }

    /// Registered source names, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ConnectorContext {
        ConnectorContext {
            profile: AthleteProfile::default_for("default"),
            calories: Arc::new(CalorieEngine::new()),
            executor: ExecutorPolicy::default(),
        }
    }

    #[test]
    fn test_require_lists_missing_and_blank() {
        let config = ConnectorConfig::from([("client_id", "1"), ("client_secret", "  ")]);
        let err = config
            .require(&["client_id", "client_secret", "refresh_token"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Connector configuration error: missing required fields: client_secret, refresh_token"
        );
        assert!(config.require(&["client_id"]).is_ok());
    }

    #[test]
    fn test_registry_rejects_unknown_and_invalid() {
        let registry = ConnectorRegistry::with_builtin();
        assert_eq!(registry.available(), vec!["oura", "strava"]);

        let err = registry
            .create("polar", ConnectorConfig::new(), context())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Configuration(_)));

        let err = registry
            .create("strava", ConnectorConfig::new(), context())
            .err()
            .unwrap();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_registry_builds_configured_connector() {
        let registry = ConnectorRegistry::with_builtin();
        let config = ConnectorConfig::from([("access_token", "tok")]);
        let connector = registry.create("OURA", config, context()).unwrap();
        assert_eq!(connector.source_name(), "oura");
        assert_eq!(connector.config_schema().required, vec!["access_token"]);
    }
}
