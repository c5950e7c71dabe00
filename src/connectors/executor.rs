// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-connector request executor: spacing, rate-limit waits and
//! exponential backoff.
//!
//! - consecutive requests are at least `min_interval` apart
//! - a rate-limit error waits the vendor's retry-after plus 10-30% jitter
//! - other transient errors back off `base * 2^n` plus up to `max_jitter`
//! - authentication and malformed-request errors fail immediately

use crate::config::ExecutorPolicy;
use crate::error::ConnectorError;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Retry-after used when a 429 carries no usable header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Last rate-limit headers seen from a vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateLimitInfo {
    pub remaining: Option<u64>,
    /// Vendor reset value as sent (epoch seconds or seconds-until-reset).
    pub reset: Option<u64>,
    pub retry_after_secs: Option<u64>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    /// Parse `Retry-After`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`,
    /// or Strava's `X-RateLimit-Limit`/`X-RateLimit-Usage` window pairs.
    ///
    /// Returns `None` when none of them is present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Self::from_headers_at(headers, Utc::now())
    }

    pub fn from_headers_at(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Self> {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        let mut info = Self {
            remaining: number("x-ratelimit-remaining"),
            reset: number("x-ratelimit-reset"),
            retry_after_secs: number("retry-after"),
            observed_at: Some(now),
        };

        if let Some(windows) = usage_windows(headers) {
            let tightest = windows
                .iter()
                .map(|(used, limit)| limit.saturating_sub(*used))
                .min();
            info.remaining = info.remaining.or(tightest);
            // Wait until the last exhausted window rolls over.
            let exhausted = windows
                .iter()
                .enumerate()
                .filter(|(_, (used, limit))| used >= limit)
                .map(|(window, _)| window_reset(window, now))
                .max();
            let next_reset = exhausted.unwrap_or_else(|| window_reset(0, now));
            info.reset = info.reset.or(Some(next_reset.timestamp().max(0) as u64));
            if let Some(at) = exhausted {
                let wait = (at - now).num_seconds().max(1) as u64;
                info.retry_after_secs = info.retry_after_secs.or(Some(wait));
            }
        }

        (info.remaining.is_some() || info.reset.is_some() || info.retry_after_secs.is_some())
            .then_some(info)
    }

    /// How long the vendor asked us to wait.
    pub fn retry_after(&self) -> Duration {
        self.retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER)
    }
}

/// `(used, limit)` per window from comma-separated usage/limit headers.
/// The first window is 15 minutes long, later ones a UTC day.
fn usage_windows(headers: &HeaderMap) -> Option<Vec<(u64, u64)>> {
    let list = |name: &str| -> Option<Vec<u64>> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .map(|v| v.trim().parse::<u64>().ok())
            .collect()
    };
    let limits = list("x-ratelimit-limit")?;
    let usage = list("x-ratelimit-usage")?;
    (!limits.is_empty() && limits.len() == usage.len())
        .then(|| usage.into_iter().zip(limits).collect())
}

/// When usage window `window` next resets: the next quarter hour for the
/// first window, the next UTC midnight otherwise.
fn window_reset(window: usize, now: DateTime<Utc>) -> DateTime<Utc> {
    let period: i64 = if window == 0 { 15 * 60 } else { 24 * 60 * 60 };
    let next = (now.timestamp().div_euclid(period) + 1) * period;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}

pub struct RateLimitedExecutor {
    source: String,
    policy: ExecutorPolicy,
    last_request: Mutex<Option<Instant>>,
    rate_limit: StdMutex<Option<RateLimitInfo>>,
}

impl RateLimitedExecutor {
    pub fn new(source: &str, policy: ExecutorPolicy) -> Self {
        Self {
            source: source.to_string(),
            policy,
            last_request: Mutex::new(None),
            rate_limit: StdMutex::new(None),
        }
    }

    pub fn policy(&self) -> &ExecutorPolicy {
        &self.policy
    }

    /// Remember rate-limit headers from a response.
    pub fn observe_headers(&self, headers: &HeaderMap) {
        if let Some(info) = RateLimitInfo::from_headers(headers) {
            if let Ok(mut slot) = self.rate_limit.lock() {
                *slot = Some(info);
            }
        }
    }

    pub fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.rate_limit.lock().ok().and_then(|slot| slot.clone())
    }

    /// Pass a successful response through, or map its status to an error.
    ///
    /// Rate-limit headers are recorded either way.
    pub async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ConnectorError> {
        self.observe_headers(response.headers());
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = RateLimitInfo::from_headers(response.headers())
            .map(|info| info.retry_after())
            .unwrap_or(DEFAULT_RETRY_AFTER);
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            tracing::warn!(source = %self.source, "Rate limit hit (429)");
        }
        Err(error_for_status(status.as_u16(), body, retry_after))
    }

    /// Check the response and parse its JSON body.
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ConnectorError> {
        self.check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ConnectorError::Decode(e.to_string()))
    }

    /// Run `op` with spacing and retries.
    ///
    /// `op` is called once per attempt and must build a fresh request each
    /// time.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ConnectorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.wait_for_slot().await;

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::debug!(source = %self.source, operation, error = %err, "Non-retryable failure");
                return Err(err);
            }

            attempt += 1;
            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    source = %self.source,
                    operation,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(exhausted(err, attempt));
            }

            let delay = self.retry_delay(&err, attempt - 1);
            tracing::warn!(
                source = %self.source,
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before retry number `retry` (0-based).
    fn retry_delay(&self, err: &ConnectorError, retry: u32) -> Duration {
        let mut rng = rand::rng();
        match err {
            ConnectorError::RateLimited { retry_after, .. } => {
                let jitter: f64 = rng.random_range(0.1..=0.3);
                *retry_after + retry_after.mul_f64(jitter)
            }
            _ => {
                let backoff = self
                    .policy
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(retry));
                let jitter = self.policy.max_jitter.mul_f64(rng.random_range(0.0..=1.0));
                backoff + jitter
            }
        }
    }

    /// Block until `min_interval` has passed since the previous request.
    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.policy.min_interval {
                tokio::time::sleep(self.policy.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Classify a non-success HTTP status.
pub fn error_for_status(status: u16, body: String, retry_after: Duration) -> ConnectorError {
    match status {
        429 => ConnectorError::RateLimited {
            message: body,
            retry_after,
        },
        401 | 403 => ConnectorError::Authentication(format!("HTTP {status}: {body}")),
        400 | 404 | 422 => ConnectorError::InvalidRequest(format!("HTTP {status}: {body}")),
        _ => ConnectorError::Api {
            status: Some(status),
            message: body,
        },
    }
}

fn exhausted(err: ConnectorError, attempts: u32) -> ConnectorError {
    match err {
        ConnectorError::Api { status, message } => ConnectorError::Api {
            status,
            message: format!("Request failed after {attempts} attempts: {message}"),
        },
        other => other,
    }
}
