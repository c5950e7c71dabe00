// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Two layers: [`ConnectorError`] is what vendor connectors and the
//! rate-limited executor deal in, [`AppError`] is what persistence and
//! HTTP handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

/// Errors raised by a connector while talking to its vendor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    /// Credentials were rejected or could not be refreshed. Never retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The vendor asked us to slow down.
    #[error("Rate limit exceeded: {message} (retry after {}s)", .retry_after.as_secs())]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    /// Transient request failure (network error, timeout, 5xx).
    #[error("API error{}: {message}", status_suffix(.status))]
    Api {
        status: Option<u16>,
        message: String,
    },

    /// The vendor rejected the request as malformed. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connector configuration or contract violation.
    #[error("Connector configuration error: {0}")]
    Configuration(String),

    /// The vendor response could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl ConnectorError {
    /// Build a transient API error without an HTTP status.
    pub fn api(message: impl Into<String>) -> Self {
        ConnectorError::Api {
            status: None,
            message: message.into(),
        }
    }

    /// Whether the executor may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::RateLimited { .. } | ConnectorError::Api { .. }
        )
    }

    /// Short machine-readable kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::Authentication(_) => "authentication",
            ConnectorError::RateLimited { .. } => "rate_limited",
            ConnectorError::Api { .. } => "api",
            ConnectorError::InvalidRequest(_) => "invalid_request",
            ConnectorError::Configuration(_) => "configuration",
            ConnectorError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ConnectorError::Decode(e.to_string());
        }
        ConnectorError::Api {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Connector(err) => (
                StatusCode::BAD_GATEWAY,
                "connector_error",
                Some(err.to_string()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let rate = ConnectorError::RateLimited {
            message: "slow down".into(),
            retry_after: Duration::from_secs(30),
        };
        assert!(rate.is_retryable());
        assert!(ConnectorError::api("timeout").is_retryable());

        assert!(!ConnectorError::Authentication("bad token".into()).is_retryable());
        assert!(!ConnectorError::InvalidRequest("bad date".into()).is_retryable());
        assert!(!ConnectorError::Configuration("missing".into()).is_retryable());
        assert!(!ConnectorError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ConnectorError::api("reset").kind(), "api");
        assert_eq!(
            ConnectorError::Authentication("revoked".into()).kind(),
            "authentication"
        );
        let rate = ConnectorError::RateLimited {
            message: String::new(),
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(rate.kind(), "rate_limited");
    }

    #[test]
    fn test_api_error_display_includes_status() {
        let err = ConnectorError::Api {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "API error (HTTP 503): unavailable");
        assert_eq!(ConnectorError::api("reset").to_string(), "API error: reset");
    }

    #[test]
    fn test_connector_error_maps_to_bad_gateway() {
        let response =
            AppError::from(ConnectorError::Authentication("nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = AppError::BadRequest("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
