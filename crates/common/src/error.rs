//! Error types for mediarepo.

use std::fmt;
use std::str::FromStr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Reason a URL was refused by the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    /// The URL could not be parsed or has no usable host.
    InvalidHost,
    /// DNS resolution returned nothing.
    HostNotFound,
    /// The resolved address falls in a denied range.
    HostBlacklisted,
}

impl fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidHost => "invalid host",
            Self::HostNotFound => "host not found",
            Self::HostBlacklisted => "host not allowed",
        };
        f.write_str(s)
    }
}

/// Application error type.
///
/// `Clone` so a single outcome can be delivered to every caller waiting on a
/// coalesced computation.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// The caller is authenticated but lacks the required tier.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Source bytes could not be decoded as an image.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Access denied: {0}")]
    AccessPolicy(AccessDenial),

    // === Server Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A remote server answered badly or not at all.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::AccessPolicy(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) | Self::Validation(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,

            // 5xx Server Errors
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::AccessPolicy(AccessDenial::InvalidHost) => "INVALID_HOST",
            Self::AccessPolicy(AccessDenial::HostNotFound) => "HOST_NOT_FOUND",
            Self::AccessPolicy(AccessDenial::HostBlacklisted) => "HOST_BLACKLISTED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "UNKNOWN",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// The persisted classification for this error, if it is one that may be
    /// replayed from a cached record.
    ///
    /// Infrastructure failures (storage, database, config) and caller
    /// mistakes return `None` and are never written to a cache.
    #[must_use]
    pub const fn cache_code(&self) -> Option<ErrorCode> {
        match self {
            Self::AccessPolicy(AccessDenial::InvalidHost) => Some(ErrorCode::InvalidHost),
            Self::AccessPolicy(AccessDenial::HostNotFound) => Some(ErrorCode::HostNotFound),
            Self::AccessPolicy(AccessDenial::HostBlacklisted) => Some(ErrorCode::HostBlacklisted),
            Self::NotFound(_) => Some(ErrorCode::NotFound),
            Self::Upstream(_) => Some(ErrorCode::Upstream),
            Self::Internal(_) => Some(ErrorCode::Unknown),
            Self::Unauthorized
            | Self::Forbidden(_)
            | Self::BadRequest(_)
            | Self::Validation(_)
            | Self::Decode(_)
            | Self::Storage(_)
            | Self::Database(_)
            | Self::Config(_) => None,
        }
    }
}

/// Closed set of error classifications stored alongside cached results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidHost,
    HostNotFound,
    HostBlacklisted,
    NotFound,
    Upstream,
    Unknown,
}

impl ErrorCode {
    /// Stable textual tag used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidHost => "invalid_host",
            Self::HostNotFound => "host_not_found",
            Self::HostBlacklisted => "host_blacklisted",
            Self::NotFound => "not_found",
            Self::Upstream => "upstream",
            Self::Unknown => "unknown",
        }
    }

    /// Rebuild the structured error this tag was recorded from.
    #[must_use]
    pub fn into_error(self) -> AppError {
        match self {
            Self::InvalidHost => AppError::AccessPolicy(AccessDenial::InvalidHost),
            Self::HostNotFound => AppError::AccessPolicy(AccessDenial::HostNotFound),
            Self::HostBlacklisted => AppError::AccessPolicy(AccessDenial::HostBlacklisted),
            Self::NotFound => AppError::NotFound("no preview available".to_string()),
            Self::Upstream => AppError::Upstream("remote server failed".to_string()),
            Self::Unknown => AppError::Internal("unknown error".to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_host" => Ok(Self::InvalidHost),
            "host_not_found" => Ok(Self::HostNotFound),
            "host_blacklisted" => Ok(Self::HostBlacklisted),
            "not_found" => Ok(Self::NotFound),
            "upstream" => Ok(Self::Upstream),
            "unknown" => Ok(Self::Unknown),
            other => Err(AppError::Internal(format!("unrecognised error code: {other}"))),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trips_through_text() {
        for code in [
            ErrorCode::InvalidHost,
            ErrorCode::HostNotFound,
            ErrorCode::HostBlacklisted,
            ErrorCode::NotFound,
            ErrorCode::Upstream,
            ErrorCode::Unknown,
        ] {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        assert!("teapot".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_replayed_error_keeps_classification() {
        let original = AppError::AccessPolicy(AccessDenial::HostBlacklisted);
        let code = original.cache_code().unwrap();
        let replayed = code.into_error();
        assert_eq!(replayed.cache_code(), Some(ErrorCode::HostBlacklisted));
        assert_eq!(replayed.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_infrastructure_errors_are_not_cacheable() {
        assert!(AppError::Storage("disk".into()).cache_code().is_none());
        assert!(AppError::Database("down".into()).cache_code().is_none());
        assert!(AppError::Validation("bad".into()).cache_code().is_none());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Decode("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Upstream("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert!(AppError::Storage("x".into()).is_server_error());
        assert!(!AppError::Forbidden("x".into()).is_server_error());
    }
}
