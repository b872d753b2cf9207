use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

/// Crate-wide error type.
///
/// Every rejection that reaches the wire carries a stable machine-readable
/// `error` code alongside the human message, so callers can branch without
/// parsing prose. Variants that admission or the login flow map directly to
/// wire codes are modeled explicitly; everything else funnels through the
/// generic variants at the bottom.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// No credential header on a gateway request
    #[error("Missing API key")]
    MissingKey,

    /// Credential present but rejected. Deliberately generic: format,
    /// unknown-prefix, and mismatch rejections all surface as this, and the
    /// precise reason lives only in the audit entry.
    #[error("Invalid API key")]
    InvalidKey,

    /// Login code rejected. Wrong-code and no-active-code both map here so
    /// the response does not reveal account state.
    #[error("Invalid or expired code")]
    InvalidCode,

    /// Session authentication required but not provided or not valid
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Gateway request for a path on the block-list. Indistinguishable from
    /// an unknown route on the wire so credentials cannot probe for it.
    #[error("Not found")]
    PathBlocked,

    /// OTP resend attempted while the per-email cooldown is active
    #[error("Code already sent recently")]
    OtpCooldown { retry_after_seconds: i64 },

    /// OTP issuance attempted past the rolling-hour cap
    #[error("Too many codes requested")]
    OtpHourlyCap { retry_after_seconds: i64 },

    /// Daily admission quota exhausted
    #[error("Daily request quota exceeded")]
    QuotaExceeded { count: i64, limit: i64, reset_seconds: i64 },

    /// Revocation attempted on an already-revoked key
    #[error("API key is already revoked")]
    AlreadyRevoked,

    /// Resource creation kept failing after bounded retries
    #[error("Failed to create {resource}")]
    FailedToCreate { resource: String },

    /// Upstream unreachable, timed out, or otherwise failed at transport
    /// level. Opaque on the wire: no upstream internals leak.
    #[error("Upstream request failed")]
    Upstream,

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::MissingKey | Error::InvalidKey | Error::InvalidCode | Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::NotFound { .. } | Error::PathBlocked => StatusCode::NOT_FOUND,
            Error::OtpCooldown { .. } | Error::OtpHourlyCap { .. } | Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::AlreadyRevoked => StatusCode::CONFLICT,
            Error::FailedToCreate { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upstream => StatusCode::BAD_GATEWAY,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable machine-readable code placed in the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::BadRequest { .. } => "bad_request",
            Error::MissingKey => "missing_key",
            Error::InvalidKey => "invalid_key",
            Error::InvalidCode => "invalid_code",
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::NotFound { .. } | Error::PathBlocked => "not_found",
            Error::OtpCooldown { .. } => "rate_minute",
            Error::OtpHourlyCap { .. } => "rate_hour",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::AlreadyRevoked => "not_revoked",
            Error::FailedToCreate { .. } => "failed_to_create",
            Error::Upstream => "upstream_error",
            Error::Internal { .. } => "internal_error",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "not_found",
                DbError::UniqueViolation { .. } => "conflict",
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "bad_request",
                DbError::Other(_) => "internal_error",
            },
            Error::Other(_) => "internal_error",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::MissingKey => "Missing API key".to_string(),
            Error::InvalidKey => "Invalid API key".to_string(),
            Error::InvalidCode => "Invalid or expired code".to_string(),
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::PathBlocked => "Not found".to_string(),
            Error::OtpCooldown { retry_after_seconds } => {
                format!("A code was sent recently; retry in {retry_after_seconds} seconds")
            }
            Error::OtpHourlyCap { retry_after_seconds } => {
                format!("Too many codes requested; retry in {retry_after_seconds} seconds")
            }
            Error::QuotaExceeded { limit, .. } => format!("Daily request quota of {limit} exceeded"),
            Error::AlreadyRevoked => "API key is already revoked".to_string(),
            Error::FailedToCreate { resource } => format!("Failed to create {resource}"),
            Error::Upstream => "Upstream request failed".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) | Error::FailedToCreate { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upstream => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Database(_) | Error::AlreadyRevoked => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::MissingKey | Error::InvalidKey | Error::InvalidCode | Error::Unauthenticated { .. } => {
                tracing::info!("Authentication error: {}", self);
            }
            Error::OtpCooldown { .. } | Error::OtpHourlyCap { .. } | Error::QuotaExceeded { .. } => {
                tracing::info!("Rate limit hit: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::PathBlocked => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        // Every error body carries the stable code; rate-limit variants add
        // their bookkeeping fields so callers can back off precisely.
        let body = match &self {
            Error::QuotaExceeded {
                count,
                limit,
                reset_seconds,
            } => json!({
                "error": self.error_code(),
                "message": self.user_message(),
                "count": count,
                "limit": limit,
                "reset_seconds": reset_seconds,
            }),
            Error::OtpCooldown { retry_after_seconds } | Error::OtpHourlyCap { retry_after_seconds } => json!({
                "error": self.error_code(),
                "message": self.user_message(),
                "retry_after_seconds": retry_after_seconds,
            }),
            _ => json!({
                "error": self.error_code(),
                "message": self.user_message(),
            }),
        };

        (status, axum::response::Json(body)).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
