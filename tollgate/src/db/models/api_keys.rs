//! Database models for API keys.

use crate::types::{ApiKeyId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new API key. `secret_hash` is the Argon2id
/// PHC string of the full `prefix.secret` key; the plaintext never reaches
/// this layer.
#[derive(Debug, Clone)]
pub struct ApiKeyCreateDBRequest {
    pub user_id: UserId,
    pub prefix: String,
    pub secret_hash: String,
    pub label: Option<String>,
}

/// Database response for an API key
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyDBResponse {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub prefix: String,
    pub secret_hash: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyDBResponse {
    /// A key is active iff it has not been revoked.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Filter for listing keys
#[derive(Debug, Clone)]
pub struct ApiKeyFilter {
    pub user_id: Option<UserId>,
    pub include_revoked: bool,
}

/// Outcome of a revocation attempt. `AlreadyRevoked` is reported separately
/// from `NotFound` so the API can answer 409 vs 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
    NotFound,
}
