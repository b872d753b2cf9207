//! API request/response models for API keys.

use crate::db::models::api_keys::ApiKeyDBResponse;
use crate::types::{ApiKeyId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// API Key request models.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyCreate {
    /// Optional human-readable label ("CI pipeline", "laptop")
    pub label: Option<String>,
}

/// Response for a freshly created key. `key` holds the full plaintext
/// `prefix.secret` and is returned exactly once; only its hash is stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiKeyId,
    pub prefix: String,
    pub key: String,
    pub label: Option<String>,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Metadata-only view of a key, for listing. Never carries secret material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyInfoResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiKeyId,
    pub prefix: String,
    pub label: Option<String>,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyDBResponse> for ApiKeyInfoResponse {
    fn from(db: ApiKeyDBResponse) -> Self {
        Self {
            id: db.id,
            prefix: db.prefix,
            label: db.label,
            user_id: db.user_id,
            created_at: db.created_at,
            revoked_at: db.revoked_at,
            last_used_at: db.last_used_at,
        }
    }
}
