//! API response models for the audit trail.

use crate::db::models::audits::{AuditDBResponse, AuditEvent};
use crate::types::{AuditId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// One audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AuditId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub event: AuditEvent,
    /// Event-specific context (path, reason, key prefix, counts)
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListAuditsQuery {
    // Number of items to skip
    #[param(default = 0, minimum = 0)]
    pub skip: Option<i64>,

    // Maximum number of items to return
    #[param(default = 50, minimum = 1, maximum = 500)]
    pub limit: Option<i64>,
}

impl From<AuditDBResponse> for AuditResponse {
    fn from(db: AuditDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            event: db.event,
            detail: db.detail,
            created_at: db.created_at,
        }
    }
}
