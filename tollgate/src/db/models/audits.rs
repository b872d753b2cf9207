//! Database models for audit entries.

use crate::types::{AuditId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Audit event types, stored as VARCHAR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// A request hit the upstream-introspection block-list
    PathBlocked,
    /// A request was rejected before forwarding (credential or quota)
    AdmissionDenied,
    /// A request passed all checks and was released to the upstream
    RequestAdmitted,
    KeyCreated,
    KeyRevoked,
    OtpIssued,
    OtpRateLimited,
    LoginSucceeded,
    LoginFailed,
}

/// Database request for appending an audit entry
#[derive(Debug, Clone)]
pub struct AuditCreateDBRequest {
    pub user_id: Option<UserId>,
    pub event: AuditEvent,
    pub detail: serde_json::Value,
}

/// Database response for an audit entry
#[derive(Debug, Clone, FromRow)]
pub struct AuditDBResponse {
    pub id: AuditId,
    pub user_id: Option<UserId>,
    pub event: AuditEvent,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing audit entries, newest first
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}
