//! Database models for one-time passcodes.

use crate::auth::credentials::Argon2Params;
use crate::types::OtpId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for issuing a code. The raw code is hashed inside the
/// repository; only the PHC string is stored.
#[derive(Debug, Clone)]
pub struct OtpCreateDBRequest {
    pub email: String,
    pub raw_code: String,
    pub expires_at: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
    pub argon2_params: Argon2Params,
}

/// Database response for a one-time passcode
#[derive(Debug, Clone, FromRow)]
pub struct OtpDBResponse {
    pub id: OtpId,
    pub email: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing codes
#[derive(Debug, Clone)]
pub struct OtpFilter {
    pub email: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

/// Outcome of a verification attempt. The wire response collapses
/// `NoActiveCode` and `Mismatch` into one generic rejection; the audit entry
/// keeps them distinct.
#[derive(Debug, Clone)]
pub enum OtpVerifyOutcome {
    Matched(OtpDBResponse),
    NoActiveCode,
    Mismatch,
}
