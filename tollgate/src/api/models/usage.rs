//! API response models for daily usage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The caller's standing against today's quota. Days are UTC calendar days.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageResponse {
    /// The UTC day this counter covers
    pub day: NaiveDate,
    /// Requests admitted so far today
    pub request_count: i64,
    /// The configured daily limit
    pub daily_limit: i64,
    /// Admissions left before the quota closes (never negative)
    pub remaining: i64,
    /// Seconds until the counter resets at UTC midnight
    pub reset_seconds: i64,
}
