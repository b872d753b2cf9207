//! Database models for daily usage counters.

use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// Database response for one (user, day) counter row
#[derive(Debug, Clone, FromRow)]
pub struct UsageDayDBResponse {
    pub user_id: UserId,
    pub day: NaiveDate,
    pub request_count: i64,
    pub updated_at: DateTime<Utc>,
}
