//! Database repository for daily usage counters.

use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{errors::Result, models::usage::UsageDayDBResponse},
    types::{UserId, abbrev_uuid},
};

/// Counter access for the (user, UTC day) usage table.
///
/// This repository is deliberately not a [`super::repository::Repository`]:
/// rows only ever come into existence through [`Usage::increment`], and the
/// counter is monotonically non-decreasing.
pub struct Usage<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Usage<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// The admitted-request count for (user, day); zero when no row exists.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), day = %day), err)]
    pub async fn count_for_day(&mut self, user_id: UserId, day: NaiveDate) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT request_count FROM usage_daily WHERE user_id = $1 AND day = $2")
            .bind(user_id)
            .bind(day)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(count.unwrap_or(0))
    }

    /// Add one admitted request to (user, day) and return the new count.
    ///
    /// Insert-or-increment is a single statement, so concurrent admissions
    /// can never lose an update.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), day = %day), err)]
    pub async fn increment(&mut self, user_id: UserId, day: NaiveDate) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_daily (user_id, day, request_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id, day)
            DO UPDATE SET request_count = usage_daily.request_count + 1, updated_at = NOW()
            RETURNING request_count
            "#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }

    /// The full counter row, if the user has any usage recorded for `day`.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), day = %day), err)]
    pub async fn get_day(&mut self, user_id: UserId, day: NaiveDate) -> Result<Option<UsageDayDBResponse>> {
        let row = sqlx::query_as::<_, UsageDayDBResponse>(
            "SELECT user_id, day, request_count, updated_at FROM usage_daily WHERE user_id = $1 AND day = $2",
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row)
    }
}
