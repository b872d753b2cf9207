use axum::{Json, extract::State};
use chrono::Utc;

use crate::{
    AppState,
    api::models::{auth::CurrentUser, usage::UsageResponse},
    auth::admission,
    db::handlers::Usage,
    errors::{Error, Result},
};

/// The current user's standing against today's quota.
///
/// Counts reset at UTC midnight regardless of the caller's timezone.
#[utoipa::path(
    get,
    path = "/api/usage",
    tag = "usage",
    responses(
        (status = 200, description = "Today's usage for the current user", body = UsageResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_usage(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UsageResponse>> {
    let now = Utc::now();
    let day = now.date_naive();

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let request_count = Usage::new(&mut conn).count_for_day(current_user.id, day).await?;

    let daily_limit = state.config.quota.daily_limit;
    Ok(Json(UsageResponse {
        day,
        request_count,
        daily_limit,
        remaining: (daily_limit - request_count).max(0),
        reset_seconds: admission::seconds_until_utc_midnight(now),
    }))
}
