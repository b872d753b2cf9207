use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    api::models::{
        audits::{AuditResponse, ListAuditsQuery},
        auth::CurrentUser,
    },
    db::{
        handlers::{Audits, Repository},
        models::audits::AuditFilter,
    },
    errors::{Error, Result},
};

/// The current user's audit trail, newest first.
///
/// Covers the full lifecycle: OTP issuance, logins, key management, and
/// gateway admission decisions made on this user's keys.
#[utoipa::path(
    get,
    path = "/api/audit",
    tag = "audits",
    params(ListAuditsQuery),
    responses(
        (status = 200, description = "Audit entries, newest first", body = [AuditResponse]),
        (status = 401, description = "Not authenticated"),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_audit_entries(
    State(state): State<AppState>,
    Query(query): Query<ListAuditsQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<AuditResponse>>> {
    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(50).min(500);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let entries = Audits::new(&mut conn)
        .list(&AuditFilter {
            user_id: Some(current_user.id),
            skip,
            limit,
        })
        .await?;

    Ok(Json(entries.into_iter().map(AuditResponse::from).collect()))
}
