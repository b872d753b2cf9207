use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    AppState,
    api::models::{
        api_keys::{ApiKeyCreate, ApiKeyInfoResponse, ApiKeyResponse},
        auth::CurrentUser,
    },
    auth::credentials,
    db::{
        handlers::{ApiKeys, Audits, Repository},
        models::{
            api_keys::{ApiKeyCreateDBRequest, ApiKeyFilter, RevokeOutcome},
            audits::{AuditCreateDBRequest, AuditEvent},
        },
    },
    errors::{Error, Result},
    types::ApiKeyId,
};

/// Bounded retries for the (user, prefix) uniqueness race.
const CREATE_ATTEMPTS: u32 = 3;

/// Create an API key for the current user.
/// This returns `ApiKeyResponse`, which contains the actual API key.
///
/// This should be the only time that the API key is returned in a response.
#[utoipa::path(
    post,
    path = "/api/keys",
    request_body = ApiKeyCreate,
    tag = "api_keys",
    responses(
        (status = 201, description = "API key created; the plaintext appears only here", body = ApiKeyResponse),
        (status = 400, description = "Invalid label"),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Generation kept colliding"),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_api_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<ApiKeyCreate>,
) -> Result<(StatusCode, Json<ApiKeyResponse>)> {
    let label = match data.label {
        Some(label) => {
            let label = label.trim().to_string();
            if label.is_empty() {
                return Err(Error::BadRequest {
                    message: "Label cannot be empty".to_string(),
                });
            }
            Some(label)
        }
        None => None,
    };

    let params = state.config.auth.argon2.params();

    for _ in 0..CREATE_ATTEMPTS {
        let generated = credentials::generate_api_key();
        let raw = generated.full();

        // Memory-hard hashing stays off the async executor
        let to_hash = raw.clone();
        let secret_hash = tokio::task::spawn_blocking(move || credentials::hash_secret_with_params(to_hash.as_bytes(), Some(params)))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn key hashing task: {e}"),
            })??;

        let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
        let created = ApiKeys::new(&mut tx)
            .create(&ApiKeyCreateDBRequest {
                user_id: current_user.id,
                prefix: generated.prefix.clone(),
                secret_hash,
                label: label.clone(),
            })
            .await;

        let key = match created {
            Ok(key) => key,
            // Prefix collision for this user: roll fresh material and retry
            Err(e) if e.is_unique_violation_on("api_keys_user_id_prefix_key") => continue,
            Err(e) => return Err(e.into()),
        };

        Audits::new(&mut tx)
            .create(&AuditCreateDBRequest {
                user_id: Some(current_user.id),
                event: AuditEvent::KeyCreated,
                detail: json!({ "key_id": key.id, "prefix": key.prefix, "label": key.label }),
            })
            .await?;
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        return Ok((
            StatusCode::CREATED,
            Json(ApiKeyResponse {
                id: key.id,
                prefix: key.prefix,
                key: raw,
                label: key.label,
                user_id: key.user_id,
                created_at: key.created_at,
            }),
        ));
    }

    Err(Error::FailedToCreate {
        resource: "API key".to_string(),
    })
}

/// List the current user's API keys, revoked ones included.
/// This should never contain the actual API key value.
#[utoipa::path(
    get,
    path = "/api/keys",
    tag = "api_keys",
    responses(
        (status = 200, description = "The caller's keys, metadata only", body = [ApiKeyInfoResponse]),
        (status = 401, description = "Not authenticated"),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_api_keys(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<ApiKeyInfoResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let keys = ApiKeys::new(&mut conn)
        .list(&ApiKeyFilter {
            user_id: Some(current_user.id),
            include_revoked: true,
        })
        .await?;

    Ok(Json(keys.into_iter().map(ApiKeyInfoResponse::from).collect()))
}

/// Revoke an API key. The key stops admitting immediately; the record stays
/// for audit and usage history.
#[utoipa::path(
    delete,
    path = "/api/keys/{id}",
    tag = "api_keys",
    params(
        ("id" = uuid::Uuid, Path, description = "API key ID to revoke"),
    ),
    responses(
        (status = 204, description = "API key revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such key for this user"),
        (status = 409, description = "Key already revoked"),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all, fields(key_id = %key_id))]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Path(key_id): Path<ApiKeyId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    match ApiKeys::new(&mut tx).revoke(current_user.id, key_id, Utc::now()).await? {
        RevokeOutcome::Revoked => {}
        RevokeOutcome::AlreadyRevoked => return Err(Error::AlreadyRevoked),
        RevokeOutcome::NotFound => {
            return Err(Error::NotFound {
                resource: "API key".to_string(),
                id: key_id.to_string(),
            });
        }
    }

    Audits::new(&mut tx)
        .create(&AuditCreateDBRequest {
            user_id: Some(current_user.id),
            event: AuditEvent::KeyRevoked,
            detail: json!({ "key_id": key_id }),
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::models::api_keys::{ApiKeyInfoResponse, ApiKeyResponse};
    use crate::db::handlers::{ApiKeys, Audits, Repository};
    use crate::db::models::audits::{AuditEvent, AuditFilter};
    use crate::test_utils::{create_test_app, create_test_user, session_cookie_for};
    use serde_json::json;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn recorded_events(pool: &PgPool) -> Vec<AuditEvent> {
        let mut conn = pool.acquire().await.unwrap();
        Audits::new(&mut conn)
            .list(&AuditFilter {
                user_id: None,
                skip: 0,
                limit: 50,
            })
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.event)
            .collect()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_api_key_returns_plaintext_once(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool).await;
        let cookie = session_cookie_for(&state.config, &user);

        let response = app
            .post("/api/keys")
            .add_header("cookie", cookie)
            .json(&json!({ "label": "CI pipeline" }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);

        let key: ApiKeyResponse = response.json();
        assert_eq!(key.label, Some("CI pipeline".to_string()));
        assert_eq!(key.user_id, user.id);

        let (prefix, secret) = key.key.split_once('.').unwrap();
        assert_eq!(prefix, key.prefix);
        assert!(secret.len() >= 16);

        // Only the hash is persisted
        let mut conn = pool.acquire().await.unwrap();
        let stored = ApiKeys::new(&mut conn).get_by_id(key.id).await.unwrap().unwrap();
        assert!(stored.secret_hash.starts_with("$argon2id$"));
        assert!(!stored.secret_hash.contains(secret));

        assert!(recorded_events(&pool).await.contains(&AuditEvent::KeyCreated));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_api_key_without_label(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool).await;
        let cookie = session_cookie_for(&state.config, &user);

        let response = app.post("/api/keys").add_header("cookie", cookie).json(&json!({})).await;
        response.assert_status(axum::http::StatusCode::CREATED);

        let key: ApiKeyResponse = response.json();
        assert_eq!(key.label, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_api_key_rejects_blank_label(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool).await;
        let cookie = session_cookie_for(&state.config, &user);

        let response = app
            .post("/api/keys")
            .add_header("cookie", cookie)
            .json(&json!({ "label": "   " }))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_api_key_requires_session(pool: PgPool) {
        let (app, _) = create_test_app(pool).await;

        let response = app.post("/api/keys").json(&json!({ "label": "nope" })).await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_api_keys_metadata_only(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool).await;
        let cookie = session_cookie_for(&state.config, &user);

        for label in ["first", "second"] {
            app.post("/api/keys")
                .add_header("cookie", cookie.clone())
                .json(&json!({ "label": label }))
                .await
                .assert_status(axum::http::StatusCode::CREATED);
        }

        let response = app.get("/api/keys").add_header("cookie", cookie).await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            // The plaintext field exists only on the creation response
            assert!(entry.get("key").is_none());
            assert!(entry.get("prefix").is_some());
            assert!(entry["revoked_at"].is_null());
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_api_keys_scoped_to_caller(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let alice = create_test_user(&pool).await;
        let bob = create_test_user(&pool).await;

        app.post("/api/keys")
            .add_header("cookie", session_cookie_for(&state.config, &alice))
            .json(&json!({ "label": "alice-key" }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);

        let response = app
            .get("/api/keys")
            .add_header("cookie", session_cookie_for(&state.config, &bob))
            .await;
        response.assert_status_ok();

        let keys: Vec<ApiKeyInfoResponse> = response.json();
        assert!(keys.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_revoke_api_key_then_conflict_on_repeat(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool).await;
        let cookie = session_cookie_for(&state.config, &user);

        let created: ApiKeyResponse = app
            .post("/api/keys")
            .add_header("cookie", cookie.clone())
            .json(&json!({}))
            .await
            .json();

        let response = app.delete(&format!("/api/keys/{}", created.id)).add_header("cookie", cookie.clone()).await;
        response.assert_status(axum::http::StatusCode::NO_CONTENT);

        let mut conn = pool.acquire().await.unwrap();
        let stored = ApiKeys::new(&mut conn).get_by_id(created.id).await.unwrap().unwrap();
        assert!(stored.revoked_at.is_some());
        drop(conn);

        assert!(recorded_events(&pool).await.contains(&AuditEvent::KeyRevoked));

        let again = app.delete(&format!("/api/keys/{}", created.id)).add_header("cookie", cookie).await;
        again.assert_status(axum::http::StatusCode::CONFLICT);
        let body: serde_json::Value = again.json();
        assert_eq!(body["error"], "not_revoked");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_revoke_other_users_key_is_not_found(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let alice = create_test_user(&pool).await;
        let bob = create_test_user(&pool).await;

        let created: ApiKeyResponse = app
            .post("/api/keys")
            .add_header("cookie", session_cookie_for(&state.config, &alice))
            .json(&json!({}))
            .await
            .json();

        let response = app
            .delete(&format!("/api/keys/{}", created.id))
            .add_header("cookie", session_cookie_for(&state.config, &bob))
            .await;
        response.assert_status(axum::http::StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_revoke_unknown_key_is_not_found(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool).await;

        let response = app
            .delete(&format!("/api/keys/{}", Uuid::new_v4()))
            .add_header("cookie", session_cookie_for(&state.config, &user))
            .await;
        response.assert_status(axum::http::StatusCode::NOT_FOUND);
    }
}
