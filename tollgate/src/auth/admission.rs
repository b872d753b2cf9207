//! The admission pipeline in front of every forwarded request.
//!
//! Stages run in a fixed order, each short-circuiting with its own outcome:
//! path block, credential presence, credential validity, quota, side effects,
//! forward. Side effects (usage increment, last-used touch, audit entry) land
//! before the upstream call so an admitted request is counted even when the
//! upstream subsequently fails. Every terminal outcome writes exactly one
//! audit entry.

use axum::{
    extract::{ConnectInfo, Request, State},
    response::Response,
};
use chrono::{DateTime, Days, NaiveTime, Utc};
use serde_json::json;
use sqlx::{Connection, PgConnection};
use std::net::SocketAddr;
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::auth::credentials;
use crate::db::errors::DbError;
use crate::db::handlers::{ApiKeys, Audits, Repository, Usage};
use crate::db::models::audits::{AuditCreateDBRequest, AuditEvent};
use crate::errors::{Error, Result};
use crate::proxy::{self, API_KEY_HEADER};
use crate::types::{ApiKeyId, UserId};

/// A credential that passed stage 3.
#[derive(Debug, Clone)]
struct ValidatedKey {
    user_id: UserId,
    key_id: ApiKeyId,
    prefix: String,
}

/// Why stage 3 turned a request away. The caller only ever sees the generic
/// invalid-key response; the precise reason goes into the audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyDenial {
    Format,
    NotFound,
    Mismatch,
}

impl KeyDenial {
    fn as_str(self) -> &'static str {
        match self {
            KeyDenial::Format => "format",
            KeyDenial::NotFound => "not_found",
            KeyDenial::Mismatch => "mismatch",
        }
    }
}

/// Gateway entry point. Every request that does not match a control-plane
/// route lands here, runs the pipeline, and is relayed on success.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn handle_gateway(State(state): State<AppState>, request: Request) -> Result<Response> {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    // 1. Path block: refused before any credential work, so even a valid key
    //    cannot probe upstream introspection endpoints.
    if state.config.upstream.blocked_paths.iter().any(|p| p == &path) {
        record_denied(&state, None, AuditEvent::PathBlocked, json!({ "path": path })).await;
        return Err(Error::PathBlocked);
    }

    // 2. Credential presence.
    let Some(raw_key) = request.headers().get(API_KEY_HEADER) else {
        record_denied(
            &state,
            None,
            AuditEvent::AdmissionDenied,
            json!({ "path": path, "reason": "missing_key" }),
        )
        .await;
        return Err(Error::MissingKey);
    };
    let Ok(raw_key) = raw_key.to_str() else {
        record_denied(
            &state,
            None,
            AuditEvent::AdmissionDenied,
            json!({ "path": path, "reason": "format" }),
        )
        .await;
        return Err(Error::InvalidKey);
    };
    let raw_key = raw_key.to_string();

    // 3. Credential validity.
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let key = match validate_key(&mut conn, &raw_key).await? {
        Ok(key) => key,
        Err(denial) => {
            drop(conn);
            record_denied(
                &state,
                None,
                AuditEvent::AdmissionDenied,
                json!({ "path": path, "reason": denial.as_str() }),
            )
            .await;
            return Err(Error::InvalidKey);
        }
    };

    // 4. Quota. Check-then-increment is a soft limit: two requests racing the
    //    last slot may both pass, which is accepted for a daily allowance.
    let now = Utc::now();
    let today = now.date_naive();
    let limit = state.config.quota.daily_limit;
    let count = Usage::new(&mut conn).count_for_day(key.user_id, today).await?;
    if count >= limit {
        drop(conn);
        let reset_seconds = seconds_until_utc_midnight(now);
        record_denied(
            &state,
            Some(key.user_id),
            AuditEvent::AdmissionDenied,
            json!({ "path": path, "reason": "quota_exceeded", "count": count, "limit": limit }),
        )
        .await;
        return Err(Error::QuotaExceeded {
            count,
            limit,
            reset_seconds,
        });
    }

    // 5. Side effects precede the forward, so the request is counted and
    //    audited even if the upstream call fails afterwards. Increment and
    //    audit commit together; an admission that cannot be audited fails.
    let mut tx = conn.begin().await.map_err(DbError::from)?;
    let new_count = Usage::new(&mut tx).increment(key.user_id, today).await?;
    Audits::new(&mut tx)
        .create(&AuditCreateDBRequest {
            user_id: Some(key.user_id),
            event: AuditEvent::RequestAdmitted,
            detail: json!({ "path": path, "method": method, "key_prefix": key.prefix, "count": new_count }),
        })
        .await?;
    tx.commit().await.map_err(DbError::from)?;

    // Last-used is best effort; a failure must not cost an admitted request.
    if let Err(e) = ApiKeys::new(&mut conn).touch_last_used(key.key_id, now).await {
        warn!(key_id = %key.key_id, error = %e, "failed to update key last-used timestamp");
    }

    // Return the connection to the pool before the (possibly slow) relay.
    drop(conn);

    info!(user_id = %key.user_id, key_prefix = %key.prefix, "request admitted");

    // 6. Forward.
    proxy::forward(&state.http, &state.config.upstream, key.user_id, client_addr, request).await
}

/// Resolve a raw `prefix.secret` credential to its owner.
///
/// Malformed input is rejected before any lookup. All active keys sharing the
/// prefix are candidates; the stored hash decides which (if any) matches.
/// Revoked keys never reach the candidate set, so they are indistinguishable
/// from unknown ones.
async fn validate_key(db: &mut PgConnection, raw_key: &str) -> Result<std::result::Result<ValidatedKey, KeyDenial>> {
    let Some((prefix, _)) = credentials::parse_full_key(raw_key) else {
        return Ok(Err(KeyDenial::Format));
    };

    let candidates = ApiKeys::new(db).find_active_by_prefix(prefix).await?;
    if candidates.is_empty() {
        return Ok(Err(KeyDenial::NotFound));
    }

    // Memory-hard verification is deliberately slow; keep it off the async
    // executor so concurrent requests are not starved.
    let raw_key = raw_key.to_string();
    let matched = tokio::task::spawn_blocking(move || {
        for key in candidates {
            match credentials::verify_secret(raw_key.as_bytes(), &key.secret_hash) {
                Ok(true) => return Some(key),
                Ok(false) => {}
                Err(e) => {
                    warn!(key_id = %key.id, error = %e, "stored key hash did not parse; skipping candidate");
                }
            }
        }
        None
    })
    .await
    .map_err(|e| Error::Internal {
        operation: format!("join key verification task: {e}"),
    })?;

    Ok(match matched {
        Some(key) => Ok(ValidatedKey {
            user_id: key.user_id,
            key_id: key.id,
            prefix: key.prefix,
        }),
        None => Err(KeyDenial::Mismatch),
    })
}

/// Append a denial audit entry. Best effort: a failed write is logged and the
/// denial response still goes out.
async fn record_denied(state: &AppState, user_id: Option<UserId>, event: AuditEvent, detail: serde_json::Value) {
    let result: crate::db::errors::Result<()> = async {
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        Audits::new(&mut conn)
            .create(&AuditCreateDBRequest { user_id, event, detail })
            .await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(error = %e, "failed to record denial audit entry");
    }
}

/// Seconds remaining until the next UTC midnight, when a fresh daily counter
/// partition begins.
pub fn seconds_until_utc_midnight(now: DateTime<Utc>) -> i64 {
    let next_midnight = (now.date_naive() + Days::new(1)).and_time(NaiveTime::MIN).and_utc();
    (next_midnight - now).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppState;
    use crate::auth::credentials::Argon2Params;
    use crate::db::handlers::{Repository, Users};
    use crate::db::models::api_keys::ApiKeyCreateDBRequest;
    use crate::db::models::audits::AuditFilter;
    use crate::db::models::users::UserCreateDBRequest;
    use crate::test_utils::create_test_config;
    use axum::body::Body;
    use sqlx::PgPool;

    fn test_state(pool: PgPool) -> AppState {
        let config = create_test_config();
        let http = proxy::build_http_client(&config.upstream).unwrap();
        AppState::builder().db(pool).config(config).http(http).build()
    }

    fn gateway_request(path: &str, key: Option<&str>) -> Request {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn weak_params() -> Argon2Params {
        Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    async fn make_user(pool: &PgPool, email: &str) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .create(&UserCreateDBRequest { email: email.to_string() })
            .await
            .unwrap()
            .id
    }

    /// Insert a key the way the create endpoint would, but with cheap hashing
    /// parameters. Returns (key id, raw full key).
    async fn make_key(pool: &PgPool, user_id: UserId) -> (ApiKeyId, String) {
        let generated = credentials::generate_api_key();
        let raw = generated.full();
        let secret_hash = credentials::hash_secret_with_params(raw.as_bytes(), Some(weak_params())).unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let key = ApiKeys::new(&mut conn)
            .create(&ApiKeyCreateDBRequest {
                user_id,
                prefix: generated.prefix.clone(),
                secret_hash,
                label: None,
            })
            .await
            .unwrap();

        (key.id, raw)
    }

    async fn audit_events(pool: &PgPool) -> Vec<AuditEvent> {
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

    async fn denial_reasons(pool: &PgPool) -> Vec<String> {
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
            .filter(|a| a.event == AuditEvent::AdmissionDenied)
            .filter_map(|a| a.detail.get("reason").and_then(|r| r.as_str()).map(str::to_string))
            .collect()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_blocked_path_refused_even_with_valid_key(pool: PgPool) {
        let user_id = make_user(&pool, "block@example.com").await;
        let (_, raw) = make_key(&pool, user_id).await;
        let state = test_state(pool.clone());

        let result = handle_gateway(State(state), gateway_request("/docs", Some(&raw))).await;
        assert!(matches!(result, Err(Error::PathBlocked)));

        assert!(audit_events(&pool).await.contains(&AuditEvent::PathBlocked));

        // Never counted against quota
        let mut conn = pool.acquire().await.unwrap();
        let count = Usage::new(&mut conn)
            .count_for_day(user_id, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_key_rejected(pool: PgPool) {
        let state = test_state(pool.clone());

        let result = handle_gateway(State(state), gateway_request("/v1/widgets", None)).await;
        assert!(matches!(result, Err(Error::MissingKey)));

        assert_eq!(denial_reasons(&pool).await, vec!["missing_key"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_malformed_key_rejected_before_lookup(pool: PgPool) {
        let state = test_state(pool.clone());

        let result = handle_gateway(State(state), gateway_request("/v1/widgets", Some("no-dot-in-here"))).await;
        assert!(matches!(result, Err(Error::InvalidKey)));

        assert_eq!(denial_reasons(&pool).await, vec!["format"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_prefix_rejected(pool: PgPool) {
        let state = test_state(pool.clone());

        let result = handle_gateway(
            State(state),
            gateway_request("/v1/widgets", Some("unknown1.averylongsecretvalue42")),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidKey)));

        assert_eq!(denial_reasons(&pool).await, vec!["not_found"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_wrong_secret_rejected(pool: PgPool) {
        let user_id = make_user(&pool, "tamper@example.com").await;
        let (_, raw) = make_key(&pool, user_id).await;
        let state = test_state(pool.clone());

        // Flip the last character of the secret
        let mut tampered = raw.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        let result = handle_gateway(State(state), gateway_request("/v1/widgets", Some(&tampered))).await;
        assert!(matches!(result, Err(Error::InvalidKey)));

        assert_eq!(denial_reasons(&pool).await, vec!["mismatch"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_revoked_key_reported_as_not_found(pool: PgPool) {
        let user_id = make_user(&pool, "revoked@example.com").await;
        let (key_id, raw) = make_key(&pool, user_id).await;

        let mut conn = pool.acquire().await.unwrap();
        ApiKeys::new(&mut conn).revoke(user_id, key_id, Utc::now()).await.unwrap();
        drop(conn);

        let state = test_state(pool.clone());
        let result = handle_gateway(State(state), gateway_request("/v1/widgets", Some(&raw))).await;
        assert!(matches!(result, Err(Error::InvalidKey)));

        assert_eq!(denial_reasons(&pool).await, vec!["not_found"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admission_counts_usage_even_when_upstream_fails(pool: PgPool) {
        let user_id = make_user(&pool, "counted@example.com").await;
        let (key_id, raw) = make_key(&pool, user_id).await;
        let state = test_state(pool.clone());

        // Test config points at an unreachable upstream, so the relay fails
        // after the side effects have landed.
        let result = handle_gateway(State(state), gateway_request("/v1/widgets", Some(&raw))).await;
        assert!(matches!(result, Err(Error::Upstream)));

        let mut conn = pool.acquire().await.unwrap();
        let count = Usage::new(&mut conn)
            .count_for_day(user_id, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let key = ApiKeys::new(&mut conn).get_by_id(key_id).await.unwrap().unwrap();
        assert!(key.last_used_at.is_some());
        drop(conn);

        assert!(audit_events(&pool).await.contains(&AuditEvent::RequestAdmitted));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_quota_exhausted_rejected_with_reset(pool: PgPool) {
        let user_id = make_user(&pool, "over@example.com").await;
        let (_, raw) = make_key(&pool, user_id).await;

        let mut config = create_test_config();
        config.quota.daily_limit = 2;
        let http = proxy::build_http_client(&config.upstream).unwrap();
        let state = AppState::builder().db(pool.clone()).config(config).http(http).build();

        let today = Utc::now().date_naive();
        let mut conn = pool.acquire().await.unwrap();
        Usage::new(&mut conn).increment(user_id, today).await.unwrap();
        Usage::new(&mut conn).increment(user_id, today).await.unwrap();
        drop(conn);

        let result = handle_gateway(State(state), gateway_request("/v1/widgets", Some(&raw))).await;
        match result {
            Err(Error::QuotaExceeded {
                count,
                limit,
                reset_seconds,
            }) => {
                assert_eq!(count, 2);
                assert_eq!(limit, 2);
                assert!((1..=86_400).contains(&reset_seconds));
            }
            other => panic!("expected quota rejection, got {other:?}"),
        }

        assert_eq!(denial_reasons(&pool).await, vec!["quota_exceeded"]);
        assert!(!audit_events(&pool).await.contains(&AuditEvent::RequestAdmitted));

        // The rejected request did not bump the counter
        let mut conn = pool.acquire().await.unwrap();
        let count = Usage::new(&mut conn).count_for_day(user_id, today).await.unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_validate_key_scans_all_candidates_with_shared_prefix(pool: PgPool) {
        let alice = make_user(&pool, "alice-scan@example.com").await;
        let bob = make_user(&pool, "bob-scan@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        let prefix = "sharedpref";
        for (user_id, secret) in [(alice, "alice-secret-0123456789"), (bob, "bob-secret-0123456789")] {
            let raw = format!("{prefix}.{secret}");
            let secret_hash = credentials::hash_secret_with_params(raw.as_bytes(), Some(weak_params())).unwrap();
            ApiKeys::new(&mut conn)
                .create(&ApiKeyCreateDBRequest {
                    user_id,
                    prefix: prefix.to_string(),
                    secret_hash,
                    label: None,
                })
                .await
                .unwrap();
        }

        let outcome = validate_key(&mut conn, &format!("{prefix}.bob-secret-0123456789"))
            .await
            .unwrap();
        let valid = outcome.expect("key should validate");
        assert_eq!(valid.user_id, bob);
    }

    #[test]
    fn test_seconds_until_utc_midnight() {
        let near_midnight = "2025-06-01T23:59:30Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(seconds_until_utc_midnight(near_midnight), 30);

        let midday = "2025-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(seconds_until_utc_midnight(midday), 12 * 60 * 60);

        let midnight = "2025-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(seconds_until_utc_midnight(midnight), 86_400);
    }
}
