use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::{
    AppState,
    api::models::auth::{
        AuthResponse, AuthSuccessResponse, CurrentUser, LoginResponse, LogoutResponse, OtpRequest, OtpRequestResponse,
        OtpVerifyRequest,
    },
    auth::{credentials, session},
    db::{
        errors::DbError,
        handlers::{Audits, IssuanceGate, Otps, Repository, Users},
        models::{
            audits::{AuditCreateDBRequest, AuditEvent},
            otps::{OtpCreateDBRequest, OtpVerifyOutcome},
        },
    },
    email::EmailService,
    errors::{Error, Result},
};

/// Trim, lowercase, and check the minimal shape: a local part, an `@`, and a
/// dotted domain. Deliverability is the notifier's problem, not ours, but the
/// normalization matters: rate limits are keyed on this string.
fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
        None => false,
    };
    if !valid {
        return Err(Error::BadRequest {
            message: "Invalid email address".to_string(),
        });
    }
    Ok(email)
}

/// Append a login-flow audit entry. Best effort: a failed write is logged and
/// the response still goes out.
async fn record_login_audit(state: &AppState, user_id: Option<crate::types::UserId>, event: AuditEvent, detail: serde_json::Value) {
    let result: crate::db::errors::Result<()> = async {
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        Audits::new(&mut conn)
            .create(&AuditCreateDBRequest { user_id, event, detail })
            .await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(error = %e, "failed to record login audit entry");
    }
}

/// Send a one-time login code to an email address.
///
/// Issuance is rate limited per address: one code per cooldown window and a
/// rolling-hour cap, both read from persisted issuance timestamps. The code
/// is stored hashed and emailed in plaintext. No account needs to exist; the
/// account is created on first successful verification.
#[utoipa::path(
    post,
    path = "/auth/otp/request",
    request_body = OtpRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login code issued", body = OtpRequestResponse),
        (status = 400, description = "Malformed email address"),
        (status = 429, description = "Issuance rate limit hit"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_otp(State(state): State<AppState>, Json(request): Json<OtpRequest>) -> Result<Json<OtpRequestResponse>> {
    let email = normalize_email(&request.email)?;
    let now = Utc::now();
    let otp_config = &state.config.auth.otp;
    let cooldown = chrono::Duration::seconds(otp_config.resend_cooldown.as_secs() as i64);

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let gate = Otps::new(&mut tx)
        .issuance_gate(&email, now, cooldown, otp_config.hourly_limit)
        .await?;
    match gate {
        IssuanceGate::Allowed => {}
        IssuanceGate::CooldownActive { retry_after_seconds } => {
            drop(tx);
            record_login_audit(
                &state,
                None,
                AuditEvent::OtpRateLimited,
                json!({ "email": email, "reason": "cooldown", "retry_after_seconds": retry_after_seconds }),
            )
            .await;
            return Err(Error::OtpCooldown { retry_after_seconds });
        }
        IssuanceGate::HourlyCapped { retry_after_seconds } => {
            drop(tx);
            record_login_audit(
                &state,
                None,
                AuditEvent::OtpRateLimited,
                json!({ "email": email, "reason": "hourly_cap", "retry_after_seconds": retry_after_seconds }),
            )
            .await;
            return Err(Error::OtpHourlyCap { retry_after_seconds });
        }
    }

    let code = credentials::generate_otp_code();
    let expires_at = now + chrono::Duration::seconds(otp_config.code_expiry.as_secs() as i64);

    Otps::new(&mut tx)
        .create(&OtpCreateDBRequest {
            email: email.clone(),
            raw_code: code.clone(),
            expires_at,
            last_sent_at: now,
            argon2_params: state.config.auth.argon2.params(),
        })
        .await?;
    Audits::new(&mut tx)
        .create(&AuditCreateDBRequest {
            user_id: None,
            event: AuditEvent::OtpIssued,
            detail: json!({ "email": email }),
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    if let Some(cache) = &state.otp_debug {
        cache.store(&email, &code);
    }

    let expiry_minutes = otp_config.code_expiry.as_secs() / 60;
    let delivery = match EmailService::new(&state.config) {
        Ok(mailer) => mailer.send_otp_email(&email, &code, expiry_minutes).await,
        Err(e) => Err(e),
    };

    let debug_code = match delivery {
        Ok(()) => None,
        // Delivery failure is only survivable through the debug channel;
        // production (no cache) must not swallow it.
        Err(e) if state.otp_debug.is_some() => {
            warn!(error = %e, "code delivery failed; returning the code through the debug channel");
            Some(code)
        }
        Err(e) => return Err(e),
    };

    Ok(Json(OtpRequestResponse {
        message: "Login code sent".to_string(),
        debug_code,
    }))
}

/// Exchange an emailed code for a session cookie.
///
/// On the first successful verification for an address the account is
/// created. Wrong-code and no-active-code rejections are indistinguishable on
/// the wire; the audit entry keeps the precise reason.
#[utoipa::path(
    post,
    path = "/auth/otp/verify",
    request_body = OtpVerifyRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Malformed email address"),
        (status = 401, description = "Invalid or expired code"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_otp(State(state): State<AppState>, Json(request): Json<OtpVerifyRequest>) -> Result<LoginResponse> {
    let email = normalize_email(&request.email)?;

    let code = request.code.trim();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        record_login_audit(
            &state,
            None,
            AuditEvent::LoginFailed,
            json!({ "email": email, "reason": "format" }),
        )
        .await;
        return Err(Error::InvalidCode);
    }

    let now = Utc::now();
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let outcome = Otps::new(&mut tx).verify_and_consume(&email, code, now).await?;
    let reason = match outcome {
        OtpVerifyOutcome::Matched(_) => {
            let (user, created) = Users::new(&mut tx).record_login(&email, now).await?;
            Audits::new(&mut tx)
                .create(&AuditCreateDBRequest {
                    user_id: Some(user.id),
                    event: AuditEvent::LoginSucceeded,
                    detail: json!({ "email": email, "account_created": created }),
                })
                .await?;
            tx.commit().await.map_err(|e| Error::Database(e.into()))?;

            let token = session::create_session_token(user.id, &user.email, &state.config)?;
            let cookie = session::create_session_cookie(&token, &state.config);

            return Ok(LoginResponse {
                auth_response: AuthResponse {
                    user: CurrentUser::from(user),
                    message: "Login successful".to_string(),
                },
                cookie,
            });
        }
        OtpVerifyOutcome::NoActiveCode => "no_active_code",
        OtpVerifyOutcome::Mismatch => "mismatch",
    };

    drop(tx);
    record_login_audit(
        &state,
        None,
        AuditEvent::LoginFailed,
        json!({ "email": email, "reason": reason }),
    )
    .await;
    Err(Error::InvalidCode)
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse> {
    let cookie = session::clear_session_cookie(&state.config);

    let auth_response = AuthSuccessResponse {
        message: "Logout successful".to_string(),
    };

    Ok(LogoutResponse { auth_response, cookie })
}

/// Get the current user. The extractor re-reads the account from the store,
/// so the response reflects deletions and fresh `last_login` stamps.
#[utoipa::path(
    get,
    path = "/api/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = CurrentUser),
        (status = 401, description = "Not authenticated"),
    ),
    security(("SessionCookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::audits::AuditFilter;
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config};
    use axum_test::TestServer;
    use sqlx::PgPool;

    async fn request_code(app: &TestServer, email: &str) -> axum_test::TestResponse {
        app.post("/auth/otp/request").json(&json!({ "email": email })).await
    }

    fn cached_code(state: &AppState, email: &str) -> String {
        state.otp_debug.as_ref().expect("debug cache enabled in tests").get(email).unwrap()
    }

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
    async fn test_request_otp_issues_and_caches_code(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;

        let response = request_code(&app, "otp@example.com").await;
        response.assert_status_ok();

        let body: OtpRequestResponse = response.json();
        assert_eq!(body.message, "Login code sent");
        // File transport delivered, so nothing leaks inline
        assert!(body.debug_code.is_none());

        let code = cached_code(&state, "otp@example.com");
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        assert!(recorded_events(&pool).await.contains(&AuditEvent::OtpIssued));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_otp_normalizes_address(pool: PgPool) {
        let (app, state) = create_test_app(pool).await;

        request_code(&app, "  MiXeD@Example.COM ").await.assert_status_ok();
        assert!(state.otp_debug.as_ref().unwrap().get("mixed@example.com").is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_otp_rejects_malformed_email(pool: PgPool) {
        let (app, _) = create_test_app(pool).await;

        for bad in ["", "noatsign", "@no.local", "user@nodot", "user@.start"] {
            let response = request_code(&app, bad).await;
            response.assert_status(axum::http::StatusCode::BAD_REQUEST);
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_otp_cooldown(pool: PgPool) {
        let (app, _) = create_test_app(pool.clone()).await;

        request_code(&app, "cool@example.com").await.assert_status_ok();
        let response = request_code(&app, "cool@example.com").await;
        response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);

        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "rate_minute");
        let wait = body["retry_after_seconds"].as_i64().unwrap();
        assert!((1..=120).contains(&wait));

        assert!(recorded_events(&pool).await.contains(&AuditEvent::OtpRateLimited));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_otp_hourly_cap(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.otp.resend_cooldown = std::time::Duration::ZERO;
        config.auth.otp.hourly_limit = 2;
        let (app, _) = create_test_app_with_config(pool, config).await;

        request_code(&app, "cap@example.com").await.assert_status_ok();
        request_code(&app, "cap@example.com").await.assert_status_ok();
        let response = request_code(&app, "cap@example.com").await;
        response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);

        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "rate_hour");
        assert!(body["retry_after_seconds"].as_i64().unwrap() >= 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_otp_delivery_failure_surfaces_debug_code(pool: PgPool) {
        let mut config = create_test_config();
        // /dev/null is not a directory, so the file transport cannot be built
        config.email.transport = crate::config::EmailTransportConfig::File {
            path: "/dev/null/emails".to_string(),
        };
        let (app, _) = create_test_app_with_config(pool, config).await;

        let response = request_code(&app, "undeliverable@example.com").await;
        response.assert_status_ok();

        let body: OtpRequestResponse = response.json();
        let code = body.debug_code.expect("debug cache enabled surfaces the code");
        assert_eq!(code.len(), 6);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_otp_delivery_failure_without_debug_cache_is_hard_error(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.otp.debug_cache = false;
        config.email.transport = crate::config::EmailTransportConfig::File {
            path: "/dev/null/emails".to_string(),
        };
        let (app, _) = create_test_app_with_config(pool, config).await;

        let response = request_code(&app, "undeliverable@example.com").await;
        response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_otp_creates_account_and_sets_cookie(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;

        request_code(&app, "new@example.com").await.assert_status_ok();
        let code = cached_code(&state, "new@example.com");

        let response = app
            .post("/auth/otp/verify")
            .json(&json!({ "email": "new@example.com", "code": code }))
            .await;
        response.assert_status_ok();

        let cookie = response
            .headers()
            .get("set-cookie")
            .expect("login sets the session cookie")
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with(&format!("{}=", state.config.auth.session.cookie_name)));
        assert!(cookie.contains("HttpOnly"));

        let body: AuthResponse = response.json();
        assert_eq!(body.user.email, "new@example.com");
        assert!(body.user.last_login.is_some());

        // First verification created the account
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get_user_by_email("new@example.com").await.unwrap();
        assert!(user.is_some());

        assert!(recorded_events(&pool).await.contains(&AuditEvent::LoginSucceeded));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_otp_wrong_code_rejected(pool: PgPool) {
        let (app, state) = create_test_app(pool.clone()).await;

        request_code(&app, "wrong@example.com").await.assert_status_ok();
        let issued = cached_code(&state, "wrong@example.com");
        let wrong = if issued == "000000" { "000001" } else { "000000" };

        let response = app
            .post("/auth/otp/verify")
            .json(&json!({ "email": "wrong@example.com", "code": wrong }))
            .await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "invalid_code");

        assert!(recorded_events(&pool).await.contains(&AuditEvent::LoginFailed));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_otp_without_active_code_rejected(pool: PgPool) {
        let (app, _) = create_test_app(pool).await;

        let response = app
            .post("/auth/otp/verify")
            .json(&json!({ "email": "nocode@example.com", "code": "123456" }))
            .await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

        // Same wire response as a wrong code
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "invalid_code");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_otp_code_is_single_use(pool: PgPool) {
        let (app, state) = create_test_app(pool).await;

        request_code(&app, "once@example.com").await.assert_status_ok();
        let code = cached_code(&state, "once@example.com");

        let payload = json!({ "email": "once@example.com", "code": code });
        app.post("/auth/otp/verify").json(&payload).await.assert_status_ok();

        let response = app.post("/auth/otp/verify").json(&payload).await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_otp_malformed_code_rejected(pool: PgPool) {
        let (app, _) = create_test_app(pool).await;

        for bad in ["12345", "1234567", "12a456", ""] {
            let response = app
                .post("/auth/otp/verify")
                .json(&json!({ "email": "fmt@example.com", "code": bad }))
                .await;
            response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_current_user_roundtrip(pool: PgPool) {
        let (app, state) = create_test_app(pool).await;

        request_code(&app, "me@example.com").await.assert_status_ok();
        let code = cached_code(&state, "me@example.com");
        let login = app
            .post("/auth/otp/verify")
            .json(&json!({ "email": "me@example.com", "code": code }))
            .await;
        login.assert_status_ok();

        let set_cookie = login.headers().get("set-cookie").unwrap().to_str().unwrap();
        // Strip the attributes; send back only name=value
        let pair = set_cookie.split(';').next().unwrap().to_string();

        let response = app.get("/api/me").add_header("cookie", pair).await;
        response.assert_status_ok();
        let me: CurrentUser = response.json();
        assert_eq!(me.email, "me@example.com");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_current_user_without_session(pool: PgPool) {
        let (app, _) = create_test_app(pool).await;

        let response = app.get("/api/me").await;
        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_logout_clears_cookie(pool: PgPool) {
        let (app, state) = create_test_app(pool).await;

        let response = app.post("/auth/logout").await;
        response.assert_status_ok();

        let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("{}=;", state.config.auth.session.cookie_name)));
        assert!(cookie.contains("Max-Age=0"));
    }
}
