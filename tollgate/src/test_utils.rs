//! Test utilities for integration testing (available with `test-utils` feature).

use crate::auth::credentials::{self, Argon2Params};
use crate::auth::session::create_session_token;
use crate::config::{Argon2Config, Config, EmailConfig, EmailTransportConfig, OtpConfig, PoolSettings, UpstreamConfig};
use crate::db::handlers::{ApiKeys, Repository, Users};
use crate::db::models::{
    api_keys::ApiKeyCreateDBRequest,
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{ApiKeyId, UserId};
use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create_test_app(pool: PgPool) -> (TestServer, crate::AppState) {
    let config = create_test_config();
    create_test_app_with_config(pool, config).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> (TestServer, crate::AppState) {
    let app = crate::Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

pub fn create_test_config() -> Config {
    // reqwest is built with `rustls-no-provider`, so a crypto provider must be
    // installed before any client is constructed. main.rs does this for the
    // binary; tests never run main, so install here (idempotent across tests).
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("tollgate-test-emails-{}", std::process::id()));

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: None,
        database: crate::config::DatabaseConfig {
            // Tests run on a pool injected via new_with_pool; never dialed
            url: "postgresql://unused".to_string(),
            pool: PoolSettings {
                max_connections: 1,
                min_connections: 1,
                ..Default::default()
            },
        },
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        upstream: UpstreamConfig {
            // A closed port, so forwarding fails fast unless a test points
            // this at a mock server
            url: "http://127.0.0.1:9".parse().unwrap(),
            timeout: std::time::Duration::from_secs(5),
            connect_timeout: std::time::Duration::from_secs(1),
            ..Default::default()
        },
        auth: crate::config::AuthConfig {
            otp: OtpConfig {
                debug_cache: true,
                ..Default::default()
            },
            // Cheap hashing parameters; production cost would dominate test time
            argon2: Argon2Config {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            ..Default::default()
        },
        quota: crate::config::QuotaConfig::default(),
        cors: crate::config::CorsConfig::default(),
        email: EmailConfig {
            transport: EmailTransportConfig::File {
                path: temp_dir.to_string_lossy().to_string(),
            },
            ..Default::default()
        },
    }
}

pub async fn create_test_user(pool: &PgPool) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);
    let email = format!("testuser_{}@example.com", Uuid::new_v4().simple());

    users_repo
        .create(&UserCreateDBRequest { email })
        .await
        .expect("Failed to create test user")
}

/// Session cookie header value for a seeded user, ready for `add_header("cookie", ..)`.
pub fn session_cookie_for(config: &Config, user: &UserDBResponse) -> String {
    let token = create_session_token(user.id, &user.email, config).expect("Failed to create session token");
    format!("{}={}", config.auth.session.cookie_name, token)
}

/// Insert an API key the way the create endpoint would, but with cheap hashing
/// parameters. Returns (key id, raw full key).
pub async fn create_test_api_key_for_user(pool: &PgPool, user_id: UserId) -> (ApiKeyId, String) {
    let weak = Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    let generated = credentials::generate_api_key();
    let raw = generated.full();
    let secret_hash = credentials::hash_secret_with_params(raw.as_bytes(), Some(weak)).expect("Failed to hash test key");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut api_key_repo = ApiKeys::new(&mut conn);
    let key = api_key_repo
        .create(&ApiKeyCreateDBRequest {
            user_id,
            prefix: generated.prefix.clone(),
            secret_hash,
            label: Some("Test API Key".to_string()),
        })
        .await
        .expect("Failed to create test API key");

    (key.id, raw)
}
