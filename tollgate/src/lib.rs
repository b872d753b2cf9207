//! # tollgate: Request-Admission Gateway
//!
//! `tollgate` sits between external callers and a single upstream HTTP service,
//! deciding per request whether to let traffic through. It owns the credentials
//! (per-user API keys), the accounting (per-user daily quotas, audit trail), and
//! the login flow (email one-time codes), so the upstream service never has to.
//!
//! ## Overview
//!
//! Services that expose an internal HTTP API to outside callers all end up
//! needing the same fence: issue credentials, validate them on every request,
//! cap how much each caller may use, and keep a record of what was decided.
//! `tollgate` packages that fence as a standalone gateway. The upstream stays
//! unmodified and unaware; callers talk to the gateway exactly as they would
//! talk to the upstream, plus one `x-api-key` header.
//!
//! ### What It Does
//!
//! Every request that is not aimed at the gateway's own control plane runs
//! through a staged admission pipeline: blocked-path check, credential
//! presence, credential validity (Argon2id hash comparison), daily quota, and
//! side effects (usage counting plus an audit entry), in that order. Admitted
//! requests are then relayed to the upstream byte-for-byte with the credential
//! header stripped. The control plane handles everything around that pipeline:
//! logging in with an emailed one-time code, minting and revoking API keys,
//! and reading back usage and audit history.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the
//! HTTP layer and uses PostgreSQL for all persistence needs.
//!
//! ### Request Flow
//!
//! The application handles two distinct request flows depending on the path.
//!
//! #### Gateway Requests (everything unmatched)
//!
//! Any request that does not match a control-plane route falls through to the
//! admission pipeline in [`auth::admission`]. The caller's API key (format
//! `prefix.secret`, presented in `x-api-key`) is resolved against the active
//! keys sharing its prefix; the stored Argon2id hash decides the owner. The
//! owner's usage for the current UTC day is checked against the configured
//! quota, the request is counted and audited, and the request is forwarded by
//! [`proxy`] with the response streamed straight back. Upstream HTTP errors
//! relay verbatim; transport failures collapse to an opaque 502.
//!
//! #### Control-Plane Requests (`/auth/*`, `/api/*`)
//!
//! Requests to the control plane follow a traditional web application flow.
//! Login starts with `POST /auth/otp/request`, which emails a six-digit code
//! (rate limited per address), and completes with `POST /auth/otp/verify`,
//! which creates the account on first use and sets a JWT session cookie. The
//! session authenticates the account endpoints: API key management under
//! `/api/keys`, quota standing at `/api/usage`, and the per-user audit trail
//! at `/api/audit`. Handlers interact with the database through repository
//! interfaces ([`db::handlers`]).
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) exposes the control plane: authentication
//! routes at `/auth/*` and session-scoped account routes at `/api/*`, with
//! OpenAPI documentation served under `/admin/docs`.
//!
//! The **authentication layer** ([`auth`]) covers both credential surfaces:
//! session cookies for the control plane and API keys for the gateway, plus
//! the admission pipeline itself and the Argon2id hashing primitives.
//!
//! The **database layer** ([`db`]) uses the repository pattern to abstract
//! data access. Each entity (users, API keys, one-time codes, usage counters,
//! audit entries) has a corresponding repository that handles queries and
//! mutations.
//!
//! The **proxy layer** ([`proxy`]) performs the actual relay: header
//! rewriting, `x-forwarded-for` chaining, and body streaming in both
//! directions without buffering.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use tollgate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Parse CLI arguments and load configuration
//!     let args = tollgate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     // Initialize telemetry (structured logging)
//!     tollgate::telemetry::init_telemetry()?;
//!
//!     // Create and start the application
//!     let app = Application::new(config).await?;
//!
//!     // Run with graceful shutdown on Ctrl+C
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! The application requires a PostgreSQL database and automatically runs
//! migrations on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
//! // Run migrations
//! tollgate::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
mod email;
pub mod errors;
mod openapi;
mod proxy;
pub mod telemetry;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{delete, get, post},
};
use bon::Builder;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;

pub use config::Config;
pub use types::{ApiKeyId, AuditId, OtpDebugCache, OtpId, UserId};

/// Application state shared across all request handlers.
///
/// This struct contains all the shared resources needed by the API handlers
/// and the admission pipeline.
///
/// # Fields
///
/// - `db`: PostgreSQL connection pool for application data
/// - `config`: Application configuration loaded from environment/files
/// - `http`: Shared HTTP client used for relaying admitted requests upstream
/// - `otp_debug`: In-memory login-code cache, present only when
///   `auth.otp.debug_cache` is enabled (non-production deployments)
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .http(http_client)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub http: reqwest::Client,
    pub otp_debug: Option<Arc<OtpDebugCache>>,
}

/// Get the tollgate database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            // Url normalizes with a trailing slash; Origin headers carry none
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut exposed = Vec::new();
    for name in &config.cors.exposed_headers {
        exposed.push(name.parse::<http::HeaderName>()?);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(exposed);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// Control-plane routes (authentication, account management, health, docs)
/// are matched first; every other request falls through to the gateway
/// admission pipeline and, if admitted, is relayed upstream.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    // Authentication routes (no session required; they issue it)
    let auth_routes = Router::new()
        .route("/auth/otp/request", post(api::handlers::auth::request_otp))
        .route("/auth/otp/verify", post(api::handlers::auth::verify_otp))
        .route("/auth/logout", post(api::handlers::auth::logout))
        .with_state(state.clone());

    // Account routes (session-authenticated)
    let api_routes = Router::new()
        .route("/api/me", get(api::handlers::auth::get_current_user))
        .route("/api/keys", post(api::handlers::api_keys::create_api_key))
        .route("/api/keys", get(api::handlers::api_keys::list_api_keys))
        .route("/api/keys/{id}", delete(api::handlers::api_keys::revoke_api_key))
        .route("/api/usage", get(api::handlers::usage::get_usage))
        .route("/api/audit", get(api::handlers::audits::list_audit_entries))
        .with_state(state.clone());

    // Everything unmatched is a gateway request
    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/admin/api-docs/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        )
        .fallback(auth::admission::handle_gateway)
        .with_state(state.clone())
        .merge(auth_routes)
        .merge(api_routes)
        .merge(Scalar::with_url("/admin/docs", ApiDoc::openapi()));

    // Create CORS layer from config
    let cors_layer = create_cors_layer(&state.config)?;
    let router = router.layer(cors_layer);

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs
///    migrations, and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts
///    handling requests
/// 3. **Shutdown**: When the shutdown signal is received, in-flight requests
///    drain and the connection pool closes
pub struct Application {
    router: Router,
    app_state: AppState,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Create an application on an existing pool (used by tests), or connect
    /// per the configuration when no pool is given.
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting tollgate with configuration: {:#?}", config);

        let pool = match pool {
            Some(pool) => pool,
            None => {
                let settings = &config.database.pool;
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .min_connections(settings.min_connections)
                    .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
                    .idle_timeout((settings.idle_timeout_secs > 0).then(|| Duration::from_secs(settings.idle_timeout_secs)))
                    .max_lifetime((settings.max_lifetime_secs > 0).then(|| Duration::from_secs(settings.max_lifetime_secs)))
                    .connect(config.database_url())
                    .await?
            }
        };
        migrator().run(&pool).await?;

        let http = proxy::build_http_client(&config.upstream)?;

        let otp_debug = config.auth.otp.debug_cache.then(|| Arc::new(OtpDebugCache::default()));
        if otp_debug.is_some() {
            warn!("OTP debug cache enabled: login codes are held in memory and may be returned in responses");
        }

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config)
            .http(http)
            .maybe_otp_debug(otp_debug)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            pool,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.app_state)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.app_state.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Tollgate listening on http://{}, forwarding admitted requests to {}",
            bind_addr, self.app_state.config.upstream.url
        );

        // ConnectInfo feeds the x-forwarded-for chain on relayed requests
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Close database connections
        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
