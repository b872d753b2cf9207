//! Authentication and admission machinery.
//!
//! This module covers both of tollgate's credential surfaces:
//! - The OTP/session path that authorizes the control plane (key management,
//!   usage and audit reads)
//! - The API-key path that admits proxied requests to the upstream
//!
//! # Authentication Methods
//!
//! ## 1. Session Authentication
//!
//! Browser-facing authentication using secure HTTP-only cookies:
//! - A caller requests a one-time passcode via `/auth/otp/request`
//! - Verifying it via `/auth/otp/verify` creates the user on first login and
//!   sets a JWT session cookie
//! - Session tokens are stateless; account state is re-read per request
//!
//! ## 2. API Key Authentication
//!
//! Header-based authentication for the proxied request path:
//! - Keys created per-user via `POST /api/keys`, shown in plaintext once
//! - Passed as `X-API-Key: <prefix>.<secret>` on any forwarded request
//! - No expiration; revocation is a one-way tombstone
//!
//! # Modules
//!
//! - [`admission`]: The staged gate every proxied request passes through
//! - [`credentials`]: Key/code generation, Argon2id hashing, verification
//! - [`current_user`]: Extractor for the session-authenticated user
//! - [`session`]: JWT creation/verification and cookie helpers
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use tollgate::api::models::auth::CurrentUser;
//! use axum::extract::State;
//!
//! async fn protected_handler(
//!     State(state): State<AppState>,
//!     user: CurrentUser,
//! ) -> Result<String, Error> {
//!     Ok(format!("Hello, {}!", user.email))
//! }
//! ```

pub mod admission;
pub mod credentials;
pub mod current_user;
pub mod session;
