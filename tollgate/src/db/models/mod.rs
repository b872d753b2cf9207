//! Database record models matching table schemas.
//!
//! This module contains struct definitions that directly correspond to database
//! table rows. These models are used by repositories to return query results
//! and accept insertion data.
//!
//! # Design Principles
//!
//! - **Schema Mapping**: Each model struct matches a database table schema
//! - **SQLx Integration**: Response models derive `sqlx::FromRow`
//! - **Separation**: Database models are distinct from API models to allow
//!   independent evolution of storage and API representations
//! - **No plaintext secrets**: API-key secrets and OTP codes only ever cross
//!   this layer as Argon2id PHC strings
//!
//! # Model Categories
//!
//! - [`users`]: User accounts created on first login
//! - [`api_keys`]: Long-lived caller credentials with tombstone revocation
//! - [`otps`]: Short-lived login codes keyed by email
//! - [`usage`]: Per-user, per-UTC-day admission counters
//! - [`audits`]: Append-only decision log
//!
//! # Conversion to API Models
//!
//! Database models typically implement `From` or `Into` conversions to API models:
//!
//! ```ignore
//! use tollgate::db::models::api_keys::ApiKeyDBResponse;
//! use tollgate::api::models::api_keys::ApiKeyInfoResponse;
//!
//! let db_key: ApiKeyDBResponse = /* ... */;
//! let api_response: ApiKeyInfoResponse = db_key.into();
//! ```

pub mod api_keys;
pub mod audits;
pub mod otps;
pub mod usage;
pub mod users;
