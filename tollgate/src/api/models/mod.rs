//! API request and response data models.
//!
//! This module contains the data structures used for HTTP request
//! deserialization and response serialization. These models define the public
//! API contract and are distinct from the database models in
//! [`crate::db::models`], so the API and storage representations can evolve
//! independently.
//!
//! All models are annotated with `utoipa` for automatic API docs.
//!
//! # Model Categories
//!
//! - [`auth`]: OTP login payloads, session responses, and the authenticated
//!   [`auth::CurrentUser`] extractor target
//! - [`api_keys`]: API key creation and metadata (secrets appear exactly once,
//!   at creation)
//! - [`usage`]: Daily quota standing
//! - [`audits`]: Audit trail entries and list queries

pub mod api_keys;
pub mod audits;
pub mod auth;
pub mod usage;
