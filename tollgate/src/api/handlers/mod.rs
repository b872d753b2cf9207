//! HTTP request handlers for the control-plane endpoints.
//!
//! This module contains Axum route handlers organized by resource type.
//! Each handler is responsible for:
//! - Request validation and deserialization
//! - Authentication checks
//! - Business logic execution via database repositories
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`auth`]: OTP issuance and verification, logout, current user
//! - [`api_keys`]: API key creation, listing, and revocation
//! - [`usage`]: Daily quota standing for the current user
//! - [`audits`]: The current user's audit trail
//!
//! The gateway itself (credential admission and forwarding for every
//! non-control-plane path) lives in [`crate::auth::admission`], not here.
//!
//! # Authentication
//!
//! All `/api/*` handlers require a session cookie; the
//! [`crate::api::models::auth::CurrentUser`] extractor re-reads the account
//! on every request.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which converts into the
//! structured JSON error body with a stable `error` code.

pub mod api_keys;
pub mod audits;
pub mod auth;
pub mod usage;
