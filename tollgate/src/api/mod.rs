//! API layer for HTTP request handling and data models.
//!
//! This module contains the control-plane REST implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! The control plane is divided into a few functional areas:
//!
//! - **Authentication** (`/auth/*`): OTP issuance, OTP verification, logout
//! - **Account** (`/api/*`): Current user, API keys, usage, audit history
//! - **Health** (`/health`): Liveness
//!
//! Every path outside these prefixes is not part of the control plane: it
//! falls through to the gateway in [`crate::auth::admission`] and, if
//! admitted, is forwarded to the upstream service.
//!
//! # OpenAPI Documentation
//!
//! All control-plane endpoints are documented with OpenAPI annotations using
//! `utoipa`. API documentation is served at `/admin/docs` when the server is
//! running.

pub mod handlers;
pub mod models;
