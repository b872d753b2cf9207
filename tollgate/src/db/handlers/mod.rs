//! Repository implementations for database access.
//!
//! This module provides repository structs for each entity in the system.
//! Repositories follow a consistent pattern and, where the entity supports
//! generic access, implement the [`Repository`] trait.
//!
//! # Design Pattern
//!
//! Each repository:
//! - Wraps a SQLx connection or transaction
//! - Provides strongly-typed operations
//! - Handles query construction and parameter binding
//! - Returns domain models from [`crate::db::models`]
//! - Uses the connection's transaction for ACID guarantees
//!
//! # Available Repositories
//!
//! - [`Users`]: Login bookkeeping and account lookup
//! - [`ApiKeys`]: Key lifecycle (create, lookup by prefix, revoke, touch)
//! - [`Otps`]: Passcode issuance, rate gating, verify-and-consume
//! - [`Usage`]: Per-day admission counters (inherent methods only)
//! - [`Audits`]: Append-only decision log
//!
//! # Common Pattern
//!
//! All repositories follow this usage pattern:
//!
//! ```ignore
//! use tollgate::db::handlers::{Repository, Users};
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     // Start a transaction
//!     let mut tx = pool.begin().await?;
//!
//!     // Create repository from transaction
//!     let mut repo = Users::new(&mut tx);
//!
//!     // Perform operations
//!     let user = repo.get_user_by_email("user@example.com").await?;
//!
//!     // Commit or rollback
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod api_keys;
pub mod audits;
pub mod otps;
pub mod repository;
pub mod usage;
pub mod users;

pub use api_keys::ApiKeys;
pub use audits::Audits;
pub use otps::{IssuanceGate, Otps};
pub use repository::Repository;
pub use usage::Usage;
pub use users::Users;
