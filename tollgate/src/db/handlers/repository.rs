//! Base repository trait for database operations.

/// Contains the Repository trait.
///
/// A repository is basically a data access layer for a postgres table. Each
/// repository borrows a connection (or transaction) and provides methods for
/// creating, reading, and listing entities with simple filters.
///
/// Mutations beyond insert are deliberately not part of the trait: tollgate's
/// entities are either append-only (audits), consumed via a guarded update
/// (otps), or tombstoned (api keys). Those state transitions are inherent
/// methods on the individual repositories so the type system never offers a
/// generic update/delete on them.
use crate::db::errors::Result;

/// Base repository trait providing common database operations
#[async_trait::async_trait]
pub trait Repository {
    /// The request type for creating entities
    type CreateRequest;

    /// The response/DTO type returned by operations
    type Response;

    /// The identifier type for lookups
    type Id: Send + Sync;

    /// The filter type for list operations
    type Filter: Send + Sync;

    /// Create a new entity
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// Get an entity by ID
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// List entities with filtering and pagination
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;
}
