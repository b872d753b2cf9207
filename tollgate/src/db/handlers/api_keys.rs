//! Database repository for API keys.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        handlers::repository::Repository,
        models::api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse, ApiKeyFilter, RevokeOutcome},
    },
    types::{ApiKeyId, UserId, abbrev_uuid},
};

pub struct ApiKeys<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for ApiKeys<'c> {
    type CreateRequest = ApiKeyCreateDBRequest;
    type Response = ApiKeyDBResponse;
    type Id = ApiKeyId;
    type Filter = ApiKeyFilter;

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), prefix = %request.prefix), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let key_id = Uuid::new_v4();

        // A (user_id, prefix) collision surfaces as a unique violation on
        // api_keys_user_id_prefix_key; the caller decides whether to retry
        // with a fresh prefix.
        let key = sqlx::query_as::<_, ApiKeyDBResponse>(
            r#"
            INSERT INTO api_keys (id, user_id, prefix, secret_hash, label)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, prefix, secret_hash, label, created_at, revoked_at, last_used_at
            "#,
        )
        .bind(key_id)
        .bind(request.user_id)
        .bind(&request.prefix)
        .bind(&request.secret_hash)
        .bind(&request.label)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(key)
    }

    #[instrument(skip(self), fields(key_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let key = sqlx::query_as::<_, ApiKeyDBResponse>(
            "SELECT id, user_id, prefix, secret_hash, label, created_at, revoked_at, last_used_at FROM api_keys WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(key)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = String::from(
            "SELECT id, user_id, prefix, secret_hash, label, created_at, revoked_at, last_used_at FROM api_keys WHERE 1=1",
        );

        if filter.user_id.is_some() {
            query.push_str(" AND user_id = $1");
        }
        if !filter.include_revoked {
            query.push_str(" AND revoked_at IS NULL");
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut sql_query = sqlx::query_as::<_, ApiKeyDBResponse>(&query);
        if let Some(user_id) = filter.user_id {
            sql_query = sql_query.bind(user_id);
        }

        let keys = sql_query.fetch_all(&mut *self.db).await?;
        Ok(keys)
    }
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// All active (non-revoked) keys with the given prefix, newest first.
    ///
    /// Prefixes are only unique per user, so admission verifies the supplied
    /// secret against every candidate until one matches.
    #[instrument(skip(self, prefix), err)]
    pub async fn find_active_by_prefix(&mut self, prefix: &str) -> Result<Vec<ApiKeyDBResponse>> {
        let keys = sqlx::query_as::<_, ApiKeyDBResponse>(
            r#"
            SELECT id, user_id, prefix, secret_hash, label, created_at, revoked_at, last_used_at
            FROM api_keys
            WHERE prefix = $1 AND revoked_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(prefix)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(keys)
    }

    /// Revoke a key owned by `user_id`.
    ///
    /// The tombstone write is guarded on `revoked_at IS NULL`, so revocation
    /// is one-way; a repeat attempt reports [`RevokeOutcome::AlreadyRevoked`]
    /// and a key that is absent or owned by someone else reports
    /// [`RevokeOutcome::NotFound`].
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), key_id = %abbrev_uuid(&key_id)), err)]
    pub async fn revoke(&mut self, user_id: UserId, key_id: ApiKeyId, now: DateTime<Utc>) -> Result<RevokeOutcome> {
        let revoked = sqlx::query_as::<_, ApiKeyDBResponse>(
            r#"
            UPDATE api_keys SET revoked_at = $3
            WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL
            RETURNING id, user_id, prefix, secret_hash, label, created_at, revoked_at, last_used_at
            "#,
        )
        .bind(key_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *self.db)
        .await?;

        if revoked.is_some() {
            return Ok(RevokeOutcome::Revoked);
        }

        let existing = sqlx::query_as::<_, ApiKeyDBResponse>(
            "SELECT id, user_id, prefix, secret_hash, label, created_at, revoked_at, last_used_at FROM api_keys WHERE id = $1 AND user_id = $2",
        )
        .bind(key_id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        match existing {
            Some(key) if key.revoked_at.is_some() => Ok(RevokeOutcome::AlreadyRevoked),
            _ => Ok(RevokeOutcome::NotFound),
        }
    }

    /// Stamp the key's last-used time. Callers treat failures here as
    /// non-fatal bookkeeping.
    #[instrument(skip(self), fields(key_id = %abbrev_uuid(&key_id)), err)]
    pub async fn touch_last_used(&mut self, key_id: ApiKeyId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(key_id)
            .bind(now)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }
}
