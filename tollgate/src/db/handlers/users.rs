//! Database repository for users.

use crate::db::{
    errors::Result,
    handlers::repository::Repository,
    models::users::{UserCreateDBRequest, UserDBResponse, UserFilter},
};
use crate::types::{UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        // Always generate a new ID for users
        let user_id = Uuid::new_v4();

        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (id, email)
            VALUES ($1, $2)
            RETURNING id, email, created_at, last_login
            "#,
        )
        .bind(user_id)
        .bind(&request.email)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT id, email, created_at, last_login FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let users = sqlx::query_as::<_, UserDBResponse>(
            "SELECT id, email, created_at, last_login FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(users)
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT id, email, created_at, last_login FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Get-or-create the user for a verified login and stamp `last_login`.
    ///
    /// Returns the user and whether the row was created by this call. Runs in
    /// its own transaction so the lookup and the write cannot interleave with
    /// another login for the same email.
    #[instrument(skip(self, email), err)]
    pub async fn record_login(&mut self, email: &str, now: DateTime<Utc>) -> Result<(UserDBResponse, bool)> {
        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, UserDBResponse>("SELECT id, email, created_at, last_login FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *tx)
            .await?;

        let (user, created) = match existing {
            Some(user) => {
                let user = sqlx::query_as::<_, UserDBResponse>(
                    r#"
                    UPDATE users SET last_login = $2
                    WHERE id = $1
                    RETURNING id, email, created_at, last_login
                    "#,
                )
                .bind(user.id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                (user, false)
            }
            None => {
                let user = sqlx::query_as::<_, UserDBResponse>(
                    r#"
                    INSERT INTO users (id, email, last_login)
                    VALUES ($1, $2, $3)
                    RETURNING id, email, created_at, last_login
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(email)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                (user, true)
            }
        };

        tx.commit().await?;

        Ok((user, created))
    }

    /// Delete a user. Their keys and usage rows cascade away; audit rows
    /// survive with the user reference nulled.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::repository::Repository;
    use super::*;
    use crate::db::errors::DbError;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_user(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let user = repo
            .create(&UserCreateDBRequest {
                email: "test@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(user.email, "test@example.com");
        assert!(user.last_login.is_none());

        let fetched = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, user.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_email_is_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let request = UserCreateDBRequest {
            email: "dupe@example.com".to_string(),
        };
        repo.create(&request).await.unwrap();

        let err = repo.create(&request).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_user_by_email(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let created = repo
            .create(&UserCreateDBRequest {
                email: "email@example.com".to_string(),
            })
            .await
            .unwrap();

        let found = repo.get_user_by_email("email@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);

        assert!(repo.get_user_by_email("absent@example.com").await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_record_login_creates_then_updates(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        // Whole-second timestamps round-trip through TIMESTAMPTZ exactly
        let first_login = "2025-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let (user, created) = repo.record_login("fresh@example.com", first_login).await.unwrap();
        assert!(created);
        assert_eq!(user.last_login, Some(first_login));

        let second_login = first_login + chrono::Duration::hours(3);
        let (same_user, created) = repo.record_login("fresh@example.com", second_login).await.unwrap();
        assert!(!created);
        assert_eq!(same_user.id, user.id);
        assert_eq!(same_user.last_login, Some(second_login));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_is_newest_first(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        for i in 0..3 {
            repo.create(&UserCreateDBRequest {
                email: format!("user{i}@example.com"),
            })
            .await
            .unwrap();
        }

        let listed = repo.list(&UserFilter { skip: 0, limit: 2 }).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
    }
}
