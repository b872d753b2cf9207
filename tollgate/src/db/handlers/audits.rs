//! Database repository for audit entries.
//!
//! The audit log is append-only by construction: this repository exposes
//! create and read operations and nothing else, and no other code touches
//! the table.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        handlers::repository::Repository,
        models::audits::{AuditCreateDBRequest, AuditDBResponse, AuditFilter},
    },
    types::AuditId,
};

pub struct Audits<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Audits<'c> {
    type CreateRequest = AuditCreateDBRequest;
    type Response = AuditDBResponse;
    type Id = AuditId;
    type Filter = AuditFilter;

    #[instrument(skip(self, request), fields(event = ?request.event), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let entry = sqlx::query_as::<_, AuditDBResponse>(
            r#"
            INSERT INTO audits (id, user_id, event, detail)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, event, detail, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.event)
        .bind(&request.detail)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(entry)
    }

    #[instrument(skip(self, id), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let entry = sqlx::query_as::<_, AuditDBResponse>("SELECT id, user_id, event, detail, created_at FROM audits WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(entry)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = String::from("SELECT id, user_id, event, detail, created_at FROM audits WHERE 1=1");

        if filter.user_id.is_some() {
            query.push_str(" AND user_id = $1");
        }
        query.push_str(&format!(" ORDER BY created_at DESC LIMIT {} OFFSET {}", filter.limit, filter.skip));

        let mut sql_query = sqlx::query_as::<_, AuditDBResponse>(&query);
        if let Some(user_id) = filter.user_id {
            sql_query = sql_query.bind(user_id);
        }

        let entries = sql_query.fetch_all(&mut *self.db).await?;
        Ok(entries)
    }
}

impl<'c> Audits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}
