//! Database repository for one-time passcodes.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::credentials,
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::otps::{OtpCreateDBRequest, OtpDBResponse, OtpFilter, OtpVerifyOutcome},
    },
    types::OtpId,
};

/// How many unconsumed codes per email the verifier will consider.
/// The lookback bound applies before the expiry filter.
const VERIFY_LOOKBACK: i64 = 10;

/// Result of the pre-issuance rate gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceGate {
    Allowed,
    /// The resend cooldown has not elapsed since the last issuance.
    CooldownActive { retry_after_seconds: i64 },
    /// The rolling-hour issuance cap is exhausted.
    HourlyCapped { retry_after_seconds: i64 },
}

pub struct Otps<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Otps<'c> {
    type CreateRequest = OtpCreateDBRequest;
    type Response = OtpDBResponse;
    type Id = OtpId;
    type Filter = OtpFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let code_hash = credentials::hash_secret_with_params(request.raw_code.as_bytes(), Some(request.argon2_params))
            .map_err(|e| DbError::Other(anyhow::anyhow!(e)))?;

        let otp = sqlx::query_as::<_, OtpDBResponse>(
            r#"
            INSERT INTO otps (id, email, code_hash, expires_at, last_sent_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, code_hash, expires_at, last_sent_at, consumed_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.email)
        .bind(code_hash)
        .bind(request.expires_at)
        .bind(request.last_sent_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(otp)
    }

    #[instrument(skip(self, id), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let otp = sqlx::query_as::<_, OtpDBResponse>(
            "SELECT id, email, code_hash, expires_at, last_sent_at, consumed_at, created_at FROM otps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(otp)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query =
            String::from("SELECT id, email, code_hash, expires_at, last_sent_at, consumed_at, created_at FROM otps WHERE 1=1");

        if filter.email.is_some() {
            query.push_str(" AND email = $1");
        }
        query.push_str(&format!(" ORDER BY last_sent_at DESC LIMIT {} OFFSET {}", filter.limit, filter.skip));

        let mut sql_query = sqlx::query_as::<_, OtpDBResponse>(&query);
        if let Some(email) = &filter.email {
            sql_query = sql_query.bind(email.clone());
        }

        let otps = sql_query.fetch_all(&mut *self.db).await?;
        Ok(otps)
    }
}

impl<'c> Otps<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// When the most recent code for this email was sent, if any.
    #[instrument(skip(self, email), err)]
    pub async fn latest_issued_at(&mut self, email: &str) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_sent_at FROM otps WHERE email = $1 ORDER BY last_sent_at DESC LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(latest)
    }

    /// Number of codes issued to this email strictly after `since`.
    #[instrument(skip(self, email), err)]
    pub async fn count_issued_since(&mut self, email: &str, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM otps WHERE email = $1 AND last_sent_at > $2")
            .bind(email)
            .bind(since)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    /// Check both issuance rate limits for an email at `now`.
    ///
    /// The cooldown compares against the most recent issuance regardless of
    /// consumption or expiry; the hourly cap counts every issuance in the
    /// trailing 60 minutes. Both reasons carry the wait the caller should
    /// advertise.
    #[instrument(skip(self, email), err)]
    pub async fn issuance_gate(
        &mut self,
        email: &str,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
        hourly_limit: i64,
    ) -> Result<IssuanceGate> {
        if let Some(last) = self.latest_issued_at(email).await? {
            let elapsed = now - last;
            if elapsed < cooldown {
                let retry_after_seconds = (cooldown - elapsed).num_seconds().max(1);
                return Ok(IssuanceGate::CooldownActive { retry_after_seconds });
            }
        }

        let window_start = now - chrono::Duration::hours(1);
        let issued = self.count_issued_since(email, window_start).await?;
        if issued >= hourly_limit {
            // A slot frees up when the oldest issuance in the window ages out
            let oldest = sqlx::query_scalar::<_, DateTime<Utc>>(
                "SELECT last_sent_at FROM otps WHERE email = $1 AND last_sent_at > $2 ORDER BY last_sent_at ASC LIMIT 1",
            )
            .bind(email)
            .bind(window_start)
            .fetch_one(&mut *self.db)
            .await?;

            let retry_after_seconds = (oldest + chrono::Duration::hours(1) - now).num_seconds().max(1);
            return Ok(IssuanceGate::HourlyCapped { retry_after_seconds });
        }

        Ok(IssuanceGate::Allowed)
    }

    /// Verify `code` against the email's recent unconsumed codes and consume
    /// the first match.
    ///
    /// Candidates are the [`VERIFY_LOOKBACK`] most recently sent unconsumed
    /// rows; the bound applies before expired rows are skipped, so very old
    /// codes cannot be resurrected by issuing new ones. The consume is
    /// guarded on `consumed_at IS NULL` and loses cleanly to a concurrent
    /// verification of the same row.
    #[instrument(skip(self, email, code), err)]
    pub async fn verify_and_consume(&mut self, email: &str, code: &str, now: DateTime<Utc>) -> Result<OtpVerifyOutcome> {
        let candidates = sqlx::query_as::<_, OtpDBResponse>(
            r#"
            SELECT id, email, code_hash, expires_at, last_sent_at, consumed_at, created_at
            FROM otps
            WHERE email = $1 AND consumed_at IS NULL
            ORDER BY last_sent_at DESC
            LIMIT $2
            "#,
        )
        .bind(email)
        .bind(VERIFY_LOOKBACK)
        .fetch_all(&mut *self.db)
        .await?;

        let live: Vec<OtpDBResponse> = candidates.into_iter().filter(|c| c.expires_at > now).collect();
        if live.is_empty() {
            return Ok(OtpVerifyOutcome::NoActiveCode);
        }

        for candidate in live {
            match credentials::verify_secret(code.as_bytes(), &candidate.code_hash) {
                Ok(true) => {
                    let consumed = sqlx::query_as::<_, OtpDBResponse>(
                        r#"
                        UPDATE otps SET consumed_at = $2
                        WHERE id = $1 AND consumed_at IS NULL
                        RETURNING id, email, code_hash, expires_at, last_sent_at, consumed_at, created_at
                        "#,
                    )
                    .bind(candidate.id)
                    .bind(now)
                    .fetch_optional(&mut *self.db)
                    .await?;

                    return Ok(match consumed {
                        Some(otp) => OtpVerifyOutcome::Matched(otp),
                        // Lost a concurrent consume of the same row
                        None => OtpVerifyOutcome::NoActiveCode,
                    });
                }
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!("code verification error for otp {}: {:?}", candidate.id, e);
                    continue;
                }
            }
        }

        Ok(OtpVerifyOutcome::Mismatch)
    }
}
