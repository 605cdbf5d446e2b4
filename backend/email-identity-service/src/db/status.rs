/// Append-only status log per email identity
use crate::error::Result;
use crate::models::{EmailAddressStatus, EmailIdentity, EmailIdentityWithStatus, StatusRecord};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait StatusRepository: Send + Sync {
    /// Insert-only
    async fn create(&self, record: &StatusRecord) -> Result<()>;

    async fn find_latest(&self, email_identity_id: Uuid) -> Result<Option<StatusRecord>>;
}

#[derive(Clone)]
pub struct PgStatusRepository {
    pool: PgPool,
}

impl PgStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusRepository for PgStatusRepository {
    async fn create(&self, record: &StatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_identity_status (email_identity_id, status, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(record.email_identity_id)
        .bind(record.status)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_latest(&self, email_identity_id: Uuid) -> Result<Option<StatusRecord>> {
        let record = sqlx::query_as::<_, StatusRecord>(
            r#"
            SELECT email_identity_id, status, created_at
            FROM email_identity_status
            WHERE email_identity_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(email_identity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

/// Thin facade over the status log
#[derive(Clone)]
pub struct StatusStore {
    repo: Arc<dyn StatusRepository>,
}

impl StatusStore {
    pub fn new(repo: Arc<dyn StatusRepository>) -> Self {
        Self { repo }
    }

    pub async fn append(
        &self,
        email_identity_id: Uuid,
        status: EmailAddressStatus,
    ) -> Result<StatusRecord> {
        let record = StatusRecord::new(email_identity_id, status);
        self.repo.create(&record).await?;
        debug!(email_identity_id = %email_identity_id, status = %status, "Status appended");
        Ok(record)
    }

    pub async fn current(&self, email_identity_id: Uuid) -> Result<Option<EmailAddressStatus>> {
        Ok(self
            .repo
            .find_latest(email_identity_id)
            .await?
            .map(|record| record.status))
    }

    /// Attach current status to each identity, keeping order
    pub async fn with_current(
        &self,
        identities: Vec<EmailIdentity>,
    ) -> Result<Vec<EmailIdentityWithStatus>> {
        let mut out = Vec::with_capacity(identities.len());
        for identity in identities {
            let status = self.current(identity.id).await?;
            out.push(EmailIdentityWithStatus { identity, status });
        }
        Ok(out)
    }
}
