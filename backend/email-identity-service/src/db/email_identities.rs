/// Email identity persistence
/// Rows are owned per person; orphaned rows (owner NULL) only reserve their address
use crate::domain::address_generator::AddressLookup;
use crate::error::Result;
use crate::models::{EmailAddressStatus, EmailIdentity};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Local registry of generated addresses
#[async_trait]
pub trait EmailIdentityRepository: AddressLookup {
    /// Insert or update by id
    async fn save(&self, identity: &EmailIdentity) -> Result<EmailIdentity>;

    async fn find_by_person_sorted_by_priority(&self, person_id: Uuid)
        -> Result<Vec<EmailIdentity>>;

    async fn delete(&self, identity: &EmailIdentity) -> Result<()>;

    /// Bump `updated_at` so the row queues behind untouched ones
    async fn touch(&self, identity: &EmailIdentity) -> Result<()>;

    /// Rows whose latest status record is `status`, oldest update first
    async fn find_by_current_status(
        &self,
        status: EmailAddressStatus,
        limit: i64,
    ) -> Result<Vec<EmailIdentity>>;
}

#[derive(Clone)]
pub struct PgEmailIdentityRepository {
    pool: PgPool,
}

impl PgEmailIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressLookup for PgEmailIdentityRepository {
    async fn exists_address(&self, address: &str) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM email_identities WHERE lower(address) = lower($1))",
        )
        .bind(address)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }
}

#[async_trait]
impl EmailIdentityRepository for PgEmailIdentityRepository {
    async fn save(&self, identity: &EmailIdentity) -> Result<EmailIdentity> {
        let record = sqlx::query_as::<_, EmailIdentity>(
            r#"
            INSERT INTO email_identities (
                id, owner_person_id, domain, address, priority,
                mail_account_ref, directory_ref, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (id) DO UPDATE SET
                owner_person_id = EXCLUDED.owner_person_id,
                priority = EXCLUDED.priority,
                mail_account_ref = EXCLUDED.mail_account_ref,
                directory_ref = EXCLUDED.directory_ref,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(identity.id)
        .bind(identity.owner_person_id)
        .bind(&identity.domain)
        .bind(&identity.address)
        .bind(identity.priority)
        .bind(&identity.mail_account_ref)
        .bind(&identity.directory_ref)
        .bind(identity.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_person_sorted_by_priority(
        &self,
        person_id: Uuid,
    ) -> Result<Vec<EmailIdentity>> {
        let records = sqlx::query_as::<_, EmailIdentity>(
            "SELECT * FROM email_identities WHERE owner_person_id = $1 ORDER BY priority ASC, created_at ASC",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn delete(&self, identity: &EmailIdentity) -> Result<()> {
        // status history goes with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM email_identities WHERE id = $1")
            .bind(identity.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn touch(&self, identity: &EmailIdentity) -> Result<()> {
        sqlx::query("UPDATE email_identities SET updated_at = NOW() WHERE id = $1")
            .bind(identity.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_by_current_status(
        &self,
        status: EmailAddressStatus,
        limit: i64,
    ) -> Result<Vec<EmailIdentity>> {
        let records = sqlx::query_as::<_, EmailIdentity>(
            r#"
            SELECT e.*
            FROM email_identities e
            JOIN LATERAL (
                SELECT s.status
                FROM email_identity_status s
                WHERE s.email_identity_id = e.id
                ORDER BY s.created_at DESC, s.id DESC
                LIMIT 1
            ) current_status ON TRUE
            WHERE current_status.status = $1
            ORDER BY e.updated_at ASC, e.id ASC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
