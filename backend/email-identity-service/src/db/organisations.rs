/// Organisation → email domain lookup
use crate::error::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait EmailDomainSource: Send + Sync {
    async fn domain_for_organisation(&self, organisation_id: Uuid) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct PgEmailDomainSource {
    pool: PgPool,
}

impl PgEmailDomainSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailDomainSource for PgEmailDomainSource {
    async fn domain_for_organisation(&self, organisation_id: Uuid) -> Result<Option<String>> {
        let domain: Option<(Option<String>,)> =
            sqlx::query_as("SELECT email_domain FROM organisations WHERE id = $1")
                .bind(organisation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(domain
            .and_then(|(domain,)| domain)
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty()))
    }
}
