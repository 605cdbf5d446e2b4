/// Role → service-provider category lookups
/// Tables are owned by the organisation administration; this service only reads them
use crate::error::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    /// Categories per role, for every requested role that references at least one provider
    async fn categories_for_roles(&self, role_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>>;
}

#[derive(Clone)]
pub struct PgEntitlementSource {
    pool: PgPool,
}

impl PgEntitlementSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementSource for PgEntitlementSource {
    async fn categories_for_roles(&self, role_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        if role_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT rsp.role_id, sp.category
            FROM role_service_providers rsp
            JOIN service_providers sp ON sp.id = rsp.service_provider_id
            WHERE rsp.role_id = ANY($1)
            "#,
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut categories: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (role_id, category) in rows {
            categories.entry(role_id).or_default().push(category);
        }

        Ok(categories)
    }
}
