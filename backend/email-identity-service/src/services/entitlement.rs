/// Entitlement resolution
///
/// A person needs an active email identity while at least one of their role assignments
/// references a service provider of the email category.
use crate::db::EntitlementSource;
use crate::error::Result;
use crate::models::RoleAssignment;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct EntitlementResolver {
    source: Arc<dyn EntitlementSource>,
    email_category: String,
}

impl EntitlementResolver {
    pub fn new(source: Arc<dyn EntitlementSource>, email_category: impl Into<String>) -> Self {
        Self {
            source,
            email_category: email_category.into(),
        }
    }

    /// Returns the first role (in assignment order) that grants email, if any.
    ///
    /// Assignments listed in `excluded` are ignored; update events pass the assignments they
    /// are removing so a stale role cannot keep the identity alive.
    pub async fn resolve(
        &self,
        person_id: Uuid,
        assignments: &[RoleAssignment],
        excluded: &[RoleAssignment],
    ) -> Result<Option<Uuid>> {
        let considered = considered_assignments(assignments, excluded);
        if considered.is_empty() {
            debug!(person_id = %person_id, "No role assignments to evaluate");
            return Ok(None);
        }

        let mut seen = HashSet::new();
        let role_ids: Vec<Uuid> = considered
            .iter()
            .map(|a| a.role_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let categories = self.source.categories_for_roles(&role_ids).await?;

        let entitling_role = role_ids.into_iter().find(|role_id| {
            categories
                .get(role_id)
                .map(|cats| cats.iter().any(|c| c.eq_ignore_ascii_case(&self.email_category)))
                .unwrap_or(false)
        });

        debug!(
            person_id = %person_id,
            entitled = entitling_role.is_some(),
            "Email entitlement resolved"
        );

        Ok(entitling_role)
    }

    /// The first considered assignment carrying `role_id`
    pub fn assignment_for_role<'a>(
        &self,
        role_id: Uuid,
        assignments: &'a [RoleAssignment],
        excluded: &[RoleAssignment],
    ) -> Option<&'a RoleAssignment> {
        considered_assignments(assignments, excluded)
            .into_iter()
            .find(|a| a.role_id == role_id)
    }
}

fn considered_assignments<'a>(
    assignments: &'a [RoleAssignment],
    excluded: &[RoleAssignment],
) -> Vec<&'a RoleAssignment> {
    assignments
        .iter()
        .filter(|a| {
            !excluded
                .iter()
                .any(|e| e.role_id == a.role_id && e.organisation_id == a.organisation_id)
        })
        .collect()
}
