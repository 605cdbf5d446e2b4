/// Person lifecycle → email identity lifecycle
///
/// Entry point for every inbound person event. Entitlement decides between provisioning
/// and the disable path; deletion goes straight to the full teardown.
use crate::db::{EmailDomainSource, EmailIdentityRepository, StatusStore};
use crate::domain::address_generator::is_equal_ignore_count;
use crate::error::{EmailError, Result};
use crate::models::{
    EmailAddressStatus, EmailIdentity, EmailIdentityWithStatus, PersonSnapshot, RoleAssignment,
};
use crate::services::entitlement::EntitlementResolver;
use crate::services::kafka_events::EventPublisher;
use crate::services::provisioning::{ProvisionedEmail, ProvisioningRequest, ProvisioningSaga};
use crate::services::teardown::{DeletionOutcome, DisableOutcome, TeardownSaga};
use chrono::Utc;
use event_schema::{EmailAddressGeneratedEvent, EmailLifecycleEvent};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// What handling an event did
#[derive(Debug, Clone, PartialEq)]
pub enum EmailAction {
    /// An ACTIVE identity already matches the person's name
    AlreadyActive(EmailIdentity),
    Provisioned(EmailIdentity),
    /// A PENDING identity was driven to ACTIVE
    Resumed(EmailIdentity),
    /// A DISABLED identity matching the name was switched back on
    Reenabled(EmailIdentity),
    Disabled(DisableOutcome),
    Deleted(DeletionOutcome),
}

#[derive(Clone)]
pub struct EmailEventHandler {
    resolver: EntitlementResolver,
    domains: Arc<dyn EmailDomainSource>,
    identities: Arc<dyn EmailIdentityRepository>,
    statuses: StatusStore,
    provisioning: ProvisioningSaga,
    teardown: TeardownSaga,
    publisher: Arc<dyn EventPublisher>,
}

impl EmailEventHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: EntitlementResolver,
        domains: Arc<dyn EmailDomainSource>,
        identities: Arc<dyn EmailIdentityRepository>,
        statuses: StatusStore,
        provisioning: ProvisioningSaga,
        teardown: TeardownSaga,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            resolver,
            domains,
            identities,
            statuses,
            provisioning,
            teardown,
            publisher,
        }
    }

    /// Person created or updated
    pub async fn handle_person_upserted(
        &self,
        person: &PersonSnapshot,
        removed_assignments: &[RoleAssignment],
    ) -> Result<EmailAction> {
        let person_id = person.person_id;
        let entitling_role = self
            .resolver
            .resolve(person_id, &person.role_assignments, removed_assignments)
            .await?;

        let Some(role_id) = entitling_role else {
            let outcome = self
                .teardown
                .disable_for_person(person_id, person.username.clone())
                .await?;
            return Ok(EmailAction::Disabled(outcome));
        };

        let assignment = self
            .resolver
            .assignment_for_role(role_id, &person.role_assignments, removed_assignments)
            .ok_or_else(|| {
                EmailError::Internal(format!("no assignment carries entitling role {}", role_id))
            })?;
        let domain = self
            .domains
            .domain_for_organisation(assignment.organisation_id)
            .await?
            .ok_or(EmailError::EmailDomainNotFound(assignment.organisation_id))?;

        let existing = self
            .statuses
            .with_current(
                self.identities
                    .find_by_person_sorted_by_priority(person_id)
                    .await?,
            )
            .await?;

        let matches_name = |entry: &EmailIdentityWithStatus| {
            is_equal_ignore_count(
                &entry.identity.address,
                &person.first_name,
                &person.last_name,
                &domain,
            )
        };

        if let Some(active) = existing
            .iter()
            .find(|e| e.is(EmailAddressStatus::Active) && matches_name(e))
        {
            info!(
                person_id = %person_id,
                address = %active.identity.address,
                "Email identity already active"
            );
            return Ok(EmailAction::AlreadyActive(active.identity.clone()));
        }

        let groups = group_keys(&person.role_assignments, removed_assignments);

        if let Some(pending) = existing.iter().find(|e| e.is(EmailAddressStatus::Pending)) {
            let request = ProvisioningRequest {
                person: person.clone(),
                domain: pending.identity.domain.clone(),
                group_keys: groups,
                priority: pending.identity.priority,
            };
            let provisioned = self
                .provisioning
                .resume(&request, pending.identity.clone())
                .await?;
            self.announce(person, &provisioned).await;
            return Ok(EmailAction::Resumed(provisioned.identity));
        }

        if let Some(disabled) = existing
            .iter()
            .find(|e| e.is(EmailAddressStatus::Disabled) && matches_name(e))
        {
            self.statuses
                .append(disabled.identity.id, EmailAddressStatus::Active)
                .await?;
            info!(
                person_id = %person_id,
                address = %disabled.identity.address,
                "Email identity re-enabled"
            );
            let provisioned = ProvisionedEmail {
                identity: disabled.identity.clone(),
                abandoned_addresses: Vec::new(),
            };
            self.announce(person, &provisioned).await;
            return Ok(EmailAction::Reenabled(provisioned.identity));
        }

        // New address becomes the preferred one
        let superseded: Vec<EmailIdentity> = existing
            .iter()
            .filter(|e| e.is(EmailAddressStatus::Active))
            .map(|e| e.identity.clone())
            .collect();
        let request = ProvisioningRequest {
            person: person.clone(),
            domain,
            group_keys: groups,
            priority: 0,
        };
        let provisioned = self.provisioning.provision(&request).await?;

        // Only once the new address exists, so failed attempts leave priorities alone
        for entry in &existing {
            let mut shifted = entry.identity.clone();
            shifted.priority += 1;
            self.identities.save(&shifted).await?;
        }

        if !superseded.is_empty() {
            let outcome = self.teardown.disable_superseded(&superseded).await;
            info!(
                person_id = %person_id,
                disabled = outcome.disabled,
                failed = outcome.failed,
                "Superseded email identities disabled"
            );
        }

        self.announce(person, &provisioned).await;
        Ok(EmailAction::Provisioned(provisioned.identity))
    }

    /// Person removed entirely
    pub async fn handle_person_deleted(&self, person_id: Uuid) -> Result<EmailAction> {
        let outcome = self.teardown.delete_all_for_person(person_id).await?;
        Ok(EmailAction::Deleted(outcome))
    }

    /// The identity is live regardless; a lost notification is logged, not retried
    async fn announce(&self, person: &PersonSnapshot, provisioned: &ProvisionedEmail) {
        let event = EmailLifecycleEvent::Generated(EmailAddressGeneratedEvent {
            person_id: person.person_id,
            username: person.username.clone(),
            email_identity_id: provisioned.identity.id,
            address: provisioned.identity.address.clone(),
            domain: provisioned.identity.domain.clone(),
            generated_at: Utc::now(),
        });

        if let Err(err) = self.publisher.publish(event).await {
            error!(
                person_id = %person.person_id,
                address = %provisioned.identity.address,
                error = %err,
                "Failed to publish email generated event"
            );
        }
    }
}

/// Distinct organisation codes of the remaining assignments, first occurrence wins
fn group_keys(assignments: &[RoleAssignment], removed: &[RoleAssignment]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for assignment in assignments {
        if removed
            .iter()
            .any(|r| r.role_id == assignment.role_id && r.organisation_id == assignment.organisation_id)
        {
            continue;
        }
        if let Some(code) = assignment.organisation_code.as_deref() {
            if !code.is_empty() && !keys.iter().any(|k| k == code) {
                keys.push(code.to_string());
            }
        }
    }
    keys
}
