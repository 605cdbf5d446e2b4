// Shared in-memory fakes for the email identity integration tests.
//
// Each fake records what it was asked to do and can be told to fail, so the sagas can be
// driven through their error paths without Postgres, Kafka or the external HTTP systems.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use email_identity_service::db::{
    EmailDomainSource, EmailIdentityRepository, EntitlementSource, StatusRepository, StatusStore,
};
use email_identity_service::domain::AddressLookup;
use email_identity_service::error::{EmailError, Result};
use email_identity_service::metrics::EmailMetrics;
use email_identity_service::models::{
    EmailAddressStatus, EmailIdentity, PersonSnapshot, RoleAssignment, StatusRecord,
};
use email_identity_service::services::{
    DeleteOutcome, DirectoryClient, DirectoryEntryRequest, EmailEventHandler,
    EntitlementResolver, EventPublisher, MailAccountClient, MailAccountRequest, ProvisioningSaga,
    TeardownSaga,
};
use event_schema::EmailLifecycleEvent;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const DOMAIN: &str = "schule-sh.de";
pub const EMAIL_CATEGORY: &str = "EMAIL";

// ============================================================================
// Persistence
// ============================================================================

/// Identity rows plus their status log; deleting a row drops its history
#[derive(Default)]
pub struct InMemoryStore {
    identities: Mutex<HashMap<Uuid, EmailIdentity>>,
    statuses: Mutex<Vec<StatusRecord>>,
    pub fail_status_writes: AtomicBool,
    /// Status writes rejected for these identities only
    fail_status_writes_for: Mutex<HashSet<Uuid>>,
}

impl InMemoryStore {
    pub fn insert(&self, identity: EmailIdentity) {
        self.identities
            .lock()
            .unwrap()
            .insert(identity.id, identity);
    }

    pub fn get(&self, id: Uuid) -> Option<EmailIdentity> {
        self.identities.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<EmailIdentity> {
        let mut rows: Vec<EmailIdentity> =
            self.identities.lock().unwrap().values().cloned().collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }

    pub fn history(&self, id: Uuid) -> Vec<EmailAddressStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.email_identity_id == id)
            .map(|r| r.status)
            .collect()
    }

    pub fn current(&self, id: Uuid) -> Option<EmailAddressStatus> {
        self.history(id).last().copied()
    }

    pub fn set_status(&self, id: Uuid, status: EmailAddressStatus) {
        self.statuses
            .lock()
            .unwrap()
            .push(StatusRecord::new(id, status));
    }

    pub fn fail_status_writes_for(&self, id: Uuid) {
        self.fail_status_writes_for.lock().unwrap().insert(id);
    }

    pub fn with_current_status(&self, status: EmailAddressStatus) -> Vec<EmailIdentity> {
        self.all()
            .into_iter()
            .filter(|r| self.current(r.id) == Some(status))
            .collect()
    }
}

#[async_trait]
impl AddressLookup for InMemoryStore {
    async fn exists_address(&self, address: &str) -> Result<bool> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .values()
            .any(|r| r.address.eq_ignore_ascii_case(address)))
    }
}

#[async_trait]
impl EmailIdentityRepository for InMemoryStore {
    async fn save(&self, identity: &EmailIdentity) -> Result<EmailIdentity> {
        let mut identities = self.identities.lock().unwrap();
        let clash = identities
            .values()
            .any(|r| r.id != identity.id && r.address.eq_ignore_ascii_case(&identity.address));
        if clash {
            return Err(EmailError::Database(format!(
                "duplicate address {}",
                identity.address
            )));
        }
        identities.insert(identity.id, identity.clone());
        Ok(identity.clone())
    }

    async fn find_by_person_sorted_by_priority(
        &self,
        person_id: Uuid,
    ) -> Result<Vec<EmailIdentity>> {
        let mut rows: Vec<EmailIdentity> = self
            .identities
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.owner_person_id == Some(person_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(rows)
    }

    async fn delete(&self, identity: &EmailIdentity) -> Result<()> {
        self.identities.lock().unwrap().remove(&identity.id);
        self.statuses
            .lock()
            .unwrap()
            .retain(|r| r.email_identity_id != identity.id);
        Ok(())
    }

    async fn touch(&self, identity: &EmailIdentity) -> Result<()> {
        if let Some(row) = self.identities.lock().unwrap().get_mut(&identity.id) {
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_by_current_status(
        &self,
        status: EmailAddressStatus,
        limit: i64,
    ) -> Result<Vec<EmailIdentity>> {
        let mut rows = self.with_current_status(status);
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(rows.into_iter().take(limit.max(0) as usize).collect())
    }
}

#[async_trait]
impl StatusRepository for InMemoryStore {
    async fn create(&self, record: &StatusRecord) -> Result<()> {
        if self.fail_status_writes.load(Ordering::SeqCst)
            || self
                .fail_status_writes_for
                .lock()
                .unwrap()
                .contains(&record.email_identity_id)
        {
            return Err(EmailError::Database("status write rejected".to_string()));
        }
        self.statuses.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn find_latest(&self, email_identity_id: Uuid) -> Result<Option<StatusRecord>> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.email_identity_id == email_identity_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct StaticEntitlements {
    categories: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl StaticEntitlements {
    pub fn grant(&self, role_id: Uuid, category: &str) {
        self.categories
            .lock()
            .unwrap()
            .entry(role_id)
            .or_default()
            .push(category.to_string());
    }
}

#[async_trait]
impl EntitlementSource for StaticEntitlements {
    async fn categories_for_roles(&self, role_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        let categories = self.categories.lock().unwrap();
        Ok(role_ids
            .iter()
            .filter_map(|id| categories.get(id).map(|c| (*id, c.clone())))
            .collect())
    }
}

#[derive(Default)]
pub struct StaticDomains {
    domains: Mutex<HashMap<Uuid, String>>,
}

impl StaticDomains {
    pub fn set(&self, organisation_id: Uuid, domain: &str) {
        self.domains
            .lock()
            .unwrap()
            .insert(organisation_id, domain.to_string());
    }
}

#[async_trait]
impl EmailDomainSource for StaticDomains {
    async fn domain_for_organisation(&self, organisation_id: Uuid) -> Result<Option<String>> {
        Ok(self.domains.lock().unwrap().get(&organisation_id).cloned())
    }
}

// ============================================================================
// External systems
// ============================================================================

#[derive(Default)]
pub struct FakeMailSystem {
    /// Number of upcoming create calls answered with a primary-mail conflict
    pub conflicts_remaining: AtomicU32,
    pub fail_create: AtomicBool,
    pub fail_groups: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Account refs whose deletion is always rejected
    pub fail_delete_for: Mutex<HashSet<String>>,
    pub delete_not_found: AtomicBool,
    pub created: Mutex<Vec<MailAccountRequest>>,
    pub group_calls: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeMailSystem {
    pub fn conflict_next(&self, count: u32) {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl MailAccountClient for FakeMailSystem {
    async fn create_account(&self, request: &MailAccountRequest) -> Result<String> {
        self.created.lock().unwrap().push(request.clone());

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EmailError::MailAccount("mail system unavailable".to_string()));
        }
        let conflicting = self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicting {
            return Err(EmailError::MailAccountConflict(request.primary_email.clone()));
        }

        Ok(format!("ox-{}", request.primary_email))
    }

    async fn add_to_group(&self, account_ref: &str, group_key: &str) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_groups.load(Ordering::SeqCst) {
            return Err(EmailError::MailAccount("group update rejected".to_string()));
        }
        self.group_calls
            .lock()
            .unwrap()
            .push((account_ref.to_string(), group_key.to_string()));
        Ok(())
    }

    async fn delete_account(&self, account_ref: &str) -> Result<DeleteOutcome> {
        if self.fail_delete.load(Ordering::SeqCst)
            || self.fail_delete_for.lock().unwrap().contains(account_ref)
        {
            return Err(EmailError::MailAccount("delete rejected".to_string()));
        }
        self.deleted.lock().unwrap().push(account_ref.to_string());
        if self.delete_not_found.load(Ordering::SeqCst) {
            return Ok(DeleteOutcome::NotFound);
        }
        Ok(DeleteOutcome::Deleted)
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub delete_not_found: AtomicBool,
    pub created: Mutex<Vec<DirectoryEntryRequest>>,
    pub deleted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn create_person_entry(&self, request: &DirectoryEntryRequest) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EmailError::Directory("directory unavailable".to_string()));
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(format!("uid={},dc={}", request.uid, request.domain))
    }

    async fn delete_person_entry(&self, external_id: &str, domain: &str) -> Result<DeleteOutcome> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(EmailError::Directory("delete rejected".to_string()));
        }
        self.deleted
            .lock()
            .unwrap()
            .push((external_id.to_string(), domain.to_string()));
        if self.delete_not_found.load(Ordering::SeqCst) {
            return Ok(DeleteOutcome::NotFound);
        }
        Ok(DeleteOutcome::Deleted)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<EmailLifecycleEvent>>,
    pub fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<EmailLifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: EmailLifecycleEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmailError::EventPublish("broker down".to_string()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub entitlements: Arc<StaticEntitlements>,
    pub domains: Arc<StaticDomains>,
    pub mail: Arc<FakeMailSystem>,
    pub directory: Arc<FakeDirectory>,
    pub publisher: Arc<RecordingPublisher>,
    pub provisioning: ProvisioningSaga,
    pub teardown: TeardownSaga,
    pub handler: EmailEventHandler,
}

impl Harness {
    pub fn new(retry_budget: u32) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let entitlements = Arc::new(StaticEntitlements::default());
        let domains = Arc::new(StaticDomains::default());
        let mail = Arc::new(FakeMailSystem::default());
        let directory = Arc::new(FakeDirectory::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let metrics = EmailMetrics::new("email-identity-service-test");

        let statuses = StatusStore::new(store.clone());
        let provisioning = ProvisioningSaga::new(
            store.clone(),
            statuses.clone(),
            mail.clone(),
            directory.clone(),
            retry_budget,
            metrics.clone(),
        );
        let teardown = TeardownSaga::new(
            store.clone(),
            statuses.clone(),
            mail.clone(),
            directory.clone(),
            publisher.clone(),
            metrics,
        );
        let handler = EmailEventHandler::new(
            EntitlementResolver::new(entitlements.clone(), EMAIL_CATEGORY),
            domains.clone(),
            store.clone(),
            statuses,
            provisioning.clone(),
            teardown.clone(),
            publisher.clone(),
        );

        Self {
            store,
            entitlements,
            domains,
            mail,
            directory,
            publisher,
            provisioning,
            teardown,
            handler,
        }
    }

    /// An entitled person at an organisation mapped to `DOMAIN`
    pub fn entitled_person(&self, first_name: &str, last_name: &str) -> PersonSnapshot {
        let assignment = RoleAssignment {
            role_id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            organisation_code: Some("0706054".to_string()),
        };
        self.entitlements.grant(assignment.role_id, EMAIL_CATEGORY);
        self.domains.set(assignment.organisation_id, DOMAIN);

        PersonSnapshot {
            person_id: Uuid::new_v4(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: Some(format!(
                "{}{}",
                first_name.to_lowercase().chars().next().unwrap_or('x'),
                last_name.to_lowercase()
            )),
            role_assignments: vec![assignment],
        }
    }
}

/// A row already provisioned for `person_id` with both external references
pub fn active_identity(
    store: &InMemoryStore,
    person_id: Uuid,
    address: &str,
    priority: i32,
) -> EmailIdentity {
    let mut identity = EmailIdentity::new(
        person_id,
        address.to_string(),
        DOMAIN.to_string(),
        priority,
    );
    identity.mail_account_ref = Some(format!("ox-{}", address));
    identity.directory_ref = Some(format!("uid-{}", address));
    store.insert(identity.clone());
    store.set_status(identity.id, EmailAddressStatus::Pending);
    store.set_status(identity.id, EmailAddressStatus::Active);
    identity
}
