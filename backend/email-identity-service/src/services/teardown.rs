/// Email teardown saga
///
/// Two paths:
/// - full deletion when the person is removed: mark TO_BE_DELETED, delete the mail account and
///   directory entry, and only then drop the local row
/// - disable when the entitlement is lost: flip every ACTIVE identity to DISABLED and announce
///   it once; external records are left alone
use crate::db::{EmailIdentityRepository, StatusStore};
use crate::error::Result;
use crate::metrics::EmailMetrics;
use crate::models::{EmailAddressStatus, EmailIdentity};
use crate::services::directory::DirectoryClient;
use crate::services::kafka_events::EventPublisher;
use crate::services::mail_account::MailAccountClient;
use chrono::Utc;
use event_schema::{EmailAddressDisabledEvent, EmailLifecycleEvent};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows handled by a deletion pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    /// Local rows dropped after confirmed external cleanup
    pub removed: Vec<Uuid>,
    /// Rows left in TO_BE_DELETED for a later pass
    pub retained: Vec<Uuid>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisableOutcome {
    pub disabled: usize,
    pub failed: usize,
    pub event_published: bool,
}

#[derive(Clone)]
pub struct TeardownSaga {
    identities: Arc<dyn EmailIdentityRepository>,
    statuses: StatusStore,
    mail: Arc<dyn MailAccountClient>,
    directory: Arc<dyn DirectoryClient>,
    publisher: Arc<dyn EventPublisher>,
    metrics: EmailMetrics,
}

impl TeardownSaga {
    pub fn new(
        identities: Arc<dyn EmailIdentityRepository>,
        statuses: StatusStore,
        mail: Arc<dyn MailAccountClient>,
        directory: Arc<dyn DirectoryClient>,
        publisher: Arc<dyn EventPublisher>,
        metrics: EmailMetrics,
    ) -> Self {
        Self {
            identities,
            statuses,
            mail,
            directory,
            publisher,
            metrics,
        }
    }

    /// Remove every identity of a deleted person
    pub async fn delete_all_for_person(&self, person_id: Uuid) -> Result<DeletionOutcome> {
        let identities = self
            .identities
            .find_by_person_sorted_by_priority(person_id)
            .await?;

        if identities.is_empty() {
            debug!(person_id = %person_id, "No email identities to delete");
            return Ok(DeletionOutcome::default());
        }

        // Durable marker on every row before the first external call
        for identity in &identities {
            self.statuses
                .append(identity.id, EmailAddressStatus::ToBeDeleted)
                .await?;
        }

        let outcome = self.cleanup(identities).await?;
        info!(
            person_id = %person_id,
            removed = outcome.removed.len(),
            retained = outcome.retained.len(),
            "Email identities torn down"
        );
        Ok(outcome)
    }

    /// Re-run external cleanup for rows stuck in TO_BE_DELETED
    pub async fn retry_pending_deletions(&self, limit: i64) -> Result<DeletionOutcome> {
        let pending = self
            .identities
            .find_by_current_status(EmailAddressStatus::ToBeDeleted, limit)
            .await?;

        if pending.is_empty() {
            return Ok(DeletionOutcome::default());
        }

        debug!(count = pending.len(), "Retrying pending email deletions");
        self.cleanup(pending).await
    }

    async fn cleanup(&self, identities: Vec<EmailIdentity>) -> Result<DeletionOutcome> {
        let mut outcome = DeletionOutcome::default();

        for identity in identities {
            if self.delete_externals(&identity).await {
                self.identities.delete(&identity).await?;
                self.metrics.teardown.with_label_values(&["removed"]).inc();
                outcome.removed.push(identity.id);
            } else {
                self.metrics.teardown.with_label_values(&["retained"]).inc();
                // Rotate to the back of the retry queue
                if let Err(err) = self.identities.touch(&identity).await {
                    warn!(
                        email_identity_id = %identity.id,
                        error = %err,
                        "Failed to touch retained row"
                    );
                }
                warn!(
                    email_identity_id = %identity.id,
                    address = %identity.address,
                    "External cleanup incomplete, keeping row for retry"
                );
                outcome.retained.push(identity.id);
            }
        }

        Ok(outcome)
    }

    /// True when both external records are gone (or never existed)
    async fn delete_externals(&self, identity: &EmailIdentity) -> bool {
        let mail_done = match identity.mail_account_ref.as_deref() {
            None => true,
            Some(account_ref) => match self.mail.delete_account(account_ref).await {
                Ok(outcome) => {
                    debug!(account_ref = %account_ref, outcome = ?outcome, "Mail account deleted");
                    true
                }
                Err(err) => {
                    error!(
                        email_identity_id = %identity.id,
                        account_ref = %account_ref,
                        error = %err,
                        "Mail account deletion failed"
                    );
                    false
                }
            },
        };

        let directory_done = match identity.directory_ref.as_deref() {
            None => true,
            Some(_) if identity.domain.trim().is_empty() => {
                warn!(
                    email_identity_id = %identity.id,
                    "Domain unknown, skipping directory entry deletion"
                );
                true
            }
            Some(external_id) => match self
                .directory
                .delete_person_entry(external_id, &identity.domain)
                .await
            {
                Ok(outcome) => {
                    debug!(external_id = %external_id, outcome = ?outcome, "Directory entry deleted");
                    true
                }
                Err(err) => {
                    error!(
                        email_identity_id = %identity.id,
                        external_id = %external_id,
                        error = %err,
                        "Directory entry deletion failed"
                    );
                    false
                }
            },
        };

        mail_done && directory_done
    }

    /// Disable every ACTIVE identity of a person who lost the entitlement
    ///
    /// Identities are handled independently; a single event is published when at least one
    /// of them changed.
    pub async fn disable_for_person(
        &self,
        person_id: Uuid,
        username: Option<String>,
    ) -> Result<DisableOutcome> {
        let identities = self
            .identities
            .find_by_person_sorted_by_priority(person_id)
            .await?;
        let active: Vec<EmailIdentity> = self
            .statuses
            .with_current(identities)
            .await?
            .into_iter()
            .filter(|entry| entry.is(EmailAddressStatus::Active))
            .map(|entry| entry.identity)
            .collect();

        if active.is_empty() {
            debug!(person_id = %person_id, "No active email identity to disable");
            return Ok(DisableOutcome::default());
        }

        let (mut outcome, disabled) = self.disable_identities(&active).await;

        if !disabled.is_empty() {
            let event = EmailLifecycleEvent::Disabled(EmailAddressDisabledEvent {
                person_id,
                username,
                disabled_at: Utc::now(),
            });
            if let Err(err) = self.publisher.publish(event).await {
                // Undo so a redelivery finds the identities ACTIVE and announces again
                self.reactivate(&disabled).await;
                return Err(err);
            }
            outcome.event_published = true;
        }

        info!(
            person_id = %person_id,
            disabled = outcome.disabled,
            failed = outcome.failed,
            "Email identities disabled"
        );
        Ok(outcome)
    }

    async fn reactivate(&self, identities: &[&EmailIdentity]) {
        for identity in identities {
            if let Err(err) = self
                .statuses
                .append(identity.id, EmailAddressStatus::Active)
                .await
            {
                error!(
                    email_identity_id = %identity.id,
                    address = %identity.address,
                    error = %err,
                    "Failed to reactivate email identity after unannounced disable"
                );
            }
        }
    }

    /// Disable identities replaced by a newer address; nothing is published
    pub async fn disable_superseded(&self, identities: &[EmailIdentity]) -> DisableOutcome {
        self.disable_identities(identities).await.0
    }

    /// Outcome plus the identities that actually transitioned
    async fn disable_identities<'a>(
        &self,
        identities: &'a [EmailIdentity],
    ) -> (DisableOutcome, Vec<&'a EmailIdentity>) {
        let results = join_all(identities.iter().map(|identity| async move {
            self.statuses
                .append(identity.id, EmailAddressStatus::Disabled)
                .await
                .map(|_| identity)
                .map_err(|err| (identity, err))
        }))
        .await;

        let mut outcome = DisableOutcome::default();
        let mut disabled = Vec::new();
        for result in results {
            match result {
                Ok(identity) => {
                    self.metrics.disabled.inc();
                    outcome.disabled += 1;
                    disabled.push(identity);
                }
                Err((identity, err)) => {
                    error!(
                        email_identity_id = %identity.id,
                        address = %identity.address,
                        error = %err,
                        "Failed to disable email identity"
                    );
                    outcome.failed += 1;
                }
            }
        }
        (outcome, disabled)
    }
}

/// Periodically re-drive deletions whose external cleanup failed
pub fn spawn_teardown_retry_worker(
    saga: TeardownSaga,
    interval: Duration,
    batch_size: i64,
) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        batch_size, "Starting email teardown retry worker"
    );

    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match saga.retry_pending_deletions(batch_size).await {
                Ok(outcome) if outcome.removed.is_empty() && outcome.retained.is_empty() => {}
                Ok(outcome) => info!(
                    removed = outcome.removed.len(),
                    retained = outcome.retained.len(),
                    "Teardown retry pass finished"
                ),
                Err(err) => error!("Teardown retry pass failed: {}", err),
            }
        }
    })
}
