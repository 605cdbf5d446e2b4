/// Email provisioning saga
///
/// Creates an address consistently across the local registry, the mail system and the
/// directory without a distributed transaction:
///
/// ```text
/// Start -> Candidate -> DbPending -> MailCreated -> GroupsJoined -> DirectoryWritten -> ACTIVE
///                          |
///                          +-- conflict --> abandon row (EXISTS_ONLY_IN_OX) --> Start
/// ```
///
/// Any other error marks the row FAILED and is returned. The external references stored on
/// the row are the durable checkpoints `resume` restarts from.
use crate::db::{EmailIdentityRepository, StatusStore};
use crate::domain::address_generator::generate_available_address;
use crate::error::{EmailError, Result};
use crate::metrics::EmailMetrics;
use crate::models::{EmailAddressStatus, EmailIdentity, PersonSnapshot};
use crate::services::directory::{DirectoryClient, DirectoryEntryRequest};
use crate::services::mail_account::{MailAccountClient, MailAccountRequest};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything one provisioning run needs to know about the person
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub person: PersonSnapshot,
    pub domain: String,
    /// Mail groups to join, in order
    pub group_keys: Vec<String>,
    pub priority: i32,
}

impl ProvisioningRequest {
    fn username(&self, identity: &EmailIdentity) -> String {
        self.person
            .username
            .clone()
            .unwrap_or_else(|| identity.local_part().to_string())
    }

    fn display_name(&self) -> String {
        format!("{} {}", self.person.first_name, self.person.last_name)
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct ProvisionedEmail {
    pub identity: EmailIdentity,
    /// Addresses given up after collisions, in order
    pub abandoned_addresses: Vec<String>,
}

/// Saga state; each variant is the last step that completed
#[derive(Debug)]
enum SagaState {
    Start,
    Candidate { address: String },
    DbPending { identity: EmailIdentity },
    MailCreated { identity: EmailIdentity },
    GroupsJoined { identity: EmailIdentity },
    DirectoryWritten { identity: EmailIdentity },
}

/// Step labels for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    Candidate,
    DbPending,
    MailCreated,
    GroupsJoined,
    DirectoryWritten,
    Active,
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SagaStep::Candidate => "candidate",
            SagaStep::DbPending => "db_pending",
            SagaStep::MailCreated => "mail_created",
            SagaStep::GroupsJoined => "groups_joined",
            SagaStep::DirectoryWritten => "directory_written",
            SagaStep::Active => "active",
        };
        f.write_str(label)
    }
}

#[derive(Clone)]
pub struct ProvisioningSaga {
    identities: Arc<dyn EmailIdentityRepository>,
    statuses: StatusStore,
    mail: Arc<dyn MailAccountClient>,
    directory: Arc<dyn DirectoryClient>,
    retry_budget: u32,
    metrics: EmailMetrics,
}

impl ProvisioningSaga {
    pub fn new(
        identities: Arc<dyn EmailIdentityRepository>,
        statuses: StatusStore,
        mail: Arc<dyn MailAccountClient>,
        directory: Arc<dyn DirectoryClient>,
        retry_budget: u32,
        metrics: EmailMetrics,
    ) -> Self {
        Self {
            identities,
            statuses,
            mail,
            directory,
            retry_budget: retry_budget.max(1),
            metrics,
        }
    }

    /// Provision a fresh address for the person
    pub async fn provision(&self, request: &ProvisioningRequest) -> Result<ProvisionedEmail> {
        info!(
            person_id = %request.person.person_id,
            domain = %request.domain,
            "Starting email provisioning"
        );
        self.run(request, SagaState::Start).await
    }

    /// Continue a PENDING identity from its last durable checkpoint
    pub async fn resume(
        &self,
        request: &ProvisioningRequest,
        identity: EmailIdentity,
    ) -> Result<ProvisionedEmail> {
        let state = match (&identity.mail_account_ref, &identity.directory_ref) {
            (None, _) => SagaState::DbPending { identity },
            (Some(_), None) => SagaState::MailCreated { identity },
            (Some(_), Some(_)) => SagaState::DirectoryWritten { identity },
        };

        info!(
            person_id = %request.person.person_id,
            state = ?state,
            "Resuming email provisioning"
        );
        self.run(request, state).await
    }

    async fn run(
        &self,
        request: &ProvisioningRequest,
        initial: SagaState,
    ) -> Result<ProvisionedEmail> {
        let person_id = request.person.person_id;
        let mut attempts_left = self.retry_budget;
        let mut abandoned_addresses = Vec::new();
        let mut state = initial;

        loop {
            state = match state {
                SagaState::Start => {
                    let address = generate_available_address(
                        &request.person.first_name,
                        &request.person.last_name,
                        &request.domain,
                        &*self.identities,
                    )
                    .await
                    .map_err(|err| self.fail_without_row(request, SagaStep::Candidate, err))?;

                    debug!(person_id = %person_id, address = %address, "Candidate generated");
                    SagaState::Candidate { address }
                }

                SagaState::Candidate { address } => {
                    let identity = EmailIdentity::new(
                        person_id,
                        address,
                        request.domain.clone(),
                        request.priority,
                    );
                    let identity = self
                        .identities
                        .save(&identity)
                        .await
                        .map_err(|err| self.fail_without_row(request, SagaStep::DbPending, err))?;
                    self.statuses
                        .append(identity.id, EmailAddressStatus::Pending)
                        .await
                        .map_err(|err| {
                            self.log_failure(request, SagaStep::DbPending, Some(&identity), err)
                        })?;

                    SagaState::DbPending { identity }
                }

                SagaState::DbPending { mut identity } => {
                    let mail_request = MailAccountRequest {
                        username: request.username(&identity),
                        display_name: request.display_name(),
                        first_name: request.person.first_name.clone(),
                        last_name: request.person.last_name.clone(),
                        primary_email: identity.address.clone(),
                    };

                    match self.mail.create_account(&mail_request).await {
                        Ok(account_ref) => {
                            identity.mail_account_ref = Some(account_ref);
                            let identity = match self.identities.save(&identity).await {
                                Ok(saved) => saved,
                                Err(err) => {
                                    return Err(self
                                        .fail(request, SagaStep::MailCreated, &identity, err)
                                        .await)
                                }
                            };
                            SagaState::MailCreated { identity }
                        }
                        Err(err) if err.is_retryable_conflict() => {
                            self.metrics.mail_conflicts.inc();
                            attempts_left -= 1;
                            if let Err(err) = self.abandon(&mut identity).await {
                                return Err(self
                                    .fail(request, SagaStep::DbPending, &identity, err)
                                    .await);
                            }
                            abandoned_addresses.push(identity.address.clone());

                            if attempts_left == 0 {
                                let err = EmailError::EmailCreationFailed {
                                    person_id,
                                    reason: format!(
                                        "mail system rejected {} candidates as existing",
                                        self.retry_budget
                                    ),
                                };
                                return Err(self
                                    .fail(request, SagaStep::DbPending, &identity, err)
                                    .await);
                            }

                            warn!(
                                person_id = %person_id,
                                address = %identity.address,
                                attempts_left,
                                "Primary mail collision, regenerating candidate"
                            );
                            SagaState::Start
                        }
                        Err(err) => {
                            return Err(self.fail(request, SagaStep::DbPending, &identity, err).await)
                        }
                    }
                }

                SagaState::MailCreated { identity } => {
                    if let Err(err) = self.join_groups(request, &identity).await {
                        return Err(self
                            .fail(request, SagaStep::MailCreated, &identity, err)
                            .await);
                    }
                    SagaState::GroupsJoined { identity }
                }

                SagaState::GroupsJoined { mut identity } => {
                    let entry_request = DirectoryEntryRequest {
                        first_name: request.person.first_name.clone(),
                        last_name: request.person.last_name.clone(),
                        uid: request.username(&identity),
                        domain: identity.domain.clone(),
                        primary_mail: identity.address.clone(),
                    };

                    // The mail account stays in place when this fails; no compensation.
                    let entry_ref = match self.directory.create_person_entry(&entry_request).await {
                        Ok(entry_ref) => entry_ref,
                        Err(err) => {
                            return Err(self
                                .fail(request, SagaStep::GroupsJoined, &identity, err)
                                .await)
                        }
                    };

                    identity.directory_ref = Some(entry_ref);
                    let identity = match self.identities.save(&identity).await {
                        Ok(saved) => saved,
                        Err(err) => {
                            return Err(self
                                .fail(request, SagaStep::DirectoryWritten, &identity, err)
                                .await)
                        }
                    };
                    SagaState::DirectoryWritten { identity }
                }

                SagaState::DirectoryWritten { identity } => {
                    self.statuses
                        .append(identity.id, EmailAddressStatus::Active)
                        .await
                        .map_err(|err| {
                            self.log_failure(request, SagaStep::Active, Some(&identity), err)
                        })?;

                    self.metrics.provisioning.with_label_values(&["active"]).inc();
                    info!(
                        person_id = %person_id,
                        address = %identity.address,
                        abandoned = abandoned_addresses.len(),
                        "Email identity active"
                    );

                    return Ok(ProvisionedEmail {
                        identity,
                        abandoned_addresses,
                    });
                }
            };
        }
    }

    /// One group at a time; the mail system does not tolerate concurrent writes to an account.
    async fn join_groups(
        &self,
        request: &ProvisioningRequest,
        identity: &EmailIdentity,
    ) -> Result<()> {
        let account_ref = identity.mail_account_ref.as_deref().ok_or_else(|| {
            EmailError::Internal(format!("identity {} has no mail account", identity.id))
        })?;

        for group_key in &request.group_keys {
            self.mail.add_to_group(account_ref, group_key).await?;
            debug!(
                person_id = %request.person.person_id,
                group_key = %group_key,
                "Joined mail group"
            );
        }

        Ok(())
    }

    /// Orphan the row so the address stays reserved but no longer belongs to the person
    async fn abandon(&self, identity: &mut EmailIdentity) -> Result<()> {
        identity.orphan();
        *identity = self.identities.save(identity).await?;
        self.statuses
            .append(identity.id, EmailAddressStatus::ExistsOnlyInOx)
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        request: &ProvisioningRequest,
        step: SagaStep,
        identity: &EmailIdentity,
        err: EmailError,
    ) -> EmailError {
        if let Err(status_err) = self
            .statuses
            .append(identity.id, EmailAddressStatus::Failed)
            .await
        {
            error!(
                email_identity_id = %identity.id,
                error = %status_err,
                "Could not mark email identity FAILED"
            );
        }
        self.log_failure(request, step, Some(identity), err)
    }

    fn fail_without_row(
        &self,
        request: &ProvisioningRequest,
        step: SagaStep,
        err: EmailError,
    ) -> EmailError {
        self.log_failure(request, step, None, err)
    }

    fn log_failure(
        &self,
        request: &ProvisioningRequest,
        step: SagaStep,
        identity: Option<&EmailIdentity>,
        err: EmailError,
    ) -> EmailError {
        self.metrics.provisioning.with_label_values(&["failed"]).inc();
        error!(
            person_id = %request.person.person_id,
            step = %step,
            address = identity.map(|i| i.address.as_str()).unwrap_or("-"),
            error_kind = err.kind(),
            error = %err,
            "Email provisioning failed"
        );
        err
    }
}
