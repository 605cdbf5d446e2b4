/// Service layer for email-identity-service
///
/// Provides the provisioning logic and its integrations:
/// - Entitlement resolution (role -> service provider category)
/// - Provisioning and teardown sagas
/// - Mail system and directory HTTP clients
/// - Kafka event producer (email lifecycle events) and person event consumer
pub mod directory;
pub mod email_events;
pub mod entitlement;
pub mod kafka_events;
pub mod mail_account;
pub mod person_event_consumer;
pub mod provisioning;
pub mod teardown;

pub use directory::{DirectoryClient, DirectoryEntryRequest, HttpDirectoryClient};
pub use email_events::{EmailAction, EmailEventHandler};
pub use entitlement::EntitlementResolver;
pub use kafka_events::{EventPublisher, KafkaEventProducer, SERVICE_NAME};
pub use mail_account::{DeleteOutcome, HttpMailAccountClient, MailAccountClient, MailAccountRequest};
pub use person_event_consumer::{decode_person_event, PersonEvent, PersonEventConsumer};
pub use provisioning::{ProvisionedEmail, ProvisioningRequest, ProvisioningSaga, SagaStep};
pub use teardown::{spawn_teardown_retry_worker, DeletionOutcome, DisableOutcome, TeardownSaga};
