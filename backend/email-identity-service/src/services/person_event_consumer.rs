/// Kafka consumer for person lifecycle events
///
/// Consumes the person events topic and drives the email identity lifecycle:
/// - PersonCreatedEvent / PersonUpdatedEvent -> provision, resume, re-enable or disable
/// - PersonDeletedEvent -> full teardown
///
/// Offsets are committed manually once a message is handled or parked on the DLQ.
use crate::config::KafkaSettings;
use crate::error::{EmailError, Result};
use crate::models::{PersonSnapshot, RoleAssignment};
use crate::services::email_events::{EmailAction, EmailEventHandler};
use crate::services::kafka_events::KafkaEventProducer;
use event_schema::{
    event_types, is_compatible, EventEnvelope, PersonCreatedEvent, PersonDeletedEvent,
    PersonUpdatedEvent, SCHEMA_VERSION,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum PersonEvent {
    Upserted {
        person: PersonSnapshot,
        removed_assignments: Vec<RoleAssignment>,
    },
    Deleted {
        person_id: Uuid,
    },
}

impl PersonEvent {
    pub fn person_id(&self) -> Uuid {
        match self {
            PersonEvent::Upserted { person, .. } => person.person_id,
            PersonEvent::Deleted { person_id } => *person_id,
        }
    }
}

pub struct PersonEventConsumer {
    consumer: StreamConsumer,
    handler: EmailEventHandler,
    dlq: KafkaEventProducer,
    dlq_topic: Option<String>,
    topic: String,
}

impl PersonEventConsumer {
    pub fn new(
        settings: &KafkaSettings,
        handler: EmailEventHandler,
        dlq: KafkaEventProducer,
    ) -> Result<Self> {
        let brokers = settings.brokers.join(",");
        info!(
            "Initializing PersonEventConsumer: brokers={}, group_id={}, topic={}",
            brokers, settings.consumer_group, settings.person_events_topic
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &settings.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                EmailError::Configuration(format!("Failed to create Kafka consumer: {}", e))
            })?;

        consumer
            .subscribe(&[&settings.person_events_topic])
            .map_err(|e| EmailError::Configuration(format!("Failed to subscribe to topic: {}", e)))?;

        info!(
            "Successfully subscribed to Kafka topic: {}",
            settings.person_events_topic
        );

        Ok(Self {
            consumer,
            handler,
            dlq,
            dlq_topic: settings.dlq_topic.clone(),
            topic: settings.person_events_topic.clone(),
        })
    }

    /// Runs forever; spawn it in a background task.
    pub async fn start_consuming(self: Arc<Self>) {
        info!("Starting PersonEventConsumer loop...");

        loop {
            match self.consume_loop().await {
                Ok(_) => {
                    warn!("Kafka consumer loop exited unexpectedly, restarting...");
                }
                Err(e) => {
                    error!("Kafka consumer error: {}, retrying in 5s...", e);
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn consume_loop(&self) -> Result<()> {
        loop {
            let message = self.consumer.recv().await.map_err(|e| {
                error!("Kafka recv error: {}", e);
                EmailError::EventPublish(format!("Kafka recv failed: {}", e))
            })?;

            if self.process(&message).await {
                if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                    warn!(
                        topic = %self.topic,
                        offset = message.offset(),
                        "Failed to commit offset: {}", e
                    );
                }
            }
        }
    }

    /// True when the offset may be committed
    async fn process(&self, message: &BorrowedMessage<'_>) -> bool {
        let Some(payload) = message.payload() else {
            warn!("Received Kafka message with no payload, skipping");
            return true;
        };

        let result = match decode_person_event(header_value(message, "event_type"), payload) {
            Ok(Some(event)) => self.dispatch(event).await,
            Ok(None) => return true,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    topic = %self.topic,
                    partition = message.partition(),
                    offset = message.offset(),
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to handle person event"
                );
                self.park(message, payload).await
            }
        }
    }

    async fn dispatch(&self, event: PersonEvent) -> Result<()> {
        let person_id = event.person_id();
        let action = match event {
            PersonEvent::Upserted {
                person,
                removed_assignments,
            } => {
                self.handler
                    .handle_person_upserted(&person, &removed_assignments)
                    .await?
            }
            PersonEvent::Deleted { person_id } => {
                self.handler.handle_person_deleted(person_id).await?
            }
        };

        match &action {
            EmailAction::AlreadyActive(_) => debug!(person_id = %person_id, "No email change"),
            other => info!(person_id = %person_id, action = ?other, "Person event handled"),
        }
        Ok(())
    }

    /// Forward a failed message to the DLQ. Without a DLQ the message is dropped after logging.
    async fn park(&self, message: &BorrowedMessage<'_>, payload: &[u8]) -> bool {
        let Some(dlq_topic) = self.dlq_topic.as_deref() else {
            warn!("No DLQ topic configured, dropping failed person event");
            return true;
        };

        let key = message
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .unwrap_or_default();

        match self.dlq.publish_raw_to_topic(dlq_topic, key, payload).await {
            Ok(()) => {
                warn!(dlq_topic = %dlq_topic, offset = message.offset(), "Person event moved to DLQ");
                true
            }
            Err(e) => {
                // Leave the offset uncommitted so the message is seen again
                error!(dlq_topic = %dlq_topic, error = %e, "Failed to publish to DLQ");
                false
            }
        }
    }
}

/// Route a raw message by its event type. Unknown types yield `None`.
///
/// The `event_type` header wins over the envelope field; payloads may be enveloped or bare.
pub fn decode_person_event(
    header_event_type: Option<&str>,
    payload: &[u8],
) -> Result<Option<PersonEvent>> {
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
        EmailError::Internal(format!("Invalid JSON in Kafka message: {}", e))
    })?;

    let event_type = header_event_type
        .map(str::to_string)
        .or_else(|| {
            value
                .get("event_type")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

    let Some(event_type) = event_type else {
        debug!("Person event without event_type, skipping");
        return Ok(None);
    };

    let event = match event_type.as_str() {
        event_types::PERSON_CREATED | "person.created" => {
            let event = parse_enveloped_or_direct::<PersonCreatedEvent>(payload)?;
            PersonEvent::Upserted {
                person: event.person,
                removed_assignments: Vec::new(),
            }
        }
        event_types::PERSON_UPDATED | "person.updated" => {
            let event = parse_enveloped_or_direct::<PersonUpdatedEvent>(payload)?;
            PersonEvent::Upserted {
                person: event.person,
                removed_assignments: event.removed_assignments,
            }
        }
        event_types::PERSON_DELETED | "person.deleted" => {
            let event = parse_enveloped_or_direct::<PersonDeletedEvent>(payload)?;
            PersonEvent::Deleted {
                person_id: event.person_id,
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn parse_enveloped_or_direct<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    if let Ok(envelope) = serde_json::from_slice::<EventEnvelope<T>>(payload) {
        if !is_compatible(SCHEMA_VERSION, envelope.schema_version) {
            return Err(EmailError::Internal(format!(
                "Unsupported person event schema version {} (expected {})",
                envelope.schema_version, SCHEMA_VERSION
            )));
        }
        return Ok(envelope.data);
    }
    serde_json::from_slice::<T>(payload).map_err(|e| {
        EmailError::Internal(format!("Failed to deserialize person event payload: {}", e))
    })
}

fn header_value<'a>(message: &'a BorrowedMessage<'a>, key: &str) -> Option<&'a str> {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == key)
                .and_then(|header| header.value)
        })
        .and_then(|value| std::str::from_utf8(value).ok())
}
