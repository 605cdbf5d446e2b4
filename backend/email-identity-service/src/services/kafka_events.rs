/// Kafka event producer for the email identity service
use crate::error::{EmailError, Result};
use async_trait::async_trait;
use event_schema::{EmailLifecycleEvent, EventEnvelope};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SERVICE_NAME: &str = "email-identity-service";

/// Outbound event bus
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EmailLifecycleEvent) -> Result<()>;
}

/// Kafka event producer service
#[derive(Clone)]
pub struct KafkaEventProducer {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaEventProducer {
    /// Create a new Kafka event producer
    ///
    /// ## Arguments
    ///
    /// * `brokers` - Comma-separated list of Kafka brokers
    /// * `topic` - Topic for email lifecycle events
    pub fn new(brokers: &str, topic: &str, send_timeout: Duration) -> Result<Self> {
        let producer = rdkafka::config::ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", SERVICE_NAME)
            .create::<FutureProducer>()
            .map_err(|e| {
                EmailError::Configuration(format!("Failed to create Kafka producer: {}", e))
            })?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            send_timeout,
        })
    }

    /// Publish raw JSON payload to an arbitrary topic (e.g., DLQ)
    pub async fn publish_raw_to_topic(
        &self,
        topic: &str,
        partition_key: &str,
        payload: &[u8],
    ) -> Result<()> {
        let record = FutureRecord::to(topic).key(partition_key).payload(payload);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(error, _)| {
                warn!("Failed to send Kafka event to topic {}: {:?}", topic, error);
                EmailError::EventPublish(format!(
                    "Failed to publish event to Kafka topic {}: {}",
                    topic, error
                ))
            })?;

        Ok(())
    }

    async fn publish_envelope<T: serde::Serialize>(
        &self,
        envelope: &EventEnvelope<T>,
        partition_key_id: Uuid,
    ) -> Result<()> {
        let payload = serde_json::to_string(envelope)
            .map_err(|e| EmailError::EventPublish(format!("Failed to serialize envelope: {}", e)))?;

        let partition_key = partition_key_id.to_string();
        let correlation_id = envelope
            .correlation_id
            .unwrap_or(envelope.event_id)
            .to_string();
        let event_type = envelope.event_type.as_deref().unwrap_or_default();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(event_type),
            })
            .insert(Header {
                key: "x-correlation-id",
                value: Some(correlation_id.as_str()),
            });

        let record = FutureRecord::to(&self.topic)
            .key(&partition_key)
            .payload(&payload)
            .headers(headers);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(error, _)| {
                warn!("Failed to send Kafka event: {:?}", error);
                EmailError::EventPublish(format!("Failed to publish event to Kafka: {}", error))
            })?;

        debug!(event_type = %event_type, person_id = %partition_key, "Event published");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaEventProducer {
    async fn publish(&self, event: EmailLifecycleEvent) -> Result<()> {
        let person_id = event.person_id();
        let envelope = EventEnvelope::new_with_type(SERVICE_NAME, event.event_type(), event)
            .with_correlation_id(Uuid::new_v4());

        self.publish_envelope(&envelope, person_id).await
    }
}
