use chrono::{DateTime, Utc};
/// Event Schema Registry for the Kafka topics consumed and produced by the email identity engine
///
/// This library defines versioned event schemas to prevent payload incompatibilities
/// as services evolve. Each envelope carries a required `schema_version` field.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for all events
pub const SCHEMA_VERSION: u32 = 1;

/// Event type names used for routing (Kafka `event_type` header and envelope field)
pub mod event_types {
    pub const PERSON_CREATED: &str = "PersonCreatedEvent";
    pub const PERSON_UPDATED: &str = "PersonUpdatedEvent";
    pub const PERSON_DELETED: &str = "PersonDeletedEvent";
    pub const EMAIL_ADDRESS_GENERATED: &str = "EmailAddressGeneratedEvent";
    pub const EMAIL_ADDRESS_DISABLED: &str = "EmailAddressDisabledEvent";
}

/// Base event envelope for all Kafka messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event ID for idempotency and tracing
    pub event_id: Uuid,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Schema version for compatibility checking
    pub schema_version: u32,
    /// Source service that generated the event
    pub source: String,
    /// Event type used for routing when no Kafka header is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Correlation ID for distributed tracing
    pub correlation_id: Option<Uuid>,
    /// Actual event payload
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(source: impl Into<String>, data: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            event_type: None,
            correlation_id: None,
            data,
        }
    }

    pub fn new_with_type(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        let mut envelope = Self::new(source, data);
        envelope.event_type = Some(event_type.into());
        envelope
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

// ============================================================================
// PERSON EVENTS (consumed)
// ============================================================================

/// A role held by a person at an organisation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: Uuid,
    pub organisation_id: Uuid,
    /// Organisational unit code, used as mail group key
    #[serde(default)]
    pub organisation_code: Option<String>,
}

/// Person state as carried by create/update events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonSnapshot {
    pub person_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role_assignments: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonCreatedEvent {
    pub person: PersonSnapshot,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonUpdatedEvent {
    pub person: PersonSnapshot,
    /// Assignments being removed by this update; excluded from entitlement checks
    #[serde(default)]
    pub removed_assignments: Vec<RoleAssignment>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonDeletedEvent {
    pub person_id: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    pub deleted_at: DateTime<Utc>,
}

// ============================================================================
// EMAIL EVENTS (produced)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddressGeneratedEvent {
    pub person_id: Uuid,
    pub username: Option<String>,
    pub email_identity_id: Uuid,
    pub address: String,
    pub domain: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddressDisabledEvent {
    pub person_id: Uuid,
    pub username: Option<String>,
    pub disabled_at: DateTime<Utc>,
}

/// Events emitted by the email identity engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EmailLifecycleEvent {
    Generated(EmailAddressGeneratedEvent),
    Disabled(EmailAddressDisabledEvent),
}

impl EmailLifecycleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EmailLifecycleEvent::Generated(_) => event_types::EMAIL_ADDRESS_GENERATED,
            EmailLifecycleEvent::Disabled(_) => event_types::EMAIL_ADDRESS_DISABLED,
        }
    }

    pub fn person_id(&self) -> Uuid {
        match self {
            EmailLifecycleEvent::Generated(e) => e.person_id,
            EmailLifecycleEvent::Disabled(e) => e.person_id,
        }
    }
}

// ============================================================================
// Version compatibility helpers
// ============================================================================

pub fn is_compatible(current_version: u32, message_version: u32) -> bool {
    // For now, enforce exact version match
    current_version == message_version
}
