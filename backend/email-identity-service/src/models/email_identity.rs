use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Lifecycle status matching database email_address_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "email_address_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailAddressStatus {
    /// Row persisted, external steps not (fully) done
    Pending,
    Active,
    Failed,
    /// Abandoned after a naming collision in the mail system; kept to block reuse
    ExistsOnlyInOx,
    ToBeDeleted,
    /// Entitlement lost; external records untouched
    Disabled,
}

impl EmailAddressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailAddressStatus::Pending => "PENDING",
            EmailAddressStatus::Active => "ACTIVE",
            EmailAddressStatus::Failed => "FAILED",
            EmailAddressStatus::ExistsOnlyInOx => "EXISTS_ONLY_IN_OX",
            EmailAddressStatus::ToBeDeleted => "TO_BE_DELETED",
            EmailAddressStatus::Disabled => "DISABLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(EmailAddressStatus::Pending),
            "ACTIVE" => Some(EmailAddressStatus::Active),
            "FAILED" => Some(EmailAddressStatus::Failed),
            "EXISTS_ONLY_IN_OX" => Some(EmailAddressStatus::ExistsOnlyInOx),
            "TO_BE_DELETED" => Some(EmailAddressStatus::ToBeDeleted),
            "DISABLED" => Some(EmailAddressStatus::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmailAddressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated email address, owned (optionally) by a person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EmailIdentity {
    pub id: Uuid,
    /// None once orphaned after an external collision
    pub owner_person_id: Option<Uuid>,
    pub domain: String,
    /// Full address, `local-part@domain`
    pub address: String,
    /// Lower is preferred
    pub priority: i32,
    pub mail_account_ref: Option<String>,
    pub directory_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailIdentity {
    pub fn new(owner_person_id: Uuid, address: String, domain: String, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_person_id: Some(owner_person_id),
            domain,
            address,
            priority,
            mail_account_ref: None,
            directory_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Detach the owner so the row only reserves the address
    pub fn orphan(&mut self) {
        self.owner_person_id = None;
        self.updated_at = Utc::now();
    }

    pub fn local_part(&self) -> &str {
        self.address
            .split_once('@')
            .map(|(local, _)| local)
            .unwrap_or(&self.address)
    }
}

/// Append-only status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StatusRecord {
    pub email_identity_id: Uuid,
    pub status: EmailAddressStatus,
    pub created_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(email_identity_id: Uuid, status: EmailAddressStatus) -> Self {
        Self {
            email_identity_id,
            status,
            created_at: Utc::now(),
        }
    }
}

/// Identity joined with its current status
#[derive(Debug, Clone, PartialEq)]
pub struct EmailIdentityWithStatus {
    pub identity: EmailIdentity,
    pub status: Option<EmailAddressStatus>,
}

impl EmailIdentityWithStatus {
    pub fn is(&self, status: EmailAddressStatus) -> bool {
        self.status == Some(status)
    }
}
