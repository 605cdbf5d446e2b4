use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EmailError>;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("No email domain configured for organisation {0}")]
    EmailDomainNotFound(Uuid),

    #[error("Email creation failed for person {person_id}: {reason}")]
    EmailCreationFailed { person_id: Uuid, reason: String },

    #[error("Invalid attribute length: {0}")]
    InvalidAttributeLength(String),

    #[error("Invalid character set: {0}")]
    InvalidCharacterSet(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Email address generation attempts exceeded for {0}")]
    AddressGenerationAttemptsExceeded(String),

    /// The mail system already has an account with this primary mail
    #[error("Primary mail already exists in mail system: {0}")]
    MailAccountConflict(String),

    #[error("Mail system error: {0}")]
    MailAccount(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Event publish error: {0}")]
    EventPublish(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmailError {
    /// Only the primary-mail conflict is recoverable by regenerating the address.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, EmailError::MailAccountConflict(_))
    }

    /// Validation failures of the person's name; redelivery will not help.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EmailError::InvalidAttributeLength(_)
                | EmailError::InvalidCharacterSet(_)
                | EmailError::InvalidName(_)
        )
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EmailError::EmailDomainNotFound(_) => "email_domain_not_found",
            EmailError::EmailCreationFailed { .. } => "email_creation_failed",
            EmailError::InvalidAttributeLength(_) => "invalid_attribute_length",
            EmailError::InvalidCharacterSet(_) => "invalid_character_set",
            EmailError::InvalidName(_) => "invalid_name",
            EmailError::AddressGenerationAttemptsExceeded(_) => "generation_attempts_exceeded",
            EmailError::MailAccountConflict(_) => "mail_account_conflict",
            EmailError::MailAccount(_) => "mail_account",
            EmailError::Directory(_) => "directory",
            EmailError::Database(_) => "database",
            EmailError::EventPublish(_) => "event_publish",
            EmailError::Configuration(_) => "configuration",
            EmailError::Internal(_) => "internal",
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for EmailError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        EmailError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for EmailError {
    fn from(err: serde_json::Error) -> Self {
        EmailError::Internal(format!("Serialization error: {}", err))
    }
}

impl From<anyhow::Error> for EmailError {
    fn from(err: anyhow::Error) -> Self {
        EmailError::Internal(err.to_string())
    }
}
