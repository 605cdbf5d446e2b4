/// Data models for email identities and their lifecycle
pub mod email_identity;

pub use email_identity::{EmailAddressStatus, EmailIdentity, EmailIdentityWithStatus, StatusRecord};
pub use event_schema::{PersonSnapshot, RoleAssignment};
