/// Database operations for the email identity service
pub mod email_identities;
pub mod organisations;
pub mod service_providers;
pub mod status;

// Re-export commonly used types
pub use email_identities::{EmailIdentityRepository, PgEmailIdentityRepository};
pub use organisations::{EmailDomainSource, PgEmailDomainSource};
pub use service_providers::{EntitlementSource, PgEntitlementSource};
pub use status::{PgStatusRepository, StatusRepository, StatusStore};
