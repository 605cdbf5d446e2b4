/// Email Identity Service Library
///
/// Provisions and retires institutional email identities for persons.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: Database repositories (email identities, status history, entitlement sources)
/// - `domain`: Address candidate generation
/// - `error`: Error types
/// - `metrics`: Prometheus counters
/// - `models`: Data models
/// - `services`: Sagas, external clients, Kafka integration
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use error::{EmailError, Result};
