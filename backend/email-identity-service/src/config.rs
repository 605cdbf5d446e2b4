//! Configuration management for the Email Identity Service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! # Example
//!
//! ```no_run
//! use email_identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Retry budget: {}", settings.provisioning.retry_budget);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub kafka: KafkaSettings,
    pub mail_system: MailSystemSettings,
    pub directory: DirectorySettings,
    pub provisioning: ProvisioningSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            kafka: KafkaSettings::from_env()?,
            mail_system: MailSystemSettings::from_env()?,
            directory: DirectorySettings::from_env()?,
            provisioning: ProvisioningSettings::from_env()?,
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(default),
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 20)?,
            min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
            acquire_timeout: parse_or("DATABASE_ACQUIRE_TIMEOUT", 10)?,
        })
    }
}

/// Kafka event streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub consumer_group: String,
    /// Person lifecycle events (consumed)
    pub person_events_topic: String,
    /// Email lifecycle events (produced)
    pub email_events_topic: String,
    pub dlq_topic: Option<String>,
    pub producer_timeout: u64,
}

impl KafkaSettings {
    fn from_env() -> Result<Self> {
        let brokers_str = env::var("KAFKA_BROKERS").context("KAFKA_BROKERS must be set")?;
        let brokers = brokers_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let dlq_topic = env::var("KAFKA_DLQ_TOPIC")
            .map(|value| value.trim().to_owned())
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| Some("email-identity.person-events.dlq".to_string()));

        Ok(Self {
            brokers,
            consumer_group: env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "email-identity-service".to_string()),
            person_events_topic: env::var("KAFKA_PERSON_EVENTS_TOPIC")
                .unwrap_or_else(|_| "person.events".to_string()),
            email_events_topic: env::var("KAFKA_EMAIL_EVENTS_TOPIC")
                .unwrap_or_else(|_| "email.events".to_string()),
            dlq_topic,
            producer_timeout: parse_or("KAFKA_PRODUCER_TIMEOUT", 30)?,
        })
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_secs(self.producer_timeout)
    }
}

/// Mail-groupware provisioning gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSystemSettings {
    pub api_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Mail system context the accounts are created in
    pub context_id: String,
    pub request_timeout_secs: u64,
}

impl MailSystemSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: env::var("MAIL_SYSTEM_API_URL").context("MAIL_SYSTEM_API_URL must be set")?,
            username: env::var("MAIL_SYSTEM_USERNAME")
                .context("MAIL_SYSTEM_USERNAME must be set")?,
            password: env::var("MAIL_SYSTEM_PASSWORD")
                .context("MAIL_SYSTEM_PASSWORD must be set")?,
            context_id: env::var("MAIL_SYSTEM_CONTEXT_ID").unwrap_or_else(|_| "10".to_string()),
            request_timeout_secs: parse_or("MAIL_SYSTEM_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Directory service gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub service_token: String,
    pub request_timeout_secs: u64,
}

impl DirectorySettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: env::var("DIRECTORY_API_URL").context("DIRECTORY_API_URL must be set")?,
            service_token: env::var("DIRECTORY_SERVICE_TOKEN")
                .context("DIRECTORY_SERVICE_TOKEN must be set")?,
            request_timeout_secs: parse_or("DIRECTORY_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Saga tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    /// Mail account creation attempts per saga (collisions included)
    pub retry_budget: u32,
    /// Service-provider category granting an email identity
    pub email_category: String,
    pub teardown_retry_interval_secs: u64,
    pub teardown_retry_batch_size: i64,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            email_category: "EMAIL".to_string(),
            teardown_retry_interval_secs: 300,
            teardown_retry_batch_size: 100,
        }
    }
}

impl ProvisioningSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            retry_budget: parse_or("EMAIL_PROVISIONING_RETRY_BUDGET", defaults.retry_budget)?,
            email_category: env::var("EMAIL_SERVICE_PROVIDER_CATEGORY")
                .unwrap_or(defaults.email_category),
            teardown_retry_interval_secs: parse_or(
                "EMAIL_TEARDOWN_RETRY_INTERVAL_SECS",
                defaults.teardown_retry_interval_secs,
            )?,
            teardown_retry_batch_size: parse_or(
                "EMAIL_TEARDOWN_RETRY_BATCH_SIZE",
                defaults.teardown_retry_batch_size,
            )?,
        };

        if settings.retry_budget == 0 {
            bail!("EMAIL_PROVISIONING_RETRY_BUDGET must be at least 1");
        }

        Ok(settings)
    }

    pub fn teardown_retry_interval(&self) -> Duration {
        Duration::from_secs(self.teardown_retry_interval_secs)
    }
}
