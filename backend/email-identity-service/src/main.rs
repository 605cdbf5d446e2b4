/// Email Identity Service Main Entry Point
///
/// Starts:
/// - PostgreSQL connection pool (+ migrations)
/// - Kafka event producer (email lifecycle events, DLQ)
/// - Person event consumer (background task)
/// - Teardown retry worker (background task)
use anyhow::{Context, Result};
use email_identity_service::{
    config::Settings,
    db::{
        EmailDomainSource, EmailIdentityRepository, EntitlementSource, PgEmailDomainSource,
        PgEmailIdentityRepository, PgEntitlementSource, PgStatusRepository, StatusStore,
    },
    metrics::EmailMetrics,
    services::{
        spawn_teardown_retry_worker, DirectoryClient, EmailEventHandler, EntitlementResolver,
        EventPublisher, HttpDirectoryClient, HttpMailAccountClient, KafkaEventProducer,
        MailAccountClient, PersonEventConsumer, ProvisioningSaga, TeardownSaga, SERVICE_NAME,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "email_identity_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Email Identity Service");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    // Run database migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let brokers = settings.kafka.brokers.join(",");
    let producer = KafkaEventProducer::new(
        &brokers,
        &settings.kafka.email_events_topic,
        settings.kafka.producer_timeout(),
    )
    .context("Failed to initialize Kafka producer")?;
    info!("Kafka producer initialized");

    let mail: Arc<dyn MailAccountClient> = Arc::new(
        HttpMailAccountClient::new(settings.mail_system.clone())
            .context("Failed to initialize mail system client")?,
    );
    let directory: Arc<dyn DirectoryClient> = Arc::new(
        HttpDirectoryClient::new(settings.directory.clone())
            .context("Failed to initialize directory client")?,
    );

    let identities: Arc<dyn EmailIdentityRepository> =
        Arc::new(PgEmailIdentityRepository::new(db_pool.clone()));
    let statuses = StatusStore::new(Arc::new(PgStatusRepository::new(db_pool.clone())));
    let entitlements: Arc<dyn EntitlementSource> =
        Arc::new(PgEntitlementSource::new(db_pool.clone()));
    let domains: Arc<dyn EmailDomainSource> = Arc::new(PgEmailDomainSource::new(db_pool.clone()));
    let publisher: Arc<dyn EventPublisher> = Arc::new(producer.clone());
    let metrics = EmailMetrics::new(SERVICE_NAME);

    let provisioning = ProvisioningSaga::new(
        identities.clone(),
        statuses.clone(),
        mail.clone(),
        directory.clone(),
        settings.provisioning.retry_budget,
        metrics.clone(),
    );
    let teardown = TeardownSaga::new(
        identities.clone(),
        statuses.clone(),
        mail,
        directory,
        publisher.clone(),
        metrics,
    );
    let handler = EmailEventHandler::new(
        EntitlementResolver::new(entitlements, settings.provisioning.email_category.clone()),
        domains,
        identities,
        statuses,
        provisioning,
        teardown.clone(),
        publisher,
    );

    // Spawn person event consumer (background task)
    let consumer = Arc::new(
        PersonEventConsumer::new(&settings.kafka, handler, producer)
            .context("Failed to initialize person event consumer")?,
    );
    let consumer_handle = tokio::spawn(consumer.start_consuming());

    // Spawn teardown retry worker (background task)
    let retry_handle = spawn_teardown_retry_worker(
        teardown,
        settings.provisioning.teardown_retry_interval(),
        settings.provisioning.teardown_retry_batch_size,
    );

    shutdown_signal().await;

    consumer_handle.abort();
    retry_handle.abort();
    db_pool.close().await;

    info!("Email identity service shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
