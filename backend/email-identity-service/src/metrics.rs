use prometheus::{IntCounter, IntCounterVec, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct EmailMetrics {
    /// Provisioning sagas by terminal outcome (`active`, `failed`)
    pub provisioning: IntCounterVec,
    pub mail_conflicts: IntCounter,
    /// Teardown rows by outcome (`removed`, `retained`)
    pub teardown: IntCounterVec,
    pub disabled: IntCounter,
}

impl EmailMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let provisioning = IntCounterVec::new(
            Opts::new(
                "email_provisioning_total",
                "Email provisioning sagas by terminal outcome",
            )
            .const_label("service", service.to_string()),
            &["outcome"],
        )
        .expect("valid metric opts for email_provisioning_total");

        let mail_conflicts = IntCounter::with_opts(
            Opts::new(
                "email_mail_account_conflicts_total",
                "Primary mail collisions reported by the mail system",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for email_mail_account_conflicts_total");

        let teardown = IntCounterVec::new(
            Opts::new(
                "email_teardown_total",
                "Email identities processed by teardown, by outcome",
            )
            .const_label("service", service.to_string()),
            &["outcome"],
        )
        .expect("valid metric opts for email_teardown_total");

        let disabled = IntCounter::with_opts(
            Opts::new(
                "email_disabled_total",
                "Email identities disabled after entitlement loss",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for email_disabled_total");

        for metric in [
            Box::new(provisioning.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(mail_conflicts.clone()),
            Box::new(teardown.clone()),
            Box::new(disabled.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register email metric: {}", e);
            }
        }

        Self {
            provisioning,
            mail_conflicts,
            teardown,
            disabled,
        }
    }
}
