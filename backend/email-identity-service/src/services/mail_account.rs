/// Mail-groupware account client
///
/// Provisions mailboxes for generated addresses. Only the logical operations are modelled
/// here; the HTTP implementation talks to the mail system's provisioning gateway.
///
/// ## API Reference
///
/// - Create account: POST /accounts (409 when the primary mail is taken)
/// - Add to group: PUT /groups/{groupKey}/members/{accountId}
/// - Delete account: DELETE /accounts/{accountId} (404 tolerated)
use crate::config::MailSystemSettings;
use crate::error::{EmailError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Account data sent on creation
#[derive(Debug, Clone, PartialEq)]
pub struct MailAccountRequest {
    pub username: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub primary_email: String,
}

/// Outcome of an external deletion; `NotFound` counts as success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[async_trait]
pub trait MailAccountClient: Send + Sync {
    /// Returns the account reference; `EmailError::MailAccountConflict` when the primary mail exists
    async fn create_account(&self, request: &MailAccountRequest) -> Result<String>;

    async fn add_to_group(&self, account_ref: &str, group_key: &str) -> Result<()>;

    async fn delete_account(&self, account_ref: &str) -> Result<DeleteOutcome>;
}

#[derive(Clone)]
pub struct HttpMailAccountClient {
    config: MailSystemSettings,
    http: Client,
}

impl HttpMailAccountClient {
    pub fn new(config: MailSystemSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EmailError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        info!(api_url = %config.api_url, "Mail system client initialized");

        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl MailAccountClient for HttpMailAccountClient {
    async fn create_account(&self, request: &MailAccountRequest) -> Result<String> {
        let body = CreateAccountRequest {
            username: request.username.clone(),
            display_name: request.display_name.clone(),
            given_name: request.first_name.clone(),
            sur_name: request.last_name.clone(),
            primary_email: request.primary_email.clone(),
            context_id: self.config.context_id.clone(),
        };

        debug!(
            username = %request.username,
            primary_email = %request.primary_email,
            "Creating mail account"
        );

        let response = self
            .http
            .post(self.url("/accounts"))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::MailAccount(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            warn!(
                primary_email = %request.primary_email,
                "Primary mail already exists in mail system"
            );
            return Err(EmailError::MailAccountConflict(request.primary_email.clone()));
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            error!(
                status = %status,
                body = %body,
                primary_email = %request.primary_email,
                "Failed to create mail account"
            );
            return Err(EmailError::MailAccount(format!(
                "Account creation failed ({}): {}",
                status, body
            )));
        }

        let created: CreateAccountResponse = response.json().await.map_err(|e| {
            EmailError::MailAccount(format!("Failed to parse create response: {}", e))
        })?;

        info!(
            account_ref = %created.id,
            primary_email = %request.primary_email,
            "Mail account created"
        );

        Ok(created.id)
    }

    async fn add_to_group(&self, account_ref: &str, group_key: &str) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!(
                "/groups/{}/members/{}",
                urlencoding::encode(group_key),
                urlencoding::encode(account_ref)
            )))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| EmailError::MailAccount(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::MailAccount(format!(
                "Adding account {} to group {} failed ({}): {}",
                account_ref, group_key, status, body
            )));
        }

        debug!(account_ref = %account_ref, group_key = %group_key, "Account added to group");
        Ok(())
    }

    async fn delete_account(&self, account_ref: &str) -> Result<DeleteOutcome> {
        let response = self
            .http
            .delete(self.url(&format!("/accounts/{}", urlencoding::encode(account_ref))))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| EmailError::MailAccount(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(account_ref = %account_ref, "Mail account already gone");
            return Ok(DeleteOutcome::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::MailAccount(format!(
                "Account deletion failed ({}): {}",
                status, body
            )));
        }

        Ok(DeleteOutcome::Deleted)
    }
}

// ===== Mail system API Request/Response Types =====

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountRequest {
    username: String,
    display_name: String,
    given_name: String,
    sur_name: String,
    primary_email: String,
    context_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateAccountResponse {
    id: String,
}
