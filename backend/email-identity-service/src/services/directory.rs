/// Directory service client
///
/// Maintains the person entry carrying the primary-mail attribute.
use crate::config::DirectorySettings;
use crate::error::{EmailError, Result};
use crate::services::mail_account::DeleteOutcome;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Person entry data
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntryRequest {
    pub first_name: String,
    pub last_name: String,
    pub uid: String,
    pub domain: String,
    pub primary_mail: String,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Returns the entry reference
    async fn create_person_entry(&self, request: &DirectoryEntryRequest) -> Result<String>;

    async fn delete_person_entry(&self, external_id: &str, domain: &str) -> Result<DeleteOutcome>;
}

#[derive(Clone)]
pub struct HttpDirectoryClient {
    config: DirectorySettings,
    http: Client,
}

impl HttpDirectoryClient {
    pub fn new(config: DirectorySettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EmailError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        info!(api_url = %config.api_url, "Directory client initialized");

        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn create_person_entry(&self, request: &DirectoryEntryRequest) -> Result<String> {
        let body = CreateEntryRequest {
            given_name: request.first_name.clone(),
            surname: request.last_name.clone(),
            uid: request.uid.clone(),
            mail_primary_address: request.primary_mail.clone(),
        };

        let response = self
            .http
            .post(self.url(&format!(
                "/domains/{}/persons",
                urlencoding::encode(&request.domain)
            )))
            .bearer_auth(&self.config.service_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::Directory(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            error!(
                status = %status,
                body = %body,
                uid = %request.uid,
                "Failed to create directory entry"
            );
            return Err(EmailError::Directory(format!(
                "Entry creation failed ({}): {}",
                status, body
            )));
        }

        let created: CreateEntryResponse = response.json().await.map_err(|e| {
            EmailError::Directory(format!("Failed to parse create response: {}", e))
        })?;

        info!(
            entry_ref = %created.entry_id,
            uid = %request.uid,
            primary_mail = %request.primary_mail,
            "Directory entry created"
        );

        Ok(created.entry_id)
    }

    async fn delete_person_entry(&self, external_id: &str, domain: &str) -> Result<DeleteOutcome> {
        let response = self
            .http
            .delete(self.url(&format!(
                "/domains/{}/persons/{}",
                urlencoding::encode(domain),
                urlencoding::encode(external_id)
            )))
            .bearer_auth(&self.config.service_token)
            .send()
            .await
            .map_err(|e| EmailError::Directory(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(external_id = %external_id, domain = %domain, "Directory entry already gone");
            return Ok(DeleteOutcome::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Directory(format!(
                "Entry deletion failed ({}): {}",
                status, body
            )));
        }

        Ok(DeleteOutcome::Deleted)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntryRequest {
    given_name: String,
    surname: String,
    uid: String,
    mail_primary_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntryResponse {
    entry_id: String,
}
