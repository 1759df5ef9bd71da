//! Identity resolution client
//!
//! Resolves an external user id to a platform user with a wallet address,
//! auto-provisioning the record when the user is not yet known.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn resolve_or_provision(&self, external_id: &str) -> Result<UserProfile>;
}

pub struct HttpIdentityClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityApi for HttpIdentityClient {
    async fn resolve_or_provision(&self, external_id: &str) -> Result<UserProfile> {
        let url = format!("{}/users/{}", self.base_url, external_id);
        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            return Ok(response.json::<UserProfile>().await?);
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow!(
                "Identity lookup for {} failed: {}",
                external_id,
                response.status()
            ));
        }

        // Unknown user: provision a record
        let response = self
            .client
            .post(format!("{}/users", self.base_url))
            .json(&json!({ "externalId": external_id }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "Failed to provision user {}: {}",
                external_id,
                status
            ));
        }

        let profile = response.json::<UserProfile>().await?;
        info!(
            "Provisioned user {} with wallet {}",
            external_id, profile.wallet_address
        );
        Ok(profile)
    }
}
