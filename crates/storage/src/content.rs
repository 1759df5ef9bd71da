//! Content store gateway
//!
//! Uploads tip messages to a content-addressed network through its publisher
//! endpoint and fetches them back through the aggregator. Payloads are
//! sealed with the envelope cipher when an encryption key is configured;
//! without one, uploads proceed in plaintext with a warning (an explicit
//! degrade policy rather than a silent failure).

use crate::cipher::{EnvelopeCipher, is_envelope};
use anyhow::{Result, anyhow};
use breaker::CircuitBreaker;
use serde_json::Value;
use std::env;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ContentStoreConfig {
    /// Publisher endpoint for uploads
    pub publisher_url: String,
    /// Aggregator endpoint for reads
    pub reader_url: String,
    /// Hex-encoded 32-byte message encryption key, optional
    pub encryption_key: Option<String>,
}

impl ContentStoreConfig {
    pub fn from_env() -> Result<Self> {
        let publisher_url = env::var("CONTENT_PUBLISHER_URL")
            .map_err(|_| anyhow!("CONTENT_PUBLISHER_URL environment variable is required"))?;
        let reader_url = env::var("CONTENT_READER_URL")
            .map_err(|_| anyhow!("CONTENT_READER_URL environment variable is required"))?;
        let encryption_key = env::var("MESSAGE_ENCRYPTION_KEY").ok();
        Ok(Self {
            publisher_url,
            reader_url,
            encryption_key,
        })
    }
}

pub struct ContentClient {
    config: ContentStoreConfig,
    client: reqwest::Client,
    cipher: Option<EnvelopeCipher>,
    breaker: CircuitBreaker,
}

impl ContentClient {
    pub fn new(config: ContentStoreConfig, breaker: CircuitBreaker) -> Result<Self> {
        let cipher = match &config.encryption_key {
            Some(key) => Some(EnvelopeCipher::from_hex(key)?),
            None => {
                warn!(
                    "No message encryption key configured, tip messages will be uploaded in plaintext"
                );
                None
            }
        };
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            cipher,
            breaker,
        })
    }

    /// Upload a message, returning its content identifier.
    ///
    /// A single attempt through the breaker; the settlement job's retry
    /// budget owns retries.
    pub async fn put_message(&self, message: &str) -> Result<String> {
        let payload = match &self.cipher {
            Some(cipher) => cipher.seal(message)?,
            None => message.to_string(),
        };

        let url = format!("{}/v1/blobs", self.config.publisher_url);
        self.breaker
            .execute(|| async {
                let response = self.client.put(&url).body(payload.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(anyhow!(
                        "Content store upload failed: {} {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown error")
                    ));
                }

                let info: Value = response.json().await?;
                let content_id = info
                    .pointer("/newlyCreated/blobObject/blobId")
                    .or_else(|| info.pointer("/alreadyCertified/blobId"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| anyhow!("No content id in store response"))?;

                debug!("Uploaded message as {}", content_id);
                Ok(content_id)
            })
            .await
    }

    /// Fetch a message by content identifier, decrypting when the payload is
    /// a sealed envelope.
    pub async fn get_message(&self, content_id: &str) -> Result<String> {
        let url = format!("{}/v1/blobs/{}", self.config.reader_url, content_id);
        let payload = self
            .breaker
            .execute(|| async {
                let response = self.client.get(&url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(anyhow!("Content store fetch failed: {}", status));
                }
                Ok(response.text().await?)
            })
            .await?;

        if is_envelope(&payload) {
            match &self.cipher {
                Some(cipher) => cipher.open(&payload),
                None => Err(anyhow!(
                    "Retrieved an encrypted payload but no encryption key is configured"
                )),
            }
        } else {
            Ok(payload)
        }
    }

    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }
}
