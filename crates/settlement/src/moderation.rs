//! Message moderation client
//!
//! `block` is fatal before any persistence; `warn` is informational only.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use breaker::CircuitBreaker;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Allow,
    Warn,
    Block,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationVerdict {
    pub action: ModerationAction,
    #[serde(default)]
    pub toxicity_score: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[async_trait]
pub trait ModerationApi: Send + Sync {
    async fn check(&self, message: &str) -> Result<ModerationVerdict>;
}

pub struct HttpModerationClient {
    base_url: String,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpModerationClient {
    pub fn new(base_url: impl Into<String>, breaker: CircuitBreaker) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            breaker,
        }
    }
}

#[async_trait]
impl ModerationApi for HttpModerationClient {
    async fn check(&self, message: &str) -> Result<ModerationVerdict> {
        let url = format!("{}/check", self.base_url);
        self.breaker
            .execute(|| async {
                let response = self
                    .client
                    .post(&url)
                    .json(&json!({ "message": message }))
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(anyhow!("Moderation check failed: {}", status));
                }
                Ok(response.json::<ModerationVerdict>().await?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_deserializes_from_wire_shape() {
        let verdict: ModerationVerdict = serde_json::from_str(
            r#"{"action":"block","toxicity_score":0.97,"reason":"harassment"}"#,
        )
        .unwrap();
        assert_eq!(verdict.action, ModerationAction::Block);
        assert_eq!(verdict.reason.as_deref(), Some("harassment"));
    }

    #[test]
    fn verdict_tolerates_missing_optional_fields() {
        let verdict: ModerationVerdict = serde_json::from_str(r#"{"action":"allow"}"#).unwrap();
        assert_eq!(verdict.action, ModerationAction::Allow);
        assert_eq!(verdict.toxicity_score, 0.0);
        assert!(verdict.reason.is_none());
    }
}
