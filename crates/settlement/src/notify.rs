//! Best-effort webhook notifier for confirmed tips
//!
//! Downstream consumers (badge recompute, cache invalidation, chat
//! notifications) receive a POST per confirmed tip. Delivery is
//! fire-and-forget; a failed delivery is logged and dropped.

use crate::service::ConfirmationHook;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use db::TipRecord;
use serde_json::json;
use tracing::debug;

pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ConfirmationHook for WebhookNotifier {
    async fn on_confirmed(&self, record: &TipRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "event": "tip_confirmed",
                "tipId": record.id,
                "senderId": record.sender_id,
                "recipientId": record.recipient_id,
                "amount": record.amount,
                "token": record.token,
                "transactionHash": record.transaction_hash,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Webhook returned {}", status));
        }
        debug!("Notified webhook of confirmed tip {}", record.id);
        Ok(())
    }
}
