//! Adapters wiring the concrete gateways into the orchestrator's traits

use crate::service::{ContentStore, TipChain};
use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use ethereum::{ChainGateway, TipSubmission};
use std::time::Duration;
use storage::ContentClient;

#[async_trait]
impl TipChain for ChainGateway {
    fn resolve_token(&self, symbol: &str) -> Result<Address> {
        ChainGateway::resolve_token(self, symbol)
    }

    async fn submit_tip(&self, tip: &TipSubmission) -> Result<String> {
        ChainGateway::submit_tip(self, tip).await
    }

    async fn wait_for_confirmation(&self, tx_hash: &str, timeout: Duration) -> Result<()> {
        ChainGateway::wait_for_confirmation(self, tx_hash, timeout).await
    }

    async fn confirmed_tip_count(&self, sender: Address) -> Result<u64> {
        ChainGateway::confirmed_tip_count(self, sender).await
    }
}

#[async_trait]
impl ContentStore for ContentClient {
    async fn put_message(&self, message: &str) -> Result<String> {
        ContentClient::put_message(self, message).await
    }
}
