//! Chain gateway
//!
//! Submits relayed tip transactions with the funded relayer key and keeps a
//! standing subscription on the contract's `TipSent` log. Submission is
//! decoupled from confirmation: `submit_tip` returns as soon as the node
//! accepts the transaction, and confirmation is observed either through
//! `wait_for_confirmation` or the event subscription.

use crate::contracts::ITipRelay;
use crate::digest::{content_hash, tip_digest};
use crate::keypair::{parse_address, parse_signer};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Filter;
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use anyhow::{Result, anyhow};
use breaker::CircuitBreaker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for the chain gateway
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub relayer_key: String,
    pub tip_contract: Address,
    /// Token symbol -> ERC-20 contract address
    pub token_registry: HashMap<String, Address>,
}

impl ChainConfig {
    /// Read the gateway configuration from the environment.
    ///
    /// `TOKEN_REGISTRY` is a comma-separated `SYMBOL=0xaddress` list.
    pub fn from_env() -> Result<Self> {
        let rpc_url = env::var("CHAIN_RPC_URL")
            .map_err(|_| anyhow!("CHAIN_RPC_URL environment variable is required"))?;
        let ws_url = env::var("CHAIN_WS_URL")
            .map_err(|_| anyhow!("CHAIN_WS_URL environment variable is required"))?;
        let relayer_key = env::var("RELAYER_PRIVATE_KEY")
            .map_err(|_| anyhow!("RELAYER_PRIVATE_KEY environment variable is required"))?;
        let tip_contract = parse_address(
            &env::var("TIP_CONTRACT_ADDRESS")
                .map_err(|_| anyhow!("TIP_CONTRACT_ADDRESS environment variable is required"))?,
        )?;
        let token_registry =
            parse_token_registry(&env::var("TOKEN_REGISTRY").unwrap_or_default())?;

        Ok(Self {
            rpc_url,
            ws_url,
            relayer_key,
            tip_contract,
            token_registry,
        })
    }
}

fn parse_token_registry(raw: &str) -> Result<HashMap<String, Address>> {
    let mut registry = HashMap::new();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let (symbol, address) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid TOKEN_REGISTRY entry: {}", entry))?;
        registry.insert(
            symbol.trim().to_uppercase(),
            parse_address(address.trim())?,
        );
    }
    Ok(registry)
}

/// A relayed tip ready for on-chain submission
#[derive(Debug, Clone)]
pub struct TipSubmission {
    pub from: Address,
    pub to: Address,
    pub token: Address,
    pub amount: U256,
    /// Content identifier of the uploaded message, empty when none
    pub content_id: String,
    pub nonce: U256,
}

/// Decoded `TipSent` log. Ephemeral, never persisted directly.
#[derive(Debug, Clone)]
pub struct ChainEvent {
    pub from: Address,
    pub to: Address,
    pub token: Address,
    pub amount: U256,
    pub content_id: String,
    pub tx_hash: String,
}

/// Handle for a standing log subscription. Aborts the listener task when
/// cancelled or dropped.
pub struct EventSubscription {
    handle: JoinHandle<()>,
}

impl EventSubscription {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct ChainGateway {
    config: ChainConfig,
    signer: PrivateKeySigner,
    breaker: CircuitBreaker,
    /// The relayer key is a single on-chain nonce sequence; submissions are
    /// serialized here even though queue workers run concurrently.
    submit_lock: Mutex<()>,
}

impl ChainGateway {
    pub fn new(config: ChainConfig, breaker: CircuitBreaker) -> Result<Self> {
        let signer = parse_signer(&config.relayer_key)?;
        info!("Chain gateway using relayer {:?}", signer.address());
        Ok(Self {
            config,
            signer,
            breaker,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    /// Resolve a token symbol to its contract address.
    pub fn resolve_token(&self, symbol: &str) -> Result<Address> {
        self.config
            .token_registry
            .get(&symbol.to_uppercase())
            .copied()
            .ok_or_else(|| anyhow!("Unknown token symbol: {}", symbol))
    }

    fn provider(&self) -> Result<impl Provider> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.config.rpc_url.parse()?);
        Ok(provider)
    }

    /// Relayer ETH balance, for funding checks at startup.
    pub async fn relayer_balance(&self) -> Result<U256> {
        let address = self.signer.address();
        self.breaker
            .execute(|| async {
                let provider = self.provider()?;
                Ok(provider.get_balance(address).await?)
            })
            .await
    }

    /// Sign the tip digest and submit `relayTip`, returning the transaction
    /// hash without waiting for the receipt.
    pub async fn submit_tip(&self, tip: &TipSubmission) -> Result<String> {
        let _guard = self.submit_lock.lock().await;

        self.breaker
            .execute(|| async {
                let digest = tip_digest(
                    tip.from,
                    tip.to,
                    tip.amount,
                    content_hash(&tip.content_id),
                    tip.nonce,
                );
                let signature = self.signer.sign_hash(&digest).await?;

                let provider = self.provider()?;
                let contract = ITipRelay::new(self.config.tip_contract, &provider);

                let pending_tx = contract
                    .relayTip(
                        tip.from,
                        tip.to,
                        tip.token,
                        tip.amount,
                        tip.content_id.clone(),
                        tip.nonce,
                        Bytes::from(signature.as_bytes()),
                    )
                    .send()
                    .await?;

                let tx_hash = *pending_tx.tx_hash();
                debug!(
                    "Submitted relayed tip {:?} -> {:?} amount {} tx {:?}",
                    tip.from, tip.to, tip.amount, tx_hash
                );
                Ok(format!("{:?}", tx_hash))
            })
            .await
    }

    /// Bounded wait for a transaction receipt. Times out with an error so
    /// the caller's retry policy can take over; a reverted transaction is
    /// also an error.
    pub async fn wait_for_confirmation(&self, tx_hash: &str, timeout: Duration) -> Result<()> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|e| anyhow!("Invalid transaction hash {}: {}", tx_hash, e))?;
        let deadline = Instant::now() + timeout;

        loop {
            let receipt = self
                .breaker
                .execute(|| async {
                    let provider = self.provider()?;
                    Ok(provider.get_transaction_receipt(hash).await?)
                })
                .await?;

            if let Some(receipt) = receipt {
                if receipt.status() {
                    debug!("Transaction {} confirmed", tx_hash);
                    return Ok(());
                }
                return Err(anyhow!("Transaction {} reverted on-chain", tx_hash));
            }

            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "Confirmation wait for {} timed out after {:?}",
                    tx_hash,
                    timeout
                ));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    /// Number of confirmed tips a sender has on-chain, used for nonce
    /// assignment.
    pub async fn confirmed_tip_count(&self, sender: Address) -> Result<u64> {
        self.breaker
            .execute(|| async {
                let provider = self.provider()?;
                let contract = ITipRelay::new(self.config.tip_contract, &provider);
                let count = contract.tipCountOf(sender).call().await?;
                Ok(count.to::<u64>())
            })
            .await
    }

    /// Open a standing subscription on the contract's `TipSent` log over the
    /// websocket endpoint and invoke `on_event` with each decoded event.
    pub async fn subscribe_tip_events<F>(&self, on_event: F) -> Result<EventSubscription>
    where
        F: Fn(ChainEvent) + Send + Sync + 'static,
    {
        let ws_url = self.config.ws_url.clone();
        let contract = self.config.tip_contract;

        let provider = self
            .breaker
            .execute(|| async {
                let provider = ProviderBuilder::new()
                    .connect_ws(WsConnect::new(&ws_url))
                    .await?;
                Ok(provider)
            })
            .await?;

        let filter = Filter::new()
            .address(contract)
            .event_signature(ITipRelay::TipSent::SIGNATURE_HASH);
        let subscription = provider.subscribe_logs(&filter).await?;

        let handle = tokio::spawn(async move {
            // The provider owns the websocket connection; keep it alive for
            // the lifetime of the stream.
            let _provider = provider;
            let mut stream = subscription.into_stream();

            info!("TipSent subscription active on {:?}", contract);
            while let Some(log) = stream.next().await {
                let tx_hash = log
                    .transaction_hash
                    .map(|h| format!("{:?}", h))
                    .unwrap_or_default();

                match log.log_decode::<ITipRelay::TipSent>() {
                    Ok(decoded) => {
                        let ITipRelay::TipSent {
                            from,
                            to,
                            token,
                            amount,
                            contentId,
                            nonce: _,
                        } = decoded.inner.data;
                        on_event(ChainEvent {
                            from,
                            to,
                            token,
                            amount,
                            content_id: contentId,
                            tx_hash,
                        });
                    }
                    Err(e) => {
                        warn!("Failed to decode TipSent log: {}", e);
                    }
                }
            }
            warn!("TipSent subscription stream ended");
        });

        Ok(EventSubscription { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_registry_parses_pairs() {
        let registry = parse_token_registry(
            "VERY=0x70997970C51812dc3A010C7d01b50e0d17dc79C8, usdc=0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains_key("VERY"));
        assert!(registry.contains_key("USDC"));
    }

    #[test]
    fn token_registry_rejects_malformed_entries() {
        assert!(parse_token_registry("VERY").is_err());
        assert!(parse_token_registry("VERY=not-an-address").is_err());
        assert!(parse_token_registry("").unwrap().is_empty());
    }

    #[test]
    fn gateway_resolves_known_tokens_only() {
        let config = ChainConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            ws_url: "ws://127.0.0.1:8546".to_string(),
            relayer_key: "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
                .to_string(),
            tip_contract: Address::ZERO,
            token_registry: parse_token_registry(
                "VERY=0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            )
            .unwrap(),
        };
        let gateway = ChainGateway::new(
            config,
            CircuitBreaker::new("chain-rpc", breaker::BreakerConfig::chain_rpc()),
        )
        .unwrap();

        assert!(gateway.resolve_token("very").is_ok());
        assert!(gateway.resolve_token("DOGE").is_err());
        assert_ne!(gateway.relayer_address(), Address::ZERO);
    }
}
