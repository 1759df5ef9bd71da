use anyhow::Result;
use breaker::{BreakerConfig, CircuitBreaker};
use clap::Parser;
use db::SqlTipStore;
use dotenvy::dotenv;
use ethereum::{ChainConfig, ChainGateway, RelayerKeypair};
use settlement::cli::{Cli, Commands};
use settlement::notify::WebhookNotifier;
use settlement::{SettlementConfig, SettlementDeps, SettlementService, queue_config_from_env};
use settlement::identity::HttpIdentityClient;
use settlement::moderation::HttpModerationClient;
use std::sync::Arc;
use storage::{ContentClient, ContentStoreConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    monitoring::init_logging()?;

    match cli.command {
        Commands::Start {
            database_url,
            moderation_url,
            identity_url,
        } => run_service(database_url, moderation_url, identity_url).await,

        Commands::Keypair => {
            let keypair = RelayerKeypair::generate();
            println!("Private key: {}", keypair.private_key);
            println!("Address:     {}", keypair.address);
            println!("Fund this address on the target chain before starting the service.");
            Ok(())
        }

        Commands::Digest {
            from,
            to,
            amount,
            content_id,
            nonce,
        } => {
            let digest = ethereum::tip_digest(
                ethereum::parse_address(&from)?,
                ethereum::parse_address(&to)?,
                alloy::primitives::U256::from(amount),
                ethereum::content_hash(&content_id),
                alloy::primitives::U256::from(nonce),
            );
            println!("{:?}", digest);
            Ok(())
        }
    }
}

async fn run_service(
    database_url: String,
    moderation_url: String,
    identity_url: String,
) -> Result<()> {
    let chain_config = ChainConfig::from_env()?;
    let content_config = ContentStoreConfig::from_env()?;
    let settlement_config = SettlementConfig::from_env();
    let queue_config = queue_config_from_env();

    // Each remote dependency gets its own breaker with independent tuning
    let chain = Arc::new(ChainGateway::new(
        chain_config,
        CircuitBreaker::new("chain-rpc", BreakerConfig::chain_rpc()),
    )?);
    let content = Arc::new(ContentClient::new(
        content_config,
        CircuitBreaker::new("content-store", BreakerConfig::content_store()),
    )?);
    let store = Arc::new(
        SqlTipStore::connect(
            &database_url,
            CircuitBreaker::new("database", BreakerConfig::database()),
        )
        .await?,
    );
    let moderation = Arc::new(HttpModerationClient::new(
        moderation_url,
        CircuitBreaker::new("moderation", BreakerConfig::moderation()),
    ));
    let identity = Arc::new(HttpIdentityClient::new(identity_url));

    match chain.relayer_balance().await {
        Ok(balance) if balance.is_zero() => {
            warn!(
                "Relayer {:?} has zero balance and cannot pay gas",
                chain.relayer_address()
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Could not check relayer balance: {}", e),
    }

    let service = SettlementService::new(
        SettlementDeps {
            store,
            chain: chain.clone(),
            content,
            moderation,
            identity,
        },
        settlement_config,
        queue_config,
    );

    if let Ok(url) = std::env::var("NOTIFY_WEBHOOK_URL") {
        service.register_confirmation_hook(Arc::new(WebhookNotifier::new(url)));
    }

    service.recover_open().await?;

    // The subscription handle aborts the listener when dropped; keep it
    // alive for the lifetime of the service.
    let _subscription = chain.subscribe_tip_events(service.event_handler()).await?;

    info!("Tipline settlement service started");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
