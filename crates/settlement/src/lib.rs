pub mod adapters;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod moderation;
pub mod notify;
pub mod service;

pub use config::{SettlementConfig, queue_config_from_env};
pub use error::SettlementError;
pub use service::{
    ConfirmationHook, ContentStore, ProcessTipResponse, SettlementDeps, SettlementService,
    TipChain, TipRequest,
};
