pub mod contracts;
pub mod digest;
pub mod gateway;
pub mod keypair;

pub use digest::{EMPTY_CONTENT_HASH, content_hash, next_nonce, tip_digest};
pub use gateway::{ChainConfig, ChainEvent, ChainGateway, EventSubscription, TipSubmission};
pub use keypair::{RelayerKeypair, parse_address, parse_signer};
