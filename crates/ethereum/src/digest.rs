//! Tip digest derivation
//!
//! Builds the signing hash for a relayed tip. The field order and the packed,
//! non-padded-beyond-type-width encoding must match the on-chain verifier's
//! `keccak256(abi.encodePacked(from, to, amount, contentHash, nonce))`
//! byte-for-byte; any divergence silently breaks signature verification.

use alloy::primitives::{Address, FixedBytes, U256, keccak256};
use alloy::sol_types::SolValue;
use chrono::{DateTime, Utc};

/// Content hash used when a tip carries no message.
pub const EMPTY_CONTENT_HASH: FixedBytes<32> = FixedBytes::ZERO;

/// 32-byte content hash for a content identifier. Empty id maps to the
/// all-zero hash.
pub fn content_hash(content_id: &str) -> FixedBytes<32> {
    if content_id.is_empty() {
        EMPTY_CONTENT_HASH
    } else {
        keccak256(content_id.as_bytes())
    }
}

/// Canonical signing hash for a relayed tip.
pub fn tip_digest(
    from: Address,
    to: Address,
    amount: U256,
    content_hash: FixedBytes<32>,
    nonce: U256,
) -> FixedBytes<32> {
    keccak256((from, to, amount, content_hash, nonce).abi_encode_packed())
}

/// Next nonce for a sender: confirmed-tip-count + 1 when prior confirmed
/// tips exist, otherwise a coarse Unix-seconds fallback.
///
/// The fallback can collide or misorder under concurrent first-time tips
/// from the same sender; liveness is preferred over strict ordering here.
pub fn next_nonce(confirmed_tip_count: u64, now: DateTime<Utc>) -> U256 {
    if confirmed_tip_count > 0 {
        U256::from(confirmed_tip_count + 1)
    } else {
        U256::from(now.timestamp().max(0) as u64)
    }
}
