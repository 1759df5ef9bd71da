//! Relayer keypair helpers
//!
//! The relayer key pays gas for every settled tip and signs the tip digest;
//! it must be funded on the target chain before the service starts.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerKeypair {
    pub private_key: String,
    pub address: String,
}

impl RelayerKeypair {
    /// Generate a fresh relayer keypair.
    pub fn generate() -> Self {
        let signer = PrivateKeySigner::random();
        Self {
            private_key: format!("0x{}", hex::encode(signer.to_bytes())),
            address: format!("{:?}", signer.address()),
        }
    }

    /// Load a keypair from an existing private key, with or without the 0x
    /// prefix.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let signer = parse_signer(private_key)?;
        Ok(Self {
            private_key: format!("0x{}", hex::encode(signer.to_bytes())),
            address: format!("{:?}", signer.address()),
        })
    }

    /// Check that the private key derives the expected address.
    pub fn verify(&self, expected_address: &str) -> Result<bool> {
        let derived = self.address.to_lowercase();
        let expected = normalize_address(expected_address);
        Ok(derived == expected)
    }
}

/// Parse a hex private key into a signer.
pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner> {
    let key_hex = private_key
        .strip_prefix("0x")
        .or_else(|| private_key.strip_prefix("0X"))
        .unwrap_or(private_key);

    let key_bytes = hex::decode(key_hex).map_err(|e| anyhow!("Invalid hex private key: {}", e))?;
    if key_bytes.len() != 32 {
        return Err(anyhow!(
            "Private key must be 32 bytes, got {}",
            key_bytes.len()
        ));
    }

    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| anyhow!("Private key must be exactly 32 bytes"))?;
    PrivateKeySigner::from_bytes(&key_array.into())
        .map_err(|e| anyhow!("Failed to create signer from private key: {}", e))
}

/// Parse an Ethereum address from a string.
pub fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address).map_err(|e| anyhow!("Invalid Ethereum address {}: {}", address, e))
}

fn normalize_address(address: &str) -> String {
    if address.starts_with("0x") || address.starts_with("0X") {
        address.to_lowercase()
    } else {
        format!("0x{}", address).to_lowercase()
    }
}
