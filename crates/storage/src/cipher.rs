//! Envelope encryption for tip messages
//!
//! Messages are sealed with ChaCha20-Poly1305 into a small JSON envelope
//! before upload, so the content-addressed network only ever sees
//! ciphertext. Fetch detects the envelope shape and decrypts; payloads
//! without the envelope shape are treated as plaintext.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const ENVELOPE_ALG: &str = "chacha20poly1305";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    alg: String,
    nonce: String,
    ct: String,
}

pub struct EnvelopeCipher {
    cipher: ChaCha20Poly1305,
}

impl EnvelopeCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Create from a hex-encoded 32-byte key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        if hex_key.len() != 64 {
            anyhow::bail!("Message encryption key must be 64 hex characters (32 bytes)");
        }
        let key_bytes = hex::decode(hex_key).context("Invalid hex in message encryption key")?;
        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| anyhow!("Key must be exactly 32 bytes"))?;
        Ok(Self::new(&key))
    }

    /// Seal a message into the JSON envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let envelope = Envelope {
            alg: ENVELOPE_ALG.to_string(),
            nonce: BASE64.encode(nonce_bytes),
            ct: BASE64.encode(&ciphertext),
        };
        serde_json::to_string(&envelope).context("Failed to serialize envelope")
    }

    /// Open a sealed envelope back into the message.
    pub fn open(&self, envelope_json: &str) -> Result<String> {
        let envelope: Envelope =
            serde_json::from_str(envelope_json).context("Payload is not an envelope")?;
        if envelope.alg != ENVELOPE_ALG {
            anyhow::bail!("Unsupported envelope algorithm: {}", envelope.alg);
        }

        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .context("Invalid envelope nonce")?;
        if nonce_bytes.len() != 12 {
            anyhow::bail!("Envelope nonce must be 12 bytes");
        }
        let ciphertext = BASE64
            .decode(&envelope.ct)
            .context("Invalid envelope ciphertext")?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;
        String::from_utf8(plaintext).context("Decrypted payload is not valid UTF-8")
    }
}

/// Whether a retrieved payload looks like a sealed envelope.
pub fn is_envelope(payload: &str) -> bool {
    serde_json::from_str::<Envelope>(payload)
        .map(|e| e.alg == ENVELOPE_ALG)
        .unwrap_or(false)
}
