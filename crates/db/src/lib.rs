//! Tip record store
//!
//! Persistent relational state for each tip, behind the `TipStore` trait so
//! the settlement orchestrator can run against the SQL implementation in
//! production and the in-memory implementation in tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;

pub mod entity;
pub mod memory;
pub mod sql;

pub use memory::MemoryTipStore;
pub use sql::SqlTipStore;

/// Tip settlement status. CONFIRMED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl TipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipStatus::Pending => "PENDING",
            TipStatus::Submitted => "SUBMITTED",
            TipStatus::Confirmed => "CONFIRMED",
            TipStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TipStatus::Confirmed | TipStatus::Failed)
    }
}

impl FromStr for TipStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TipStatus::Pending),
            "SUBMITTED" => Ok(TipStatus::Submitted),
            "CONFIRMED" => Ok(TipStatus::Confirmed),
            "FAILED" => Ok(TipStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown tip status: {}", other)),
        }
    }
}

impl std::fmt::Display for TipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TipRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_wallet: String,
    pub recipient_wallet: String,
    /// Amount in the token's minor units
    pub amount: i64,
    pub token: String,
    pub message: Option<String>,
    /// Content identifier of the uploaded message, empty when none
    pub message_hash: String,
    pub transaction_hash: Option<String>,
    pub status: TipStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Input for creating a tip record
#[derive(Debug, Clone)]
pub struct NewTip {
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_wallet: String,
    pub recipient_wallet: String,
    pub amount: i64,
    pub token: String,
    pub message: Option<String>,
}

/// Persistence contract for tip records.
///
/// All mutations are status-guarded compare-and-set transitions: the `bool`
/// return of the `mark_*` operations reports whether this caller won the
/// transition. A `false` from a concurrent worker/event race is a no-op,
/// not an error.
#[async_trait]
pub trait TipStore: Send + Sync {
    /// Persist a new record with status PENDING.
    async fn insert(&self, tip: NewTip) -> Result<TipRecord>;

    async fn find(&self, id: &str) -> Result<Option<TipRecord>>;

    /// Record the content id of the uploaded message.
    async fn set_message_hash(&self, id: &str, content_id: &str) -> Result<()>;

    /// PENDING -> SUBMITTED with the transaction hash.
    async fn mark_submitted(&self, id: &str, tx_hash: &str) -> Result<bool>;

    /// Non-terminal -> CONFIRMED with the confirming transaction hash.
    async fn mark_confirmed(&self, id: &str, tx_hash: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Non-terminal -> FAILED. Permanent, no automatic resubmission.
    async fn mark_failed(&self, id: &str) -> Result<bool>;

    /// First non-terminal record matching the event correlation key
    /// (sender wallet, recipient wallet, message hash), oldest first.
    async fn find_open_match(
        &self,
        sender_wallet: &str,
        recipient_wallet: &str,
        message_hash: &str,
    ) -> Result<Option<TipRecord>>;

    /// All non-terminal records, for startup recovery.
    async fn list_open(&self) -> Result<Vec<TipRecord>>;
}
