//! In-memory tip store for tests and local runs

use crate::{NewTip, TipRecord, TipStatus, TipStore};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Insertion-ordered in-memory store with the same guarded-transition
/// semantics as the SQL implementation.
#[derive(Default)]
pub struct MemoryTipStore {
    records: Mutex<Vec<TipRecord>>,
}

impl MemoryTipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TipStore for MemoryTipStore {
    async fn insert(&self, new_tip: NewTip) -> Result<TipRecord> {
        let record = TipRecord {
            id: Uuid::new_v4().to_string(),
            sender_id: new_tip.sender_id,
            recipient_id: new_tip.recipient_id,
            sender_wallet: new_tip.sender_wallet.to_lowercase(),
            recipient_wallet: new_tip.recipient_wallet.to_lowercase(),
            amount: new_tip.amount,
            token: new_tip.token,
            message: new_tip.message,
            message_hash: String::new(),
            transaction_hash: None,
            status: TipStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
        };
        self.records.lock().push(record.clone());
        Ok(record)
    }

    async fn find(&self, id: &str) -> Result<Option<TipRecord>> {
        Ok(self.records.lock().iter().find(|r| r.id == id).cloned())
    }

    async fn set_message_hash(&self, id: &str, content_id: &str) -> Result<()> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("Tip {} not found", id))?;
        record.message_hash = content_id.to_string();
        Ok(())
    }

    async fn mark_submitted(&self, id: &str, tx_hash: &str) -> Result<bool> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.status == TipStatus::Pending => {
                record.status = TipStatus::Submitted;
                record.transaction_hash = Some(tx_hash.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_confirmed(&self, id: &str, tx_hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = TipStatus::Confirmed;
                record.transaction_hash = Some(tx_hash.to_string());
                record.confirmed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: &str) -> Result<bool> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = TipStatus::Failed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_open_match(
        &self,
        sender_wallet: &str,
        recipient_wallet: &str,
        message_hash: &str,
    ) -> Result<Option<TipRecord>> {
        let sender = sender_wallet.to_lowercase();
        let recipient = recipient_wallet.to_lowercase();
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| {
                !r.status.is_terminal()
                    && r.sender_wallet == sender
                    && r.recipient_wallet == recipient
                    && r.message_hash == message_hash
            })
            .cloned())
    }

    async fn list_open(&self) -> Result<Vec<TipRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tip() -> NewTip {
        NewTip {
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            sender_wallet: "0xAAAA0000000000000000000000000000000000aa".to_string(),
            recipient_wallet: "0xBBBB0000000000000000000000000000000000bb".to_string(),
            amount: 5,
            token: "VERY".to_string(),
            message: Some("nice work".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_creates_pending_record() {
        let store = MemoryTipStore::new();
        let record = store.insert(new_tip()).await.unwrap();
        assert_eq!(record.status, TipStatus::Pending);
        assert!(record.message_hash.is_empty());
        assert!(store.find(&record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn status_transitions_are_guarded() {
        let store = MemoryTipStore::new();
        let record = store.insert(new_tip()).await.unwrap();

        assert!(store.mark_submitted(&record.id, "0xtx1").await.unwrap());
        // Already SUBMITTED, a second submission transition loses
        assert!(!store.mark_submitted(&record.id, "0xtx2").await.unwrap());

        assert!(
            store
                .mark_confirmed(&record.id, "0xtx1", Utc::now())
                .await
                .unwrap()
        );
        // Terminal: late confirmation and failure are no-ops
        assert!(
            !store
                .mark_confirmed(&record.id, "0xtx3", Utc::now())
                .await
                .unwrap()
        );
        assert!(!store.mark_failed(&record.id).await.unwrap());

        let stored = store.find(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TipStatus::Confirmed);
        assert_eq!(stored.transaction_hash.as_deref(), Some("0xtx1"));
    }

    #[tokio::test]
    async fn open_match_is_first_non_terminal_and_case_insensitive() {
        let store = MemoryTipStore::new();
        let first = store.insert(new_tip()).await.unwrap();
        let second = store.insert(new_tip()).await.unwrap();

        let matched = store
            .find_open_match(
                "0xAAAA0000000000000000000000000000000000AA",
                "0xBBBB0000000000000000000000000000000000BB",
                "",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.id, first.id);

        store
            .mark_confirmed(&first.id, "0xtx", Utc::now())
            .await
            .unwrap();
        let matched = store
            .find_open_match(&first.sender_wallet, &first.recipient_wallet, "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.id, second.id);
    }

    #[tokio::test]
    async fn list_open_excludes_terminal_records() {
        let store = MemoryTipStore::new();
        let a = store.insert(new_tip()).await.unwrap();
        let b = store.insert(new_tip()).await.unwrap();
        store.mark_failed(&a.id).await.unwrap();

        let open = store.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, b.id);
    }
}
