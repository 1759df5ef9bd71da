//! End-to-end settlement flow tests over the in-memory store and mock
//! gateways.

use alloy::primitives::{Address, U256};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use breaker::{BreakerConfig, CircuitBreaker};
use db::{MemoryTipStore, TipRecord, TipStatus, TipStore};
use ethereum::{ChainEvent, TipSubmission};
use queue::QueueConfig;
use settlement::identity::{IdentityApi, UserProfile};
use settlement::moderation::{ModerationAction, ModerationApi, ModerationVerdict};
use settlement::{
    ConfirmationHook, ContentStore, SettlementConfig, SettlementDeps, SettlementService, TipChain,
    TipRequest,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;

const ALICE_WALLET: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const BOB_WALLET: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";
const VERY_TOKEN: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
const CONTENT_ID: &str = "bafy-test-content";

struct MockIdentity;

#[async_trait]
impl IdentityApi for MockIdentity {
    async fn resolve_or_provision(&self, external_id: &str) -> Result<UserProfile> {
        let wallet = match external_id {
            "alice" => ALICE_WALLET,
            "bob" => BOB_WALLET,
            other => return Err(anyhow!("unknown user {}", other)),
        };
        Ok(UserProfile {
            id: format!("u-{}", external_id),
            wallet_address: wallet.to_string(),
        })
    }
}

struct MockModeration {
    action: ModerationAction,
}

#[async_trait]
impl ModerationApi for MockModeration {
    async fn check(&self, _message: &str) -> Result<ModerationVerdict> {
        Ok(ModerationVerdict {
            action: self.action,
            toxicity_score: 0.1,
            reason: match self.action {
                ModerationAction::Block => Some("harassment".to_string()),
                _ => None,
            },
        })
    }
}

struct MockContent;

#[async_trait]
impl ContentStore for MockContent {
    async fn put_message(&self, _message: &str) -> Result<String> {
        Ok(CONTENT_ID.to_string())
    }
}

enum ConfirmBehavior {
    /// Receipt arrives after the delay
    OkAfter(Duration),
    /// Receipt wait times out after the delay
    ErrAfter(Duration),
}

struct MockChain {
    submissions: AtomicU32,
    submit_delay: Duration,
    submit_error: Option<String>,
    confirm: ConfirmBehavior,
    /// When set, submissions pass through this breaker like the real
    /// gateway's chain-RPC breaker
    breaker: Option<CircuitBreaker>,
}

impl MockChain {
    fn happy(confirm: ConfirmBehavior) -> Self {
        Self {
            submissions: AtomicU32::new(0),
            submit_delay: Duration::ZERO,
            submit_error: None,
            confirm,
            breaker: None,
        }
    }

    fn failing() -> Self {
        Self {
            submissions: AtomicU32::new(0),
            submit_delay: Duration::ZERO,
            submit_error: Some("rpc unavailable".to_string()),
            confirm: ConfirmBehavior::ErrAfter(Duration::from_millis(10)),
            breaker: None,
        }
    }

    async fn submit_inner(&self) -> Result<String> {
        if !self.submit_delay.is_zero() {
            sleep(self.submit_delay).await;
        }
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = &self.submit_error {
            return Err(anyhow!("{}", error));
        }
        Ok(format!("0x{:064x}", n))
    }
}

#[async_trait]
impl TipChain for MockChain {
    fn resolve_token(&self, symbol: &str) -> Result<Address> {
        if symbol == "VERY" {
            Ok(Address::from_str(VERY_TOKEN).unwrap())
        } else {
            Err(anyhow!("Unknown token symbol: {}", symbol))
        }
    }

    async fn submit_tip(&self, _tip: &TipSubmission) -> Result<String> {
        match &self.breaker {
            Some(breaker) => breaker.execute(|| self.submit_inner()).await,
            None => self.submit_inner().await,
        }
    }

    async fn wait_for_confirmation(&self, _tx_hash: &str, _timeout: Duration) -> Result<()> {
        match self.confirm {
            ConfirmBehavior::OkAfter(delay) => {
                sleep(delay).await;
                Ok(())
            }
            ConfirmBehavior::ErrAfter(delay) => {
                sleep(delay).await;
                Err(anyhow!("confirmation wait timed out"))
            }
        }
    }

    async fn confirmed_tip_count(&self, _sender: Address) -> Result<u64> {
        Ok(0)
    }
}

struct CountingHook {
    fired: AtomicU32,
}

#[async_trait]
impl ConfirmationHook for CountingHook {
    async fn on_confirmed(&self, _record: &TipRecord) -> Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        max_attempts: 3,
        retry_base: Duration::from_millis(30),
        capacity: 64,
    }
}

fn service_with(
    store: Arc<MemoryTipStore>,
    chain: Arc<MockChain>,
    moderation: ModerationAction,
    queue_config: QueueConfig,
) -> SettlementService {
    SettlementService::new(
        SettlementDeps {
            store,
            chain,
            content: Arc::new(MockContent),
            moderation: Arc::new(MockModeration { action: moderation }),
            identity: Arc::new(MockIdentity),
        },
        SettlementConfig {
            max_amount: 1_000_000,
            confirmation_timeout: Duration::from_secs(1),
        },
        queue_config,
    )
}

fn tip_request(message: Option<&str>) -> TipRequest {
    TipRequest {
        sender_id: "alice".to_string(),
        recipient_id: "bob".to_string(),
        amount: 5,
        token: "VERY".to_string(),
        message: message.map(|m| m.to_string()),
    }
}

async fn wait_for_status(
    store: &MemoryTipStore,
    tip_id: &str,
    status: TipStatus,
) -> TipRecord {
    for _ in 0..200 {
        if let Some(record) = store.find(tip_id).await.unwrap() {
            if record.status == status {
                return record;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("tip {} never reached {}", tip_id, status);
}

#[tokio::test]
async fn accepted_tip_is_pending_immediately() {
    let store = Arc::new(MemoryTipStore::new());
    let mut chain = MockChain::happy(ConfirmBehavior::OkAfter(Duration::from_millis(50)));
    chain.submit_delay = Duration::from_millis(200);
    let chain = Arc::new(chain);
    let service = service_with(
        store.clone(),
        chain,
        ModerationAction::Allow,
        fast_queue(),
    );

    let response = service.process_tip(tip_request(Some("nice work"))).await;
    assert!(response.success, "{:?}", response.error);
    let tip_id = response.tip_id.expect("tip id");

    let record = store.find(&tip_id).await.unwrap().expect("record exists");
    assert_eq!(record.status, TipStatus::Pending);
    assert!(record.message_hash.is_empty());
}

#[tokio::test]
async fn blocked_message_rejects_before_persistence() {
    let store = Arc::new(MemoryTipStore::new());
    let chain = Arc::new(MockChain::happy(ConfirmBehavior::OkAfter(
        Duration::from_millis(10),
    )));
    let service = service_with(
        store.clone(),
        chain,
        ModerationAction::Block,
        fast_queue(),
    );

    let response = service.process_tip(tip_request(Some("awful message"))).await;
    assert!(!response.success);
    assert_eq!(response.error_code, Some("CONTENT_FLAGGED"));
    assert!(response.tip_id.is_none());
    assert!(store.list_open().await.unwrap().is_empty());
}

#[tokio::test]
async fn validation_failures_are_structured() {
    let store = Arc::new(MemoryTipStore::new());
    let chain = Arc::new(MockChain::happy(ConfirmBehavior::OkAfter(
        Duration::from_millis(10),
    )));
    let service = service_with(
        store.clone(),
        chain,
        ModerationAction::Allow,
        fast_queue(),
    );

    let mut request = tip_request(None);
    request.recipient_id = "alice".to_string();
    let response = service.process_tip(request).await;
    assert!(!response.success);
    assert_eq!(response.error_code, Some("VALIDATION_ERROR"));

    let mut request = tip_request(None);
    request.amount = -3;
    let response = service.process_tip(request).await;
    assert_eq!(response.error_code, Some("VALIDATION_ERROR"));

    let mut request = tip_request(None);
    request.sender_id = "mallory".to_string();
    let response = service.process_tip(request).await;
    assert_eq!(response.error_code, Some("USER_RESOLUTION_FAILED"));
}

#[tokio::test]
async fn scenario_a_event_confirms_submitted_tip_exactly_once() {
    let store = Arc::new(MemoryTipStore::new());
    // Receipt wait never succeeds; confirmation must come from the event
    let chain = Arc::new(MockChain::happy(ConfirmBehavior::ErrAfter(
        Duration::from_secs(2),
    )));
    let service = service_with(
        store.clone(),
        chain,
        ModerationAction::Allow,
        fast_queue(),
    );
    let hook = Arc::new(CountingHook {
        fired: AtomicU32::new(0),
    });
    service.register_confirmation_hook(hook.clone());

    let response = service.process_tip(tip_request(Some("nice work"))).await;
    assert!(response.success);
    let tip_id = response.tip_id.unwrap();

    // Worker uploads the message and submits
    let record = wait_for_status(&store, &tip_id, TipStatus::Submitted).await;
    assert_eq!(record.message_hash, CONTENT_ID);
    assert!(record.transaction_hash.is_some());

    let event = ChainEvent {
        from: Address::from_str(ALICE_WALLET).unwrap(),
        to: Address::from_str(BOB_WALLET).unwrap(),
        token: Address::from_str(VERY_TOKEN).unwrap(),
        amount: U256::from(5u64),
        content_id: CONTENT_ID.to_string(),
        tx_hash: "0xeventtx".to_string(),
    };

    let handler = service.event_handler();
    handler(event.clone());

    let record = wait_for_status(&store, &tip_id, TipStatus::Confirmed).await;
    assert_eq!(record.transaction_hash.as_deref(), Some("0xeventtx"));
    assert!(record.confirmed_at.is_some());

    // Duplicate delivery of the same event is a no-op
    handler(event);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(hook.fired.load(Ordering::SeqCst), 1);

    let record = store.find(&tip_id).await.unwrap().unwrap();
    assert_eq!(record.status, TipStatus::Confirmed);
    assert_eq!(record.transaction_hash.as_deref(), Some("0xeventtx"));
}

#[tokio::test]
async fn worker_receipt_wait_also_confirms() {
    let store = Arc::new(MemoryTipStore::new());
    let chain = Arc::new(MockChain::happy(ConfirmBehavior::OkAfter(
        Duration::from_millis(30),
    )));
    let service = service_with(
        store.clone(),
        chain.clone(),
        ModerationAction::Allow,
        fast_queue(),
    );
    let hook = Arc::new(CountingHook {
        fired: AtomicU32::new(0),
    });
    service.register_confirmation_hook(hook.clone());

    let response = service.process_tip(tip_request(None)).await;
    let tip_id = response.tip_id.unwrap();

    let record = wait_for_status(&store, &tip_id, TipStatus::Confirmed).await;
    // No message attached: empty content hash all the way through
    assert!(record.message_hash.is_empty());
    assert!(record.transaction_hash.is_some());
    assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(hook.fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_exhaustion_marks_tip_failed() {
    let store = Arc::new(MemoryTipStore::new());
    let chain = Arc::new(MockChain::failing());
    let service = service_with(
        store.clone(),
        chain.clone(),
        ModerationAction::Allow,
        fast_queue(),
    );

    let response = service.process_tip(tip_request(None)).await;
    assert!(response.success, "intake accepts; failure is asynchronous");
    let tip_id = response.tip_id.unwrap();

    let record = wait_for_status(&store, &tip_id, TipStatus::Failed).await;
    assert!(record.transaction_hash.is_none());
    assert_eq!(chain.submissions.load(Ordering::SeqCst), 3);

    let dead = service.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.tip_id, tip_id);

    // FAILED is terminal: nothing retries further
    sleep(Duration::from_millis(300)).await;
    assert_eq!(chain.submissions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn scenario_b_breaker_opens_after_consecutive_submission_failures() {
    let store = Arc::new(MemoryTipStore::new());
    let chain = Arc::new(MockChain {
        submissions: AtomicU32::new(0),
        submit_delay: Duration::ZERO,
        submit_error: Some("rpc unavailable".to_string()),
        confirm: ConfirmBehavior::ErrAfter(Duration::from_millis(10)),
        breaker: Some(CircuitBreaker::new(
            "chain-rpc",
            BreakerConfig {
                failure_threshold: 4,
                monitoring_period: Duration::from_secs(60),
                reset_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        )),
    });
    // Five attempts: four real failures open the breaker, the fifth fails
    // fast without reaching the chain.
    let queue_config = QueueConfig {
        concurrency: 2,
        max_attempts: 5,
        retry_base: Duration::from_millis(20),
        capacity: 64,
    };
    let service = service_with(
        store.clone(),
        chain.clone(),
        ModerationAction::Allow,
        queue_config,
    );

    let response = service.process_tip(tip_request(None)).await;
    let tip_id = response.tip_id.unwrap();

    let _ = wait_for_status(&store, &tip_id, TipStatus::Failed).await;

    assert_eq!(
        chain.submissions.load(Ordering::SeqCst),
        4,
        "breaker must reject the fifth attempt without invoking the chain"
    );
    let dead = service.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(
        dead[0].error.contains("circuit breaker"),
        "dead letter should carry the breaker rejection: {}",
        dead[0].error
    );
}

#[tokio::test]
async fn recovery_reenqueues_open_tips() {
    let store = Arc::new(MemoryTipStore::new());
    // Seed a pending record as if a previous process crashed after intake
    let seeded = store
        .insert(db::NewTip {
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            sender_wallet: ALICE_WALLET.to_string(),
            recipient_wallet: BOB_WALLET.to_string(),
            amount: 5,
            token: "VERY".to_string(),
            message: None,
        })
        .await
        .unwrap();

    let chain = Arc::new(MockChain::happy(ConfirmBehavior::OkAfter(
        Duration::from_millis(20),
    )));
    let service = service_with(
        store.clone(),
        chain,
        ModerationAction::Allow,
        fast_queue(),
    );

    let recovered = service.recover_open().await.unwrap();
    assert_eq!(recovered, 1);

    let record = wait_for_status(&store, &seeded.id, TipStatus::Confirmed).await;
    assert!(record.transaction_hash.is_some());
}
