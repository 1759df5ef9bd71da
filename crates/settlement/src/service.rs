//! Settlement orchestrator
//!
//! Drives each tip from intake through message upload, relayed submission,
//! and confirmation to a terminal state. Two independent paths can confirm a
//! tip: the worker's bounded receipt wait and the on-chain event listener.
//! Both apply guarded status transitions, so whichever arrives first wins
//! and the other is a no-op.

use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::identity::IdentityApi;
use crate::moderation::{ModerationAction, ModerationApi};
use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use db::{NewTip, TipRecord, TipStore};
use ethereum::{ChainEvent, TipSubmission, next_nonce, parse_address};
use parking_lot::Mutex;
use queue::{DeadLetter, Fatal, JobHandler, JobQueue, QueueConfig, QueueStats, SettlementJob};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Chain capability the orchestrator needs; implemented by the ethereum
/// gateway and by mocks in tests.
#[async_trait]
pub trait TipChain: Send + Sync {
    fn resolve_token(&self, symbol: &str) -> Result<Address>;
    async fn submit_tip(&self, tip: &TipSubmission) -> Result<String>;
    async fn wait_for_confirmation(&self, tx_hash: &str, timeout: Duration) -> Result<()>;
    async fn confirmed_tip_count(&self, sender: Address) -> Result<u64>;
}

/// Content store capability: upload a message, get back its content id.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put_message(&self, message: &str) -> Result<String>;
}

/// Best-effort consumer of confirmed tips (badges, cache invalidation,
/// notifications). Failures are logged, never rolled back.
#[async_trait]
pub trait ConfirmationHook: Send + Sync {
    async fn on_confirmed(&self, record: &TipRecord) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipRequest {
    pub sender_id: String,
    pub recipient_id: String,
    /// Amount in the token's minor units
    pub amount: i64,
    pub token: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessTipResponse {
    pub success: bool,
    pub tip_id: Option<String>,
    pub error_code: Option<&'static str>,
    pub error: Option<String>,
}

impl ProcessTipResponse {
    fn accepted(tip_id: String) -> Self {
        Self {
            success: true,
            tip_id: Some(tip_id),
            error_code: None,
            error: None,
        }
    }

    fn rejected(error: SettlementError) -> Self {
        Self {
            success: false,
            tip_id: None,
            error_code: Some(error.error_code()),
            error: Some(error.to_string()),
        }
    }
}

pub struct SettlementDeps {
    pub store: Arc<dyn TipStore>,
    pub chain: Arc<dyn TipChain>,
    pub content: Arc<dyn ContentStore>,
    pub moderation: Arc<dyn ModerationApi>,
    pub identity: Arc<dyn IdentityApi>,
}

struct Inner {
    store: Arc<dyn TipStore>,
    chain: Arc<dyn TipChain>,
    content: Arc<dyn ContentStore>,
    moderation: Arc<dyn ModerationApi>,
    identity: Arc<dyn IdentityApi>,
    config: SettlementConfig,
    hooks: Mutex<Vec<Arc<dyn ConfirmationHook>>>,
}

pub struct SettlementService {
    inner: Arc<Inner>,
    queue: JobQueue,
}

impl SettlementService {
    pub fn new(deps: SettlementDeps, config: SettlementConfig, queue_config: QueueConfig) -> Self {
        let inner = Arc::new(Inner {
            store: deps.store,
            chain: deps.chain,
            content: deps.content,
            moderation: deps.moderation,
            identity: deps.identity,
            config,
            hooks: Mutex::new(Vec::new()),
        });
        let queue = JobQueue::start(
            Arc::new(SettlementWorker {
                inner: Arc::clone(&inner),
            }),
            queue_config,
        );
        Self { inner, queue }
    }

    /// Synchronous accept/reject. On accept the tip record exists with
    /// status PENDING and a settlement job is queued; confirmation happens
    /// asynchronously.
    pub async fn process_tip(&self, request: TipRequest) -> ProcessTipResponse {
        let record = match self.inner.intake(&request).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Rejected tip from {}: {}", request.sender_id, e);
                return ProcessTipResponse::rejected(e);
            }
        };

        if let Err(e) = self.queue.enqueue(SettlementJob::new(&record.id)).await {
            // An unqueueable job can never settle
            error!("Failed to enqueue settlement job for tip {}: {}", record.id, e);
            if let Err(mark_err) = self.inner.store.mark_failed(&record.id).await {
                error!("Failed to mark tip {} FAILED: {}", record.id, mark_err);
            }
            return ProcessTipResponse::rejected(SettlementError::QueueEnqueue(e.to_string()));
        }

        info!(
            "Accepted tip {} from {} to {} ({} {})",
            record.id, record.sender_id, record.recipient_id, record.amount, record.token
        );
        ProcessTipResponse::accepted(record.id)
    }

    /// Polling endpoint.
    pub async fn tip_status(&self, tip_id: &str) -> Result<Option<TipRecord>> {
        self.inner.store.find(tip_id).await
    }

    pub fn register_confirmation_hook(&self, hook: Arc<dyn ConfirmationHook>) {
        self.inner.hooks.lock().push(hook);
    }

    /// Handler for decoded on-chain events, to be wired into an event
    /// subscription. Spawns so the event stream is never blocked.
    pub fn event_handler(&self) -> impl Fn(ChainEvent) + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move |event| {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner.handle_chain_event(event).await;
            });
        }
    }

    /// Re-enqueue every non-terminal tip; the durable record rows are the
    /// source of truth across restarts.
    pub async fn recover_open(&self) -> Result<usize> {
        let open = self
            .inner
            .store
            .list_open()
            .await
            .map_err(|e| anyhow::anyhow!("Recovery scan failed: {}", e))?;
        let count = open.len();
        for record in open {
            self.queue.enqueue(SettlementJob::new(&record.id)).await?;
        }
        if count > 0 {
            info!("Re-enqueued {} open tips for settlement", count);
        }
        Ok(count)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }
}

impl Inner {
    /// Intake: validate, resolve both parties, moderate, persist PENDING.
    async fn intake(&self, request: &TipRequest) -> Result<TipRecord, SettlementError> {
        validate(request, self.config.max_amount)?;

        let sender = self
            .identity
            .resolve_or_provision(&request.sender_id)
            .await
            .map_err(|e| {
                SettlementError::UserResolution(format!("sender {}: {}", request.sender_id, e))
            })?;
        let recipient = self
            .identity
            .resolve_or_provision(&request.recipient_id)
            .await
            .map_err(|e| {
                SettlementError::UserResolution(format!(
                    "recipient {}: {}",
                    request.recipient_id, e
                ))
            })?;

        // Moderation runs before any persistence; a blocked message leaves
        // no trace in the store.
        if let Some(message) = &request.message {
            let verdict = self.moderation.check(message).await.map_err(|e| {
                SettlementError::Internal(format!("moderation check failed: {}", e))
            })?;
            match verdict.action {
                ModerationAction::Block => {
                    return Err(SettlementError::ContentFlagged(
                        verdict
                            .reason
                            .unwrap_or_else(|| "blocked by moderation".to_string()),
                    ));
                }
                ModerationAction::Warn => {
                    warn!(
                        "Tip message from {} flagged with score {:.2}: {}",
                        request.sender_id,
                        verdict.toxicity_score,
                        verdict.reason.as_deref().unwrap_or("no reason given")
                    );
                }
                ModerationAction::Allow => {}
            }
        }

        self.store
            .insert(NewTip {
                sender_id: request.sender_id.clone(),
                recipient_id: request.recipient_id.clone(),
                sender_wallet: sender.wallet_address,
                recipient_wallet: recipient.wallet_address,
                amount: request.amount,
                token: request.token.clone(),
                message: request.message.clone(),
            })
            .await
            .map_err(|e| SettlementError::Database(e.to_string()))
    }

    /// One settlement attempt for a tip. Errors propagate to the queue's
    /// retry policy; `Fatal` errors dead-letter immediately.
    async fn settle_tip(&self, tip_id: &str) -> Result<()> {
        let record = self
            .store
            .find(tip_id)
            .await?
            .ok_or_else(|| Fatal(format!("tip {} not found", tip_id)))?;

        if record.status.is_terminal() {
            debug!("Tip {} already {}, nothing to settle", record.id, record.status);
            return Ok(());
        }

        // Upload the message if present and not yet uploaded. A failure
        // here leaves the record PENDING with an empty message hash and
        // engages the job retry budget.
        let mut content_id = record.message_hash.clone();
        if content_id.is_empty() {
            if let Some(message) = &record.message {
                content_id = self.content.put_message(message).await?;
                self.store.set_message_hash(&record.id, &content_id).await?;
                debug!("Uploaded message for tip {} as {}", record.id, content_id);
            }
        }

        // Malformed addresses or unknown tokens can never succeed
        let from =
            parse_address(&record.sender_wallet).map_err(|e| Fatal(e.to_string()))?;
        let to =
            parse_address(&record.recipient_wallet).map_err(|e| Fatal(e.to_string()))?;
        let token = self
            .chain
            .resolve_token(&record.token)
            .map_err(|e| Fatal(e.to_string()))?;

        let confirmed = self.chain.confirmed_tip_count(from).await?;
        let nonce = next_nonce(confirmed, Utc::now());

        let submission = TipSubmission {
            from,
            to,
            token,
            amount: U256::from(record.amount.unsigned_abs()),
            content_id: content_id.clone(),
            nonce,
        };
        let tx_hash = self.chain.submit_tip(&submission).await?;

        if self.store.mark_submitted(&record.id, &tx_hash).await? {
            info!("Tip {} submitted, tx {}", record.id, tx_hash);
        } else {
            debug!("Tip {} already past PENDING, tx {}", record.id, tx_hash);
        }

        // Bounded receipt race; a timeout throws into the retry cycle. The
        // event listener may confirm the tip first, which is fine.
        self.chain
            .wait_for_confirmation(&tx_hash, self.config.confirmation_timeout)
            .await?;

        if self
            .store
            .mark_confirmed(&record.id, &tx_hash, Utc::now())
            .await?
        {
            info!("Tip {} confirmed via receipt wait, tx {}", record.id, tx_hash);
            self.fire_hooks(&record.id).await;
        }
        Ok(())
    }

    /// Event correlation: look up a non-terminal record matching the event
    /// and confirm it at most once. Errors are logged and swallowed so the
    /// event stream is never blocked.
    async fn handle_chain_event(&self, event: ChainEvent) {
        let sender_wallet = format!("{:?}", event.from);
        let recipient_wallet = format!("{:?}", event.to);

        match self
            .store
            .find_open_match(&sender_wallet, &recipient_wallet, &event.content_id)
            .await
        {
            Ok(Some(record)) => {
                match self
                    .store
                    .mark_confirmed(&record.id, &event.tx_hash, Utc::now())
                    .await
                {
                    Ok(true) => {
                        info!("Tip {} confirmed by on-chain event, tx {}", record.id, event.tx_hash);
                        self.fire_hooks(&record.id).await;
                    }
                    Ok(false) => {
                        debug!("Tip {} already terminal, duplicate event dropped", record.id);
                    }
                    Err(e) => {
                        warn!("Failed to confirm tip {} from event: {}", record.id, e);
                    }
                }
            }
            Ok(None) => {
                debug!("No open tip matches event tx {}, dropping", event.tx_hash);
            }
            Err(e) => {
                warn!("Event correlation lookup failed for tx {}: {}", event.tx_hash, e);
            }
        }
    }

    /// Fire-and-forget side effects; individual failures never roll back
    /// the confirmation.
    async fn fire_hooks(&self, tip_id: &str) {
        let record = match self.store.find(tip_id).await {
            Ok(Some(record)) => record,
            _ => return,
        };
        let hooks = self.hooks.lock().clone();
        for hook in hooks {
            let record = record.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.on_confirmed(&record).await {
                    warn!("Confirmation hook failed for tip {}: {}", record.id, e);
                }
            });
        }
    }
}

struct SettlementWorker {
    inner: Arc<Inner>,
}

#[async_trait]
impl JobHandler for SettlementWorker {
    async fn run(&self, job: &SettlementJob) -> Result<()> {
        self.inner.settle_tip(&job.tip_id).await
    }

    async fn on_dead_letter(&self, job: &SettlementJob, error: &anyhow::Error) {
        error!(
            "Settlement for tip {} exhausted after attempt {}: {}",
            job.tip_id, job.attempt, error
        );
        match self.inner.store.mark_failed(&job.tip_id).await {
            Ok(true) => {}
            Ok(false) => debug!("Tip {} already terminal, not marking FAILED", job.tip_id),
            Err(e) => error!("Failed to mark tip {} FAILED: {}", job.tip_id, e),
        }
    }
}

fn validate(request: &TipRequest, max_amount: i64) -> Result<(), SettlementError> {
    if request.sender_id.trim().is_empty() {
        return Err(SettlementError::Validation(
            "sender id must not be empty".to_string(),
        ));
    }
    if request.recipient_id.trim().is_empty() {
        return Err(SettlementError::Validation(
            "recipient id must not be empty".to_string(),
        ));
    }
    if request.sender_id == request.recipient_id {
        return Err(SettlementError::Validation(
            "sender and recipient must differ".to_string(),
        ));
    }
    if request.amount <= 0 {
        return Err(SettlementError::Validation(
            "amount must be positive".to_string(),
        ));
    }
    if request.amount > max_amount {
        return Err(SettlementError::Validation(format!(
            "amount exceeds platform ceiling of {}",
            max_amount
        )));
    }
    if request.token.trim().is_empty() {
        return Err(SettlementError::Validation(
            "token must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TipRequest {
        TipRequest {
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            amount: 5,
            token: "VERY".to_string(),
            message: None,
        }
    }

    #[test]
    fn validate_accepts_wellformed_request() {
        assert!(validate(&request(), 1_000).is_ok());
    }

    #[test]
    fn validate_rejects_bad_input() {
        let mut r = request();
        r.sender_id = "".to_string();
        assert_eq!(
            validate(&r, 1_000).unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );

        let mut r = request();
        r.recipient_id = "alice".to_string();
        assert!(validate(&r, 1_000).is_err());

        let mut r = request();
        r.amount = 0;
        assert!(validate(&r, 1_000).is_err());

        let mut r = request();
        r.amount = 2_000;
        assert!(validate(&r, 1_000).is_err());

        let mut r = request();
        r.token = " ".to_string();
        assert!(validate(&r, 1_000).is_err());
    }
}
