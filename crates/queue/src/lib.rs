//! Settlement job queue and worker pool
//!
//! A FIFO at-least-once queue of settlement jobs consumed by a bounded pool
//! of workers. Failed jobs are requeued with exponentially increasing delay
//! up to the attempt budget, then dead-lettered through the handler's hook.
//! A given tip id is never processed by two workers concurrently.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Delay before re-offering a job whose tip is already being processed
const CONFLICT_REQUEUE_DELAY: Duration = Duration::from_millis(100);

/// A settlement job. Transient; lives only inside the queue until
/// acknowledged or dead-lettered.
#[derive(Debug, Clone)]
pub struct SettlementJob {
    pub tip_id: String,
    pub attempt: u32,
}

impl SettlementJob {
    pub fn new(tip_id: impl Into<String>) -> Self {
        Self {
            tip_id: tip_id.into(),
            attempt: 1,
        }
    }

    fn next_attempt(&self) -> Self {
        Self {
            tip_id: self.tip_id.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Marker for errors that must not be retried (e.g. a malformed address).
/// Wrapping a job error in `Fatal` dead-letters it immediately.
#[derive(Debug, thiserror::Error)]
#[error("fatal: {0}")]
pub struct Fatal(pub String);

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one settlement attempt. An `Err` engages the retry policy.
    async fn run(&self, job: &SettlementJob) -> Result<()>;

    /// Called once when a job exhausts its attempts or fails fatally.
    async fn on_dead_letter(&self, job: &SettlementJob, error: &anyhow::Error);
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrent workers; bounds load on RPC and database dependencies
    pub concurrency: usize,
    /// Attempts per job before dead-lettering
    pub max_attempts: u32,
    /// Base retry delay, doubled per attempt with jitter
    pub retry_base: Duration,
    /// Channel capacity
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            retry_base: Duration::from_secs(2),
            capacity: 1024,
        }
    }
}

/// A job removed from active retry, kept for out-of-band inspection
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: SettlementJob,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueStatsAtomic {
    enqueued: AtomicU64,
    processed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    in_flight: AtomicUsize,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub processed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub in_flight: usize,
}

#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<SettlementJob>,
    config: QueueConfig,
    stats: Arc<QueueStatsAtomic>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl JobQueue {
    /// Start the dispatcher and worker pool for the lifetime of the
    /// process.
    pub fn start(handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity);
        let stats = Arc::new(QueueStatsAtomic::default());
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let queue = Self {
            sender,
            config: config.clone(),
            stats: Arc::clone(&stats),
            dead_letters: Arc::clone(&dead_letters),
        };

        let dispatcher = Dispatcher {
            handler,
            config,
            stats,
            dead_letters,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            retry_sender: queue.sender.clone(),
        };
        tokio::spawn(dispatcher.run(receiver));

        queue
    }

    pub async fn enqueue(&self, job: SettlementJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("Settlement queue is closed"))?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            dead_lettered: self.stats.dead_lettered.load(Ordering::Relaxed),
            in_flight: self.stats.in_flight.load(Ordering::Relaxed),
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

struct Dispatcher {
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    stats: Arc<QueueStatsAtomic>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    /// Tip ids currently being processed; queue-level exclusivity guarantee
    in_flight: Arc<Mutex<HashSet<String>>>,
    retry_sender: mpsc::Sender<SettlementJob>,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::Receiver<SettlementJob>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        debug!(
            "Settlement queue started with {} workers, {} attempts",
            self.config.concurrency, self.config.max_attempts
        );

        while let Some(job) = receiver.recv().await {
            // A tip already being processed is re-offered later rather than
            // run concurrently.
            if !self.in_flight.lock().insert(job.tip_id.clone()) {
                debug!("Tip {} already in flight, re-offering job", job.tip_id);
                let sender = self.retry_sender.clone();
                tokio::spawn(async move {
                    sleep(CONFLICT_REQUEUE_DELAY).await;
                    if sender.send(job).await.is_err() {
                        warn!("Settlement queue closed while re-offering job");
                    }
                });
                continue;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            self.stats.in_flight.fetch_add(1, Ordering::Relaxed);

            let handler = Arc::clone(&self.handler);
            let stats = Arc::clone(&self.stats);
            let dead_letters = Arc::clone(&self.dead_letters);
            let in_flight = Arc::clone(&self.in_flight);
            let retry_sender = self.retry_sender.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                let result = handler.run(&job).await;

                match result {
                    Ok(()) => {
                        debug!(
                            "Settlement job for tip {} succeeded on attempt {}",
                            job.tip_id, job.attempt
                        );
                        stats.processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let fatal = e.downcast_ref::<Fatal>().is_some();
                        if !fatal && job.attempt < config.max_attempts {
                            let delay = retry_delay(&config, job.attempt);
                            warn!(
                                "Settlement job for tip {} failed on attempt {}/{}: {}. Retrying in {:?}",
                                job.tip_id, job.attempt, config.max_attempts, e, delay
                            );
                            stats.retried.fetch_add(1, Ordering::Relaxed);
                            let retry = job.next_attempt();
                            tokio::spawn(async move {
                                sleep(delay).await;
                                if retry_sender.send(retry).await.is_err() {
                                    warn!("Settlement queue closed while scheduling retry");
                                }
                            });
                        } else {
                            error!(
                                "Settlement job for tip {} dead-lettered after attempt {}: {}",
                                job.tip_id, job.attempt, e
                            );
                            stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                            handler.on_dead_letter(&job, &e).await;
                            dead_letters.lock().push(DeadLetter {
                                job: job.clone(),
                                error: e.to_string(),
                                at: Utc::now(),
                            });
                        }
                    }
                }

                in_flight.lock().remove(&job.tip_id);
                stats.in_flight.fetch_sub(1, Ordering::Relaxed);
                drop(permit);
            });
        }
        debug!("Settlement queue dispatcher stopped");
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1) plus up to a
/// quarter of the base, so successive delays are strictly increasing.
fn retry_delay(config: &QueueConfig, attempt: u32) -> Duration {
    let base_ms = config.retry_base.as_millis() as u64;
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter = fastrand::u64(0..=base_ms / 4);
    Duration::from_millis(exponential + jitter)
}
