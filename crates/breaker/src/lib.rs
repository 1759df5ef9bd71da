//! Circuit breaker for remote dependencies
//!
//! Each protected dependency (chain RPC, content store, moderation API,
//! database) gets its own `CircuitBreaker` instance with independent tuning.
//! CLOSED passes calls through and records failures into a sliding window;
//! OPEN rejects calls without touching the network until the reset timeout
//! elapses; HALF_OPEN admits a bounded number of trial calls.

use anyhow::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Dependency is failing, calls are rejected immediately
    Open,
    /// Testing recovery with a bounded trial budget
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker '{name}' is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },
}

/// Tuning for a single breaker instance
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures inside `monitoring_period` that trip the breaker
    pub failure_threshold: usize,
    /// Length of the sliding failure window
    pub monitoring_period: Duration,
    /// Cool-down after the last failure before half-open trials start
    pub reset_timeout: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_calls: usize,
}

impl BreakerConfig {
    /// Chain RPC: remote calls are expensive and slow to retry, so trip
    /// early and cool down for a long time.
    pub fn chain_rpc() -> Self {
        Self {
            failure_threshold: 4,
            monitoring_period: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(120),
            half_open_max_calls: 1,
        }
    }

    pub fn content_store() -> Self {
        Self {
            failure_threshold: 5,
            monitoring_period: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }

    pub fn moderation() -> Self {
        Self {
            failure_threshold: 5,
            monitoring_period: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }

    /// Database: local hiccups are transient, so tolerate more failures and
    /// recover quickly.
    pub fn database() -> Self {
        Self {
            failure_threshold: 10,
            monitoring_period: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(15),
            half_open_max_calls: 3,
        }
    }
}

/// Observability snapshot
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub last_failure_age: Option<Duration>,
    pub half_open_calls: usize,
    pub total_calls: u64,
    pub total_rejected: u64,
}

struct Inner {
    state: CircuitState,
    /// Failure timestamps inside the monitoring period, pruned lazily
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    half_open_calls: usize,
    half_open_failed: bool,
    total_calls: u64,
    total_rejected: u64,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Arc<RwLock<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(RwLock::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                last_failure: None,
                half_open_calls: 0,
                half_open_failed: false,
                total_calls: 0,
                total_rejected: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker. While OPEN the call is rejected with
    /// `BreakerError::Open` without invoking `op`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit().await?;

        match op().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Admission check: prunes the window, applies OPEN -> HALF_OPEN after
    /// the reset timeout, and enforces the half-open trial budget.
    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        self.prune(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.total_calls += 1;
                Ok(())
            }
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| now.duration_since(t))
                    .unwrap_or(self.config.reset_timeout);
                if elapsed >= self.config.reset_timeout {
                    info!("circuit breaker '{}' entering half-open", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 1;
                    inner.half_open_failed = false;
                    inner.total_calls += 1;
                    Ok(())
                } else {
                    inner.total_rejected += 1;
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_in: self.config.reset_timeout - elapsed,
                    }
                    .into())
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    inner.total_calls += 1;
                    Ok(())
                } else {
                    inner.total_rejected += 1;
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_in: self.config.reset_timeout,
                    }
                    .into())
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::HalfOpen
            && !inner.half_open_failed
            && inner.half_open_calls >= self.config.half_open_max_calls
        {
            info!("circuit breaker '{}' closed after recovery", self.name);
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.last_failure = None;
            inner.half_open_calls = 0;
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                if inner.failures.len() >= self.config.failure_threshold {
                    warn!(
                        "circuit breaker '{}' opened after {} failures in {:?}",
                        self.name,
                        inner.failures.len(),
                        self.config.monitoring_period
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during a trial reopens immediately
                warn!(
                    "circuit breaker '{}' reopened after half-open failure",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.half_open_failed = true;
                inner.half_open_calls = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some(front) = inner.failures.front() {
            if now.duration_since(*front) > self.config.monitoring_period {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        self.prune(&mut inner, now);
        // Surface the pending OPEN -> HALF_OPEN transition to observers
        if inner.state == CircuitState::Open {
            if let Some(t) = inner.last_failure {
                if now.duration_since(t) >= self.config.reset_timeout {
                    return CircuitState::HalfOpen;
                }
            }
        }
        inner.state
    }

    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.read().await;
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            last_failure_age: inner.last_failure.map(|t| t.elapsed()),
            half_open_calls: inner.half_open_calls,
            total_calls: inner.total_calls,
            total_rejected: inner.total_rejected,
        }
    }

    /// Manual operator override: force the breaker closed and clear history.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        info!("circuit breaker '{}' manually reset", self.name);
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.last_failure = None;
        inner.half_open_calls = 0;
        inner.half_open_failed = false;
    }
}
