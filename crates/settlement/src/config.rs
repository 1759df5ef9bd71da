use queue::QueueConfig;
use std::env;
use std::time::Duration;

/// Settlement tuning, read from the environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Platform ceiling on a single tip, in minor units
    pub max_amount: i64,
    /// Bounded wait for the worker's receipt race
    pub confirmation_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_amount: 1_000_000_000,
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_amount: env_parse("TIP_MAX_AMOUNT", defaults.max_amount),
            confirmation_timeout: Duration::from_secs(env_parse(
                "CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout.as_secs(),
            )),
        }
    }
}

/// Queue tuning from the environment.
pub fn queue_config_from_env() -> QueueConfig {
    let defaults = QueueConfig::default();
    QueueConfig {
        concurrency: env_parse("WORKER_CONCURRENCY", defaults.concurrency),
        max_attempts: env_parse("SETTLEMENT_MAX_ATTEMPTS", defaults.max_attempts),
        retry_base: Duration::from_millis(env_parse(
            "SETTLEMENT_RETRY_BASE_MS",
            defaults.retry_base.as_millis() as u64,
        )),
        capacity: defaults.capacity,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
