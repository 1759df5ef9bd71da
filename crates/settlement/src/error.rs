use thiserror::Error;

/// Intake-side error taxonomy. Worker-side errors propagate to the queue as
/// `anyhow::Error` (wrapped in `queue::Fatal` when not retriable) because
/// the queue owns retry, backoff, and dead-letter policy.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("message blocked by moderation: {0}")]
    ContentFlagged(String),

    #[error("identity resolution failed: {0}")]
    UserResolution(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to enqueue settlement job: {0}")]
    QueueEnqueue(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Stable error code surfaced to front ends.
    pub fn error_code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "VALIDATION_ERROR",
            SettlementError::ContentFlagged(_) => "CONTENT_FLAGGED",
            SettlementError::UserResolution(_) => "USER_RESOLUTION_FAILED",
            SettlementError::Database(_) => "DATABASE_ERROR",
            SettlementError::QueueEnqueue(_) => "QUEUE_ERROR",
            SettlementError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
