//! Queue and handler error types.
//!
//! [`QueueError`] is what producers and the runtime see from the broker.
//! [`JobError`] is what handlers return; its [`ErrorCategory`] decides whether
//! the entry is left for redelivery or dead-lettered right away.

use thiserror::Error;

/// How the runtime treats a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Leave unacknowledged; another delivery happens after the visibility timeout.
    Transient,
    /// Cannot succeed on retry; dead-letter immediately.
    Permanent,
    /// Downstream throttling; treated like `Transient` but counted separately.
    RateLimited,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::RateLimited => "rate_limited",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }
}

/// Broker-level failures.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker unreachable or a command failed.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The consumer group disappeared (stream deleted or never created).
    #[error("Consumer group '{group}' does not exist on queue '{queue}'")]
    NoGroup { queue: String, group: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue name must not be empty")]
    InvalidQueueName,

    #[error("Delay of {0:?} is out of range")]
    InvalidDelay(std::time::Duration),

    /// A stream entry without the expected fields.
    #[error("Malformed entry {id}: {reason}")]
    MalformedEntry { id: String, reason: String },
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// Failure reported by a [`JobHandler`](crate::JobHandler).
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{message}")]
    Failed {
        message: String,
        category: ErrorCategory,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Follow-up enqueue or other broker call made from inside a handler.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl JobError {
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Failed {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Failed {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        JobError::RateLimited(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            JobError::Failed { category, .. } => *category,
            JobError::RateLimited(_) => ErrorCategory::RateLimited,
            JobError::Queue(QueueError::Serialization(_)) => ErrorCategory::Permanent,
            JobError::Queue(_) => ErrorCategory::Transient,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::permanent(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_categories() {
        assert_eq!(JobError::transient("x").category(), ErrorCategory::Transient);
        assert_eq!(JobError::permanent("x").category(), ErrorCategory::Permanent);
        assert_eq!(
            JobError::rate_limited("x").category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            JobError::from(QueueError::Unavailable("down".into())).category(),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_only_permanent_is_not_retryable() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::RateLimited.is_retryable());
        assert!(!ErrorCategory::Permanent.is_retryable());
    }

    #[test]
    fn test_serde_error_is_permanent() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(JobError::from(err).category(), ErrorCategory::Permanent);
    }
}
