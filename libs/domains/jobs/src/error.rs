use stream_queue::{JobError, QueueError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    /// The job can never succeed as written.
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider rejected request: {0}")]
    Rejected(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Resource busy: {0}")]
    Busy(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<redis::RedisError> for DomainError {
    fn from(err: redis::RedisError) -> Self {
        DomainError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Validation(err.to_string())
    }
}

/// Validation and rejections dead-letter; everything else is retried.
impl From<DomainError> for JobError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(_) | DomainError::Rejected(_) => {
                JobError::permanent(err.to_string())
            }
            DomainError::RateLimited(msg) => JobError::rate_limited(msg),
            DomainError::Queue(e) => JobError::Queue(e),
            DomainError::Provider(_) | DomainError::Cache(_) | DomainError::Busy(_) => {
                JobError::transient(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_queue::ErrorCategory;

    #[test]
    fn test_job_error_categories() {
        let cases = [
            (DomainError::Validation("x".into()), ErrorCategory::Permanent),
            (DomainError::Rejected("card declined".into()), ErrorCategory::Permanent),
            (DomainError::Provider("503".into()), ErrorCategory::Transient),
            (DomainError::Busy("payment:1".into()), ErrorCategory::Transient),
            (DomainError::RateLimited("slow down".into()), ErrorCategory::RateLimited),
        ];
        for (err, expected) in cases {
            assert_eq!(JobError::from(err).category(), expected);
        }
    }
}
