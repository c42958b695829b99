use redis::RedisError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock store unavailable: {0}")]
    Store(String),

    #[error("Lock acquisition cancelled")]
    Cancelled,

    #[error("Invalid lock TTL: {0:?}")]
    InvalidTtl(Duration),
}

impl From<RedisError> for LockError {
    fn from(err: RedisError) -> Self {
        LockError::Store(err.to_string())
    }
}

/// Returned by [`AdaptiveRouter::route_cancellable`](crate::AdaptiveRouter::route_cancellable).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError<E> {
    #[error("Routing cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(E),
}

impl<E> RouteError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            RouteError::Cancelled => None,
            RouteError::Failed(e) => Some(e),
        }
    }
}
