//! Token-based distributed lock.
//!
//! Each acquisition attempt writes a fresh random token with a TTL through a
//! conditional set. Only the holder of that token can release the record, so
//! a holder whose lock already expired can never delete its successor's.
//!
//! ```rust,ignore
//! let lock = DistributedLock::new(Arc::new(RedisLockStore::new(redis)));
//! if let Some(guard) = lock.acquire("order:42", Duration::from_secs(5), &cancel).await? {
//!     charge(order).await?;
//!     guard.release().await;
//! }
//! ```

mod store;

pub use self::store::{LockStore, MemoryLockStore, RedisLockStore};

use core_config::LockSettings;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::LockError;

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    settings: LockSettings,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_settings(store, LockSettings::default())
    }

    pub fn with_settings(store: Arc<dyn LockStore>, settings: LockSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    fn key(&self, resource: &str) -> String {
        format!("{}{}", self.settings.prefix, resource)
    }

    /// Delay before retry number `retry` (0-based).
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let ms = self
            .settings
            .retry_initial_ms
            .saturating_mul(factor)
            .min(self.settings.retry_max_ms);
        Duration::from_millis(ms)
    }

    async fn attempt(&self, resource: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        if ttl.as_millis() == 0 {
            return Err(LockError::InvalidTtl(ttl));
        }

        let token = Uuid::new_v4().to_string();
        if self.store.set_if_absent(&self.key(resource), &token, ttl).await? {
            counter!("coordination_lock_acquired_total").increment(1);
            debug!(resource = %resource, ttl_ms = ttl.as_millis() as u64, "Acquired lock");
            Ok(Some(LockGuard {
                lock: self.clone(),
                resource: resource.to_string(),
                token,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// One attempt, no retry. Store errors are logged and reported as `None`.
    pub async fn try_acquire(&self, resource: &str, ttl: Duration) -> Option<LockGuard> {
        match self.attempt(resource, ttl).await {
            Ok(guard) => {
                if guard.is_none() {
                    counter!("coordination_lock_contended_total").increment(1);
                }
                guard
            }
            Err(e) => {
                error!(resource = %resource, error = %e, "Lock attempt failed");
                None
            }
        }
    }

    /// Acquire with exponential backoff between attempts.
    ///
    /// Returns `Ok(None)` once every attempt found the lock held, and
    /// `Err(LockError::Cancelled)` if `cancel` fires first. Store errors
    /// count as a failed attempt.
    pub async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockGuard>, LockError> {
        if ttl.as_millis() == 0 {
            return Err(LockError::InvalidTtl(ttl));
        }

        let attempts = self.settings.retry_attempts.max(1);
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }

            match self.attempt(resource, ttl).await {
                Ok(Some(guard)) => return Ok(Some(guard)),
                Ok(None) => {}
                Err(e) => warn!(
                    resource = %resource,
                    attempt = attempt + 1,
                    error = %e,
                    "Lock attempt failed"
                ),
            }

            if attempt + 1 == attempts {
                break;
            }

            let delay = self.backoff(attempt);
            debug!(
                resource = %resource,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Lock held, retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LockError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        counter!("coordination_lock_contended_total").increment(1);
        debug!(resource = %resource, attempts = attempts, "Lock not acquired");
        Ok(None)
    }

    /// Delete the record only if it still holds `token`.
    pub async fn release(&self, resource: &str, token: &str) -> bool {
        match self.store.compare_and_delete(&self.key(resource), token).await {
            Ok(true) => {
                debug!(resource = %resource, "Released lock");
                true
            }
            Ok(false) => {
                counter!("coordination_lock_release_mismatch_total").increment(1);
                warn!(resource = %resource, "Lock release skipped: token mismatch or expired");
                false
            }
            Err(e) => {
                error!(resource = %resource, error = %e, "Failed to release lock");
                false
            }
        }
    }
}

/// A held lock. Released by [`release`](Self::release), or on drop.
pub struct LockGuard {
    lock: DistributedLock,
    resource: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn release(mut self) -> bool {
        self.released = true;
        self.lock.release(&self.resource, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let lock = self.lock.clone();
        let resource = std::mem::take(&mut self.resource);
        let token = std::mem::take(&mut self.token);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    lock.release(&resource, &token).await;
                });
            }
            Err(_) => warn!(
                resource = %resource,
                "Lock guard dropped outside a runtime; record expires by TTL"
            ),
        }
    }
}
