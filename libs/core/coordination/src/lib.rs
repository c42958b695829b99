//! Cross-worker coordination primitives.
//!
//! - [`DistributedLock`]: token-based mutual exclusion with TTL, backed by
//!   Redis (`SET NX PX` plus a compare-and-delete script) or memory
//! - [`AdaptiveRouter`]: load-adaptive fast path with a safe fallback

mod error;
pub mod lock;
mod router;

pub use error::{LockError, RouteError};
pub use lock::{DistributedLock, LockGuard, LockStore, MemoryLockStore, RedisLockStore};
pub use router::{AdaptiveRouter, RouterStats};

pub use core_config::{LockSettings, RouterSettings};
