//! Shared test utilities for the queue and coordination crates.
//!
//! - `TestRedis`: Redis container with automatic cleanup
//! - `TestDataBuilder`: deterministic, per-test queue and resource names
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let names = TestDataBuilder::from_test_name("my_redis_test");
//!     let queue = names.queue("email");
//!     let mut conn = redis.connection();
//! }
//! ```

use uuid::Uuid;

mod redis;

pub use redis::TestRedis;

/// Deterministic naming so tests sharing a container never see each other's keys.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test name, so reruns produce the same names.
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// A queue name unique to this builder, e.g. `test-email-1234`.
    pub fn queue(&self, prefix: &str) -> String {
        format!("test-{}-{}", prefix, self.seed)
    }

    /// A lock resource name unique to this builder.
    pub fn resource(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    /// Deterministic identifier for payload fields such as payment ids.
    pub fn id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }
}
