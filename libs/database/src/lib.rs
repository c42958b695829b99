//! Redis connection management shared by the queue, lock and cache adapters.
//!
//! ```ignore
//! use database::redis;
//! use database::common::RetryConfig;
//!
//! let config = core_config::RedisConfig::from_env()?;
//! let conn = redis::connect_from_config_with_retry(&config, Some(RetryConfig::new())).await?;
//! ```

pub mod common;
pub mod redis;

pub use common::RetryConfig;
