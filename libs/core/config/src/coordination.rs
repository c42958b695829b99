use crate::{env_or_default, env_parse, ConfigError, FromEnv};

/// Distributed lock acquisition settings.
#[derive(Clone, Debug, PartialEq)]
pub struct LockSettings {
    /// Prefix prepended to every resource name to form the key.
    pub prefix: String,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Total attempts, including the first one.
    pub retry_attempts: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            prefix: "lock:".to_string(),
            retry_initial_ms: 100,
            retry_max_ms: 1000,
            retry_attempts: 10,
        }
    }
}

impl FromEnv for LockSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = Self {
            prefix: env_or_default("LOCK_PREFIX", &defaults.prefix),
            retry_initial_ms: env_parse("LOCK_RETRY_INITIAL_MS", defaults.retry_initial_ms)?,
            retry_max_ms: env_parse("LOCK_RETRY_MAX_MS", defaults.retry_max_ms)?,
            retry_attempts: env_parse("LOCK_RETRY_ATTEMPTS", defaults.retry_attempts)?.max(1),
        };

        if settings.retry_max_ms < settings.retry_initial_ms {
            return Err(ConfigError::InvalidValue {
                key: "LOCK_RETRY_MAX_MS".to_string(),
                details: "must not be lower than LOCK_RETRY_INITIAL_MS".to_string(),
            });
        }

        Ok(settings)
    }
}

/// Adaptive router tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterSettings {
    /// Load factor at which the fast path drops to its floor probability.
    pub threshold: f64,
    /// EMA smoothing weight given to each new observation.
    pub alpha: f64,
    /// Latency that counts as full load.
    pub latency_scale_ms: f64,
    /// Minimum fast-path probability.
    pub fast_path_floor: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            alpha: 0.1,
            latency_scale_ms: 100.0,
            fast_path_floor: 0.1,
        }
    }
}

impl FromEnv for RouterSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = Self {
            threshold: env_parse("ROUTER_THRESHOLD", defaults.threshold)?,
            alpha: env_parse("ROUTER_ALPHA", defaults.alpha)?,
            latency_scale_ms: env_parse("ROUTER_LATENCY_SCALE_MS", defaults.latency_scale_ms)?,
            fast_path_floor: env_parse("ROUTER_FAST_PATH_FLOOR", defaults.fast_path_floor)?,
        };

        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        for (key, value) in [
            ("ROUTER_THRESHOLD", settings.threshold),
            ("ROUTER_ALPHA", settings.alpha),
            ("ROUTER_FAST_PATH_FLOOR", settings.fast_path_floor),
        ] {
            if !in_unit(value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    details: format!("expected a value in (0, 1], got {}", value),
                });
            }
        }
        if settings.latency_scale_ms <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "ROUTER_LATENCY_SCALE_MS".to_string(),
                details: "must be positive".to_string(),
            });
        }

        Ok(settings)
    }
}
