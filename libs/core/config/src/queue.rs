use crate::{env_parse, env_parse_optional, ConfigError, FromEnv};

/// Tunables shared by every stream worker and the delayed-job promoter.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueSettings {
    /// Maximum entries read per poll.
    pub batch_size: usize,
    /// Sleep after an empty poll.
    pub idle_backoff_ms: u64,
    /// Sleep after a failed poll.
    pub error_backoff_ms: u64,
    /// Idle time after which another consumer may claim an unacked entry.
    pub visibility_timeout_ms: u64,
    /// Deliveries before an entry is dead-lettered. `None` disables it.
    pub max_deliveries: Option<u32>,
    pub max_concurrent_jobs: usize,
    /// Broker-side blocking read timeout. `None` means plain polling.
    pub block_ms: Option<u64>,
    pub promoter_interval_ms: u64,
    pub promoter_batch_size: usize,
    /// Approximate `MAXLEN` applied on every append.
    pub stream_max_length: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            idle_backoff_ms: 1000,
            error_backoff_ms: 5000,
            visibility_timeout_ms: 30_000,
            max_deliveries: Some(5),
            max_concurrent_jobs: 1,
            block_ms: None,
            promoter_interval_ms: 1000,
            promoter_batch_size: 100,
            stream_max_length: 100_000,
        }
    }
}

impl FromEnv for QueueSettings {
    /// Every variable is optional; see [`QueueSettings::default`] for values.
    ///
    /// `WORKER_MAX_DELIVERIES=0` turns dead-lettering off.
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let batch_size = env_parse("WORKER_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_BATCH_SIZE".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let max_deliveries = match env_parse_optional::<u32>("WORKER_MAX_DELIVERIES")? {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.max_deliveries,
        };

        Ok(Self {
            batch_size,
            idle_backoff_ms: env_parse("WORKER_IDLE_BACKOFF_MS", defaults.idle_backoff_ms)?,
            error_backoff_ms: env_parse("WORKER_ERROR_BACKOFF_MS", defaults.error_backoff_ms)?,
            visibility_timeout_ms: env_parse(
                "WORKER_VISIBILITY_TIMEOUT_MS",
                defaults.visibility_timeout_ms,
            )?,
            max_deliveries,
            max_concurrent_jobs: env_parse(
                "WORKER_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?
            .max(1),
            block_ms: env_parse_optional("WORKER_BLOCK_MS")?,
            promoter_interval_ms: env_parse(
                "PROMOTER_INTERVAL_MS",
                defaults.promoter_interval_ms,
            )?,
            promoter_batch_size: env_parse("PROMOTER_BATCH_SIZE", defaults.promoter_batch_size)?
                .max(1),
            stream_max_length: env_parse("STREAM_MAX_LENGTH", defaults.stream_max_length)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 10] = [
        "WORKER_BATCH_SIZE",
        "WORKER_IDLE_BACKOFF_MS",
        "WORKER_ERROR_BACKOFF_MS",
        "WORKER_VISIBILITY_TIMEOUT_MS",
        "WORKER_MAX_DELIVERIES",
        "WORKER_MAX_CONCURRENT_JOBS",
        "WORKER_BLOCK_MS",
        "PROMOTER_INTERVAL_MS",
        "PROMOTER_BATCH_SIZE",
        "STREAM_MAX_LENGTH",
    ];

    #[test]
    fn test_defaults_when_unset() {
        temp_env::with_vars_unset(VARS, || {
            let settings = QueueSettings::from_env().unwrap();
            assert_eq!(settings, QueueSettings::default());
            assert_eq!(settings.batch_size, 10);
            assert_eq!(settings.max_deliveries, Some(5));
            assert_eq!(settings.block_ms, None);
        });
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("WORKER_BATCH_SIZE", Some("25")),
                ("WORKER_VISIBILITY_TIMEOUT_MS", Some("1500")),
                ("WORKER_BLOCK_MS", Some("2000")),
                ("WORKER_MAX_CONCURRENT_JOBS", Some("0")),
            ],
            || {
                let settings = QueueSettings::from_env().unwrap();
                assert_eq!(settings.batch_size, 25);
                assert_eq!(settings.visibility_timeout_ms, 1500);
                assert_eq!(settings.block_ms, Some(2000));
                // Clamped so the semaphore always has a permit.
                assert_eq!(settings.max_concurrent_jobs, 1);
            },
        );
    }

    #[test]
    fn test_zero_max_deliveries_disables_dead_letter() {
        temp_env::with_var("WORKER_MAX_DELIVERIES", Some("0"), || {
            let settings = QueueSettings::from_env().unwrap();
            assert_eq!(settings.max_deliveries, None);
        });
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        temp_env::with_var("WORKER_BATCH_SIZE", Some("0"), || {
            assert!(QueueSettings::from_env().is_err());
        });
    }

    #[test]
    fn test_unparsable_value_is_error() {
        temp_env::with_var("PROMOTER_INTERVAL_MS", Some("soon"), || {
            let err = QueueSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("PROMOTER_INTERVAL_MS"));
        });
    }
}
