use crate::{ConfigError, FromEnv};

/// Redis connection settings.
///
/// Both the stream broker and the lock store talk to the same Redis, so
/// one URL is enough.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl FromEnv for RedisConfig {
    /// Requires `REDIS_URL` (or `REDIS_HOST` for compatibility). There is no
    /// default: a worker without a broker must not start.
    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("REDIS_HOST"))
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue {
                key: "REDIS_URL".to_string(),
                details: format!("expected a redis:// or rediss:// URL, got '{}'", url),
            });
        }

        Ok(Self { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_from_redis_url() {
        temp_env::with_vars(
            [
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("REDIS_HOST", None),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://localhost:6379");
            },
        );
    }

    #[test]
    fn test_redis_config_falls_back_to_host() {
        temp_env::with_vars(
            [
                ("REDIS_URL", None),
                ("REDIS_HOST", Some("redis://prod:6379")),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://prod:6379");
            },
        );
    }

    #[test]
    fn test_redis_config_missing_fails_fast() {
        temp_env::with_vars([("REDIS_URL", None::<&str>), ("REDIS_HOST", None)], || {
            let err = RedisConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(_)));
            assert!(err.to_string().contains("REDIS"));
        });
    }

    #[test]
    fn test_redis_config_rejects_non_redis_scheme() {
        temp_env::with_var("REDIS_URL", Some("http://localhost:6379"), || {
            let err = RedisConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        });
    }
}
