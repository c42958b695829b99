use crate::{env_or_default, env_parse, ConfigError, FromEnv};
use std::net::Ipv4Addr;

/// Bind address for the worker's health/metrics endpoint.
#[derive(Clone, Debug)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl HealthServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for HealthServerConfig {
    /// - HOST: defaults to 0.0.0.0
    /// - HEALTH_PORT: defaults to 8090
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string()),
            port: env_parse("HEALTH_PORT", 8090)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_server_defaults() {
        temp_env::with_vars([("HOST", None::<&str>), ("HEALTH_PORT", None)], || {
            let config = HealthServerConfig::from_env().unwrap();
            assert_eq!(config.address(), "0.0.0.0:8090");
        });
    }

    #[test]
    fn test_health_server_invalid_port() {
        temp_env::with_var("HEALTH_PORT", Some("99999"), || {
            let err = HealthServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("HEALTH_PORT"));
        });
    }
}
