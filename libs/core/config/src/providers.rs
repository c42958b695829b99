use crate::{
    ConfigError, Environment, FromEnv, env_or_default, env_parse, env_parse_optional, env_required,
};

/// SMTP relay. Plain connections are for local catchers such as Mailpit.
#[derive(Clone, Debug, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SendGridSettings {
    pub api_key: String,
    pub api_url: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EmailBackend {
    Smtp(SmtpSettings),
    SendGrid(SendGridSettings),
    /// Log the rendered message and report it as sent.
    Log,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmailSettings {
    pub backend: EmailBackend,
    pub from_email: String,
    pub from_name: String,
}

/// JSON-over-HTTP provider, or `Log` for local runs.
#[derive(Clone, Debug, PartialEq)]
pub enum HttpBackend {
    Http { base_url: String, api_key: Option<String> },
    Log,
}

impl HttpBackend {
    pub fn is_log(&self) -> bool {
        matches!(self, HttpBackend::Log)
    }
}

/// External services the job handlers call.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSettings {
    pub email: EmailSettings,
    pub payments: HttpBackend,
    pub search: HttpBackend,
    pub timeout_ms: u64,
}

impl ProviderSettings {
    /// Provider names still on the `log` backend.
    pub fn log_only(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.email.backend == EmailBackend::Log {
            names.push("EMAIL_PROVIDER");
        }
        if self.payments.is_log() {
            names.push("PAYMENT_PROVIDER");
        }
        if self.search.is_log() {
            names.push("SEARCH_PROVIDER");
        }
        names
    }

    /// Production must not acknowledge jobs it only logged.
    pub fn ensure_allowed(&self, environment: &Environment) -> Result<(), ConfigError> {
        let log_only = self.log_only();
        if environment.is_production() && !log_only.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: log_only.join(", "),
                details: "the log provider is not allowed when APP_ENV=production".to_string(),
            });
        }
        Ok(())
    }
}

impl FromEnv for EmailSettings {
    /// - EMAIL_PROVIDER: `smtp` (default), `sendgrid` or `log`
    /// - EMAIL_FROM / EMAIL_FROM_NAME: sender identity
    /// - SMTP_HOST, SMTP_PORT, SMTP_USERNAME, SMTP_PASSWORD, SMTP_USE_TLS
    /// - SENDGRID_API_KEY (required for `sendgrid`), SENDGRID_API_URL
    fn from_env() -> Result<Self, ConfigError> {
        let provider = env_or_default("EMAIL_PROVIDER", "smtp").to_ascii_lowercase();
        let backend = match provider.as_str() {
            "smtp" => EmailBackend::Smtp(SmtpSettings {
                host: env_or_default("SMTP_HOST", "localhost"),
                port: env_parse("SMTP_PORT", 1025)?,
                username: env_parse_optional("SMTP_USERNAME")?,
                password: env_parse_optional("SMTP_PASSWORD")?,
                use_tls: env_parse("SMTP_USE_TLS", false)?,
            }),
            "sendgrid" => EmailBackend::SendGrid(SendGridSettings {
                api_key: env_required("SENDGRID_API_KEY")?,
                api_url: env_or_default("SENDGRID_API_URL", "https://api.sendgrid.com/v3"),
            }),
            "log" => EmailBackend::Log,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "EMAIL_PROVIDER".to_string(),
                    details: format!("expected smtp, sendgrid or log, got '{}'", other),
                })
            }
        };

        Ok(Self {
            backend,
            from_email: env_or_default("EMAIL_FROM", "noreply@localhost"),
            from_name: env_or_default("EMAIL_FROM_NAME", "Jobs Worker"),
        })
    }
}

fn http_backend(
    provider_key: &str,
    url_key: &str,
    api_key_key: &str,
) -> Result<HttpBackend, ConfigError> {
    let provider = env_or_default(provider_key, "http").to_ascii_lowercase();
    match provider.as_str() {
        "http" => Ok(HttpBackend::Http {
            base_url: env_required(url_key)?.trim_end_matches('/').to_string(),
            api_key: env_parse_optional(api_key_key)?,
        }),
        "log" => Ok(HttpBackend::Log),
        other => Err(ConfigError::InvalidValue {
            key: provider_key.to_string(),
            details: format!("expected http or log, got '{}'", other),
        }),
    }
}

impl FromEnv for ProviderSettings {
    /// - PAYMENT_PROVIDER: `http` (default, needs PAYMENT_GATEWAY_URL) or `log`
    /// - SEARCH_PROVIDER: `http` (default, needs SEARCH_URL) or `log`
    /// - PROVIDER_TIMEOUT_MS: request timeout for HTTP providers, default 10000
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            email: EmailSettings::from_env()?,
            payments: http_backend(
                "PAYMENT_PROVIDER",
                "PAYMENT_GATEWAY_URL",
                "PAYMENT_GATEWAY_API_KEY",
            )?,
            search: http_backend("SEARCH_PROVIDER", "SEARCH_URL", "SEARCH_API_KEY")?,
            timeout_ms: env_parse("PROVIDER_TIMEOUT_MS", 10_000)?,
        })
    }
}
