//! Concrete collaborators, chosen at startup from [`ProviderSettings`].

mod http;
mod http_payment;
mod http_search;
mod logging;
mod redis_cache;
mod redis_directory;
mod redis_push;
mod sendgrid;
mod smtp;

pub use http_payment::HttpPaymentGateway;
pub use http_search::HttpSearchIndex;
pub use logging::{
    LoggingEmailSender, LoggingPaymentGateway, LoggingSearchIndex, StaticRecipientDirectory,
};
pub use redis_cache::RedisCacheStore;
pub use redis_directory::RedisRecipientDirectory;
pub use redis_push::RedisPushChannel;
pub use sendgrid::SendGridEmailSender;
pub use smtp::SmtpEmailSender;

use core_config::{EmailBackend, EmailSettings, HttpBackend, ProviderSettings};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::collaborators::{EmailSender, PaymentGateway, SearchIndex};
use crate::error::DomainResult;

pub fn request_timeout(settings: &ProviderSettings) -> Duration {
    Duration::from_millis(settings.timeout_ms)
}

pub fn email_sender(
    settings: &EmailSettings,
    timeout: Duration,
) -> DomainResult<Arc<dyn EmailSender>> {
    let sender: Arc<dyn EmailSender> = match &settings.backend {
        EmailBackend::Smtp(smtp) => {
            info!(host = %smtp.host, port = smtp.port, tls = smtp.use_tls, "Email via SMTP");
            Arc::new(SmtpEmailSender::new(
                smtp,
                &settings.from_email,
                &settings.from_name,
                timeout,
            )?)
        }
        EmailBackend::SendGrid(sendgrid) => {
            info!(api_url = %sendgrid.api_url, "Email via SendGrid");
            Arc::new(SendGridEmailSender::new(
                sendgrid.clone(),
                settings.from_email.clone(),
                settings.from_name.clone(),
                timeout,
            )?)
        }
        EmailBackend::Log => {
            warn!("EMAIL_PROVIDER=log: emails are logged, not delivered");
            Arc::new(LoggingEmailSender)
        }
    };
    Ok(sender)
}

pub fn payment_gateway(settings: &ProviderSettings) -> DomainResult<Arc<dyn PaymentGateway>> {
    match &settings.payments {
        HttpBackend::Http { base_url, api_key } => {
            info!(base_url = %base_url, "Payments via HTTP gateway");
            let timeout = request_timeout(settings);
            let gateway = HttpPaymentGateway::new(base_url.clone(), api_key.clone(), timeout)?;
            Ok(Arc::new(gateway))
        }
        HttpBackend::Log => {
            warn!("PAYMENT_PROVIDER=log: payments are logged, not executed");
            Ok(Arc::new(LoggingPaymentGateway))
        }
    }
}

pub fn search_index(settings: &ProviderSettings) -> DomainResult<Arc<dyn SearchIndex>> {
    match &settings.search {
        HttpBackend::Http { base_url, api_key } => {
            info!(base_url = %base_url, "Search via HTTP index");
            let timeout = request_timeout(settings);
            Ok(Arc::new(HttpSearchIndex::new(base_url, api_key.clone(), timeout)?))
        }
        HttpBackend::Log => {
            warn!("SEARCH_PROVIDER=log: index changes are logged, not applied");
            Ok(Arc::new(LoggingSearchIndex))
        }
    }
}
