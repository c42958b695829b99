//! Shared plumbing for the JSON-over-HTTP providers.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;

use crate::error::{DomainError, DomainResult};

pub(crate) fn client(timeout: Duration) -> DomainResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DomainError::Provider(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn with_bearer(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

/// Timeouts and connection failures are always worth another delivery.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> DomainError {
    DomainError::Provider(format!("{} request failed: {}", provider, err))
}

/// 429 is rate limiting, other 4xx except 408/409 reject the job, and
/// everything else is retried.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> DomainError {
    let message = format!("{} returned {}: {}", provider, status, body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => DomainError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT => DomainError::Provider(message),
        s if s.is_client_error() => DomainError::Rejected(message),
        _ => DomainError::Provider(message),
    }
}

/// Pass a successful response through, or turn it into a [`DomainError`].
pub(crate) async fn check(provider: &str, response: Response) -> DomainResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(provider = %provider, status = %status, "Provider request failed");
    Err(status_error(provider, status, &body))
}
