use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::http;
use crate::collaborators::PaymentGateway;
use crate::error::{DomainError, DomainResult};
use crate::models::PaymentJob;

const PROVIDER: &str = "payment gateway";

/// Posts each payment to `<base_url>/payments` with an `Idempotency-Key`
/// header, so a redelivered job replays the original result.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    transaction_id: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> DomainResult<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn execute(&self, payment: &PaymentJob, idempotency_key: &str) -> DomainResult<String> {
        let request = self
            .client
            .post(format!("{}/payments", self.base_url))
            .header("Idempotency-Key", idempotency_key)
            .json(payment);
        let response = http::with_bearer(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| http::transport_error(PROVIDER, e))?;
        let response = http::check(PROVIDER, response).await?;

        let body: PaymentResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Provider(format!("unexpected gateway response: {}", e)))?;

        info!(
            kind = payment.kind(),
            amount_cents = payment.amount_cents(),
            transaction_id = %body.transaction_id,
            "Payment accepted by gateway"
        );
        Ok(body.transaction_id)
    }
}
