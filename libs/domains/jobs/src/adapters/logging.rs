//! Stand-in providers that log instead of calling out. Selected with
//! `EMAIL_PROVIDER=log`, `PAYMENT_PROVIDER=log` or `SEARCH_PROVIDER=log`
//! and refused when `APP_ENV=production`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::{EmailSender, PaymentGateway, RecipientDirectory, SearchIndex};
use crate::error::{DomainError, DomainResult};
use crate::models::PaymentJob;
use crate::templates::OutgoingEmail;

#[derive(Clone, Default)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, email: &OutgoingEmail, idempotency_key: &str) -> DomainResult<String> {
        info!(
            to = %email.to,
            subject = %email.subject,
            text_len = email.text.len(),
            has_html = email.html.is_some(),
            idempotency_key = %idempotency_key,
            "Email delivered (logging provider)"
        );
        Ok(format!("log-{}", idempotency_key))
    }
}

#[derive(Clone, Default)]
pub struct LoggingPaymentGateway;

#[async_trait]
impl PaymentGateway for LoggingPaymentGateway {
    async fn execute(&self, payment: &PaymentJob, idempotency_key: &str) -> DomainResult<String> {
        let transaction_id = format!("tx_{}", Uuid::new_v4().simple());
        info!(
            kind = payment.kind(),
            amount_cents = payment.amount_cents(),
            idempotency_key = %idempotency_key,
            transaction_id = %transaction_id,
            "Payment executed (logging gateway)"
        );
        Ok(transaction_id)
    }
}

#[derive(Clone, Default)]
pub struct LoggingSearchIndex;

#[async_trait]
impl SearchIndex for LoggingSearchIndex {
    async fn upsert(&self, index: &str, id: &str, document: &Value) -> DomainResult<()> {
        let fields = document.as_object().map(|o| o.len()).unwrap_or(0);
        info!(index = %index, id = %id, fields, "Indexed document");
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> DomainResult<()> {
        info!(index = %index, id = %id, "Removed document");
        Ok(())
    }
}

/// Fixed audience table. `user:<id>` keys always resolve to that user.
#[derive(Clone, Default)]
pub struct StaticRecipientDirectory {
    audiences: HashMap<String, Vec<String>>,
}

impl StaticRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audience(
        mut self,
        name: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.audiences
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl RecipientDirectory for StaticRecipientDirectory {
    async fn resolve(&self, audience: &str) -> DomainResult<Vec<String>> {
        if let Some(user_id) = audience.strip_prefix("user:") {
            return Ok(vec![user_id.to_string()]);
        }

        match audience.strip_prefix("audience:") {
            Some(name) => Ok(self.audiences.get(name).cloned().unwrap_or_default()),
            None => Err(DomainError::Validation(format!("Unknown audience key: {}", audience))),
        }
    }
}
