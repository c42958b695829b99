//! Job payloads, one closed type per queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{DomainError, DomainResult};

/// `email` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

impl EmailJob {
    pub fn to(address: impl Into<String>) -> Self {
        Self {
            to: address.into(),
            subject: None,
            body: None,
            template: None,
            vars: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        let address = self.to.trim();
        match address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(DomainError::Validation(format!("invalid recipient address '{}'", self.to))),
        }
    }
}

/// `payments` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentJob {
    Charge {
        order_id: String,
        customer_id: String,
        amount_cents: i64,
        currency: String,
    },
    Payout {
        account_id: String,
        amount_cents: i64,
        currency: String,
    },
    Refund {
        order_id: String,
        amount_cents: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl PaymentJob {
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentJob::Charge { .. } => "charge",
            PaymentJob::Payout { .. } => "payout",
            PaymentJob::Refund { .. } => "refund",
        }
    }

    /// Lock resource serializing operations on the same order or account.
    pub fn lock_resource(&self) -> String {
        match self {
            PaymentJob::Charge { order_id, .. } | PaymentJob::Refund { order_id, .. } => {
                format!("payment:order:{}", order_id)
            }
            PaymentJob::Payout { account_id, .. } => format!("payment:account:{}", account_id),
        }
    }

    pub fn amount_cents(&self) -> i64 {
        match self {
            PaymentJob::Charge { amount_cents, .. }
            | PaymentJob::Payout { amount_cents, .. }
            | PaymentJob::Refund { amount_cents, .. } => *amount_cents,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.amount_cents() <= 0 {
            return Err(DomainError::Validation(format!(
                "{} amount must be positive, got {}",
                self.kind(),
                self.amount_cents()
            )));
        }
        if let PaymentJob::Charge { currency, .. } | PaymentJob::Payout { currency, .. } = self {
            if currency.len() != 3 {
                return Err(DomainError::Validation(format!("invalid currency '{}'", currency)));
            }
        }
        Ok(())
    }
}

/// `notifications` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationJob {
    OrderShipped {
        order_id: String,
        customer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tracking_number: Option<String>,
    },
    NewFollower {
        user_id: String,
        follower_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        follower_name: Option<String>,
    },
    Broadcast {
        audience: String,
        title: String,
        message: String,
    },
}

impl NotificationJob {
    pub fn event(&self) -> &'static str {
        match self {
            NotificationJob::OrderShipped { .. } => "order_shipped",
            NotificationJob::NewFollower { .. } => "new_follower",
            NotificationJob::Broadcast { .. } => "broadcast",
        }
    }

    /// Directory key for the recipients: `user:<id>` or `audience:<name>`.
    pub fn audience(&self) -> String {
        match self {
            NotificationJob::OrderShipped { customer_id, .. } => format!("user:{}", customer_id),
            NotificationJob::NewFollower { user_id, .. } => format!("user:{}", user_id),
            NotificationJob::Broadcast { audience, .. } => format!("audience:{}", audience),
        }
    }

    /// Body delivered to each recipient.
    pub fn payload(&self) -> Value {
        match self {
            NotificationJob::OrderShipped {
                order_id,
                tracking_number,
                ..
            } => serde_json::json!({ "order_id": order_id, "tracking_number": tracking_number }),
            NotificationJob::NewFollower {
                follower_id,
                follower_name,
                ..
            } => serde_json::json!({ "follower_id": follower_id, "follower_name": follower_name }),
            NotificationJob::Broadcast { title, message, .. } => {
                serde_json::json!({ "title": title, "message": message })
            }
        }
    }
}

/// `realtime` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeJob {
    Publish {
        user_id: String,
        event: String,
        payload: Value,
        /// Lets clients drop duplicates produced by redelivery.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dedupe_key: Option<String>,
    },
}

/// Message written to a user's push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub event: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

/// `search-index` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SearchIndexJob {
    Upsert { index: String, id: String, document: Value },
    Delete { index: String, id: String },
}

impl SearchIndexJob {
    pub fn index(&self) -> &str {
        match self {
            SearchIndexJob::Upsert { index, .. } | SearchIndexJob::Delete { index, .. } => index,
        }
    }

    /// Cached query results for this index live under this prefix.
    pub fn cache_prefix(&self) -> String {
        format!("search:{}:", self.index())
    }
}
