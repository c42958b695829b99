//! SendGrid v3 mail send.

use async_trait::async_trait;
use core_config::SendGridSettings;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::http;
use crate::collaborators::EmailSender;
use crate::error::DomainResult;
use crate::templates::OutgoingEmail;

const PROVIDER: &str = "sendgrid";

pub struct SendGridEmailSender {
    client: Client,
    settings: SendGridSettings,
    from_email: String,
    from_name: String,
}

impl SendGridEmailSender {
    pub fn new(
        settings: SendGridSettings,
        from_email: impl Into<String>,
        from_name: impl Into<String>,
        timeout: Duration,
    ) -> DomainResult<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            settings,
            from_email: from_email.into(),
            from_name: from_name.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    custom_args: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

fn request<'a>(
    sender: &'a SendGridEmailSender,
    email: &'a OutgoingEmail,
    key: &'a str,
) -> SendRequest<'a> {
    let mut content = vec![Content {
        content_type: "text/plain",
        value: &email.text,
    }];
    if let Some(html) = &email.html {
        content.push(Content {
            content_type: "text/html",
            value: html,
        });
    }

    SendRequest {
        personalizations: vec![Personalization {
            to: vec![Address {
                email: &email.to,
                name: None,
            }],
        }],
        from: Address {
            email: &sender.from_email,
            name: Some(&sender.from_name),
        },
        subject: &email.subject,
        content,
        custom_args: BTreeMap::from([("job_key", key)]),
    }
}

#[async_trait]
impl EmailSender for SendGridEmailSender {
    async fn send(&self, email: &OutgoingEmail, idempotency_key: &str) -> DomainResult<String> {
        debug!(to = %email.to, has_html = email.html.is_some(), "Sending email via SendGrid");

        let response = self
            .client
            .post(format!("{}/mail/send", self.settings.api_url.trim_end_matches('/')))
            .bearer_auth(&self.settings.api_key)
            .json(&request(self, email, idempotency_key))
            .send()
            .await
            .map_err(|e| http::transport_error(PROVIDER, e))?;
        let response = http::check(PROVIDER, response).await?;

        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| idempotency_key.to_string());

        info!(to = %email.to, message_id = %message_id, "Email sent via SendGrid");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::test_server;
    use crate::error::DomainError;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: "ada@example.com".to_string(),
            subject: "Welcome".to_string(),
            text: "Hi Ada".to_string(),
            html: Some("<p>Hi Ada</p>".to_string()),
        }
    }

    fn sender(api_url: String) -> SendGridEmailSender {
        let settings = SendGridSettings {
            api_key: "SG.test".to_string(),
            api_url,
        };
        SendGridEmailSender::new(settings, "noreply@example.com", "Shop", Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn test_posts_mail_and_returns_message_id() {
        let seen: Arc<Mutex<Option<(String, Value)>>> = Arc::default();
        let captured = seen.clone();
        let app = Router::new().route(
            "/mail/send",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    let auth = headers["authorization"].to_str().unwrap().to_string();
                    *captured.lock().unwrap() = Some((auth, body));
                    (StatusCode::ACCEPTED, [("x-message-id", "sg-123")])
                }
            }),
        );
        let base = test_server::serve(app).await;

        let id = sender(base).send(&email(), "key-9").await.unwrap();
        assert_eq!(id, "sg-123");

        let (auth, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(auth, "Bearer SG.test");
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "ada@example.com");
        assert_eq!(body["from"]["name"], "Shop");
        assert_eq!(body["content"][1]["type"], "text/html");
        assert_eq!(body["custom_args"]["job_key"], "key-9");
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        let app = Router::new().route(
            "/mail/send",
            post(|| async { (StatusCode::BAD_REQUEST, r#"{"errors":[{"message":"bad"}]}"#) }),
        );
        let base = test_server::serve(app).await;

        let err = sender(base).send(&email(), "key-1").await.unwrap_err();
        assert!(matches!(err, DomainError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_retryable() {
        let err = sender("http://127.0.0.1:1".to_string())
            .send(&email(), "key-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Provider(_)));
    }
}
