//! Email template rendering.
//!
//! A named template is three Handlebars sources: `<name>.subject`,
//! `<name>.text` and an optional `<name>.html`. Rendering is strict, so a
//! variable missing from `EmailJob::vars` fails the job instead of sending
//! a message with holes in it.

use handlebars::Handlebars;
use serde::Serialize;
use std::fmt::Display;
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::models::EmailJob;

/// Fully rendered message handed to an [`EmailSender`](crate::collaborators::EmailSender).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

const BUILTIN_TEMPLATES: &[(&str, &str, &str, &str)] = &[
    (
        "welcome",
        "Welcome, {{name}}!",
        "Hi {{name}},\n\nThanks for signing up. We're glad to have you.\n",
        "<p>Hi {{name}},</p>\n<p>Thanks for signing up. We're glad to have you.</p>\n",
    ),
    (
        "password_reset",
        "Reset your password",
        "Hi {{name}},\n\nUse this link to choose a new password:\n{{reset_url}}\n",
        "<p>Hi {{name}},</p>\n<p><a href=\"{{reset_url}}\">Choose a new password</a></p>\n",
    ),
    (
        "order_shipped",
        "Your order {{order_id}} has shipped",
        "Good news: order {{order_id}} is on its way.\n",
        "<p>Good news: order <strong>{{order_id}}</strong> is on its way.</p>\n",
    ),
    (
        "payment_receipt",
        "Receipt for order {{order_id}}",
        "We received {{amount}} {{currency}} for order {{order_id}}.\n",
        "<p>We received {{amount}} {{currency}} for order <strong>{{order_id}}</strong>.</p>\n",
    ),
];

fn template_error(name: &str, err: impl Display) -> DomainError {
    DomainError::Validation(format!("email template '{}': {}", name, err))
}

/// Renders subjects and text bodies unescaped and HTML bodies escaped.
pub struct EmailRenderer {
    text: Handlebars<'static>,
    html: Handlebars<'static>,
}

impl Default for EmailRenderer {
    fn default() -> Self {
        let mut text = Handlebars::new();
        text.set_strict_mode(true);
        text.register_escape_fn(handlebars::no_escape);

        let mut html = Handlebars::new();
        html.set_strict_mode(true);

        Self { text, html }
    }
}

impl EmailRenderer {
    /// No named templates; jobs must carry `subject` and `body`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Renderer with the bundled `welcome`, `password_reset`,
    /// `order_shipped` and `payment_receipt` templates.
    pub fn with_builtin_templates() -> DomainResult<Self> {
        let mut renderer = Self::new();
        for (name, subject, text, html) in BUILTIN_TEMPLATES {
            renderer.register(name, subject, text, Some(*html))?;
        }
        Ok(renderer)
    }

    pub fn register(
        &mut self,
        name: &str,
        subject: &str,
        text: &str,
        html: Option<&str>,
    ) -> DomainResult<()> {
        self.text
            .register_template_string(&format!("{}.subject", name), subject)
            .map_err(|e| template_error(name, e))?;
        self.text
            .register_template_string(&format!("{}.text", name), text)
            .map_err(|e| template_error(name, e))?;
        if let Some(html) = html {
            self.html
                .register_template_string(&format!("{}.html", name), html)
                .map_err(|e| template_error(name, e))?;
        }
        Ok(())
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.text.has_template(&format!("{}.text", name))
    }

    /// A job subject, when present, overrides the template's subject and
    /// may itself reference `vars`.
    pub fn render(&self, job: &EmailJob) -> DomainResult<OutgoingEmail> {
        let Some(name) = job.template.as_deref() else {
            return self.render_inline(job);
        };
        if !self.has_template(name) {
            return Err(DomainError::Validation(format!("unknown email template '{}'", name)));
        }

        let subject = match job.subject.as_deref() {
            Some(subject) => self.text.render_template(subject, &job.vars),
            None => self.text.render(&format!("{}.subject", name), &job.vars),
        }
        .map_err(|e| template_error(name, e))?;
        let text = self
            .text
            .render(&format!("{}.text", name), &job.vars)
            .map_err(|e| template_error(name, e))?;

        let html_name = format!("{}.html", name);
        let html = if self.html.has_template(&html_name) {
            Some(
                self.html
                    .render(&html_name, &job.vars)
                    .map_err(|e| template_error(name, e))?,
            )
        } else {
            None
        };

        debug!(template = %name, to = %job.to, has_html = html.is_some(), "Rendered email");
        Ok(OutgoingEmail {
            to: job.to.trim().to_string(),
            subject,
            text,
            html,
        })
    }

    fn render_inline(&self, job: &EmailJob) -> DomainResult<OutgoingEmail> {
        let (Some(subject), Some(body)) = (job.subject.as_deref(), job.body.as_deref()) else {
            return Err(DomainError::Validation(
                "email needs a template or both subject and body".to_string(),
            ));
        };

        Ok(OutgoingEmail {
            to: job.to.trim().to_string(),
            subject: self
                .text
                .render_template(subject, &job.vars)
                .map_err(|e| template_error("subject", e))?,
            text: self
                .text
                .render_template(body, &job.vars)
                .map_err(|e| template_error("body", e))?,
            html: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> EmailRenderer {
        EmailRenderer::with_builtin_templates().unwrap()
    }

    #[test]
    fn test_builtin_template_renders_all_parts() {
        let job = EmailJob::to("ada@example.com")
            .with_template("welcome")
            .with_var("name", "Ada <3");
        let email = renderer().render(&job).unwrap();

        assert_eq!(email.subject, "Welcome, Ada <3!");
        assert!(email.text.starts_with("Hi Ada <3,"));
        let html = email.html.unwrap();
        assert!(html.contains("Ada &lt;3"), "html was {}", html);
    }

    #[test]
    fn test_job_subject_overrides_template_subject() {
        let job = EmailJob::to("a@b.com")
            .with_template("order_shipped")
            .with_subject("Order {{order_id}} left the warehouse")
            .with_var("order_id", "o-17");
        let email = renderer().render(&job).unwrap();
        assert_eq!(email.subject, "Order o-17 left the warehouse");
        assert!(email.text.contains("o-17"));
    }

    #[test]
    fn test_missing_variable_is_a_validation_error() {
        let job = EmailJob::to("a@b.com")
            .with_template("password_reset")
            .with_var("name", "Ada");
        let err = renderer().render(&job).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_unknown_template_is_rejected() {
        let job = EmailJob::to("a@b.com").with_template("newsletter");
        let err = renderer().render(&job).unwrap_err();
        assert!(err.to_string().contains("newsletter"));
    }

    #[test]
    fn test_inline_email_needs_subject_and_body() {
        let renderer = EmailRenderer::new();
        assert!(renderer.render(&EmailJob::to("a@b.com").with_subject("Hi")).is_err());

        let job = EmailJob::to(" a@b.com ")
            .with_subject("Hi")
            .with_body("Plain {{code}}")
            .with_var("code", "42");
        let email = renderer.render(&job).unwrap();
        assert_eq!(email.to, "a@b.com");
        assert_eq!(email.subject, "Hi");
        assert_eq!(email.text, "Plain 42");
        assert_eq!(email.html, None);
    }

    #[test]
    fn test_registered_template_without_html() {
        let mut renderer = EmailRenderer::new();
        renderer
            .register("digest", "Your {{period}} digest", "{{count}} new items", None)
            .unwrap();
        let job = EmailJob::to("a@b.com")
            .with_template("digest")
            .with_var("period", "weekly")
            .with_var("count", "3");
        let email = renderer.render(&job).unwrap();
        assert_eq!(email.subject, "Your weekly digest");
        assert_eq!(email.html, None);
    }
}
