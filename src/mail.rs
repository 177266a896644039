//! Outbound mail.
//!
//! Workflows hand a `MailMessage` to [`dispatch`], which spawns the delivery
//! and returns immediately. Failures are logged; the user record has already
//! been written by then, so there is nothing to roll back.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

use crate::config::MailConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Signup,
    ForgotPassword,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::Signup => "signupEmail",
            Template::ForgotPassword => "forgotPassword",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Template::Signup => "Your account activation link",
            Template::ForgotPassword => "Your password reset link (valid for 10 minutes)",
        }
    }

    /// HTML body. Both variables are escaped before interpolation.
    pub fn render(&self, vars: &TemplateVars) -> String {
        let user = escape_html(&vars.user);
        let url = escape_html(&vars.url);
        match self {
            Template::Signup => format!(
                "<p>Hi {user},</p>\
                 <p>Welcome aboard! Please activate your account by following this link:</p>\
                 <p><a href=\"{url}\">{url}</a></p>",
            ),
            Template::ForgotPassword => format!(
                "<p>Hi {user},</p>\
                 <p>Forgot your password? Set a new one here within 10 minutes:</p>\
                 <p><a href=\"{url}\">{url}</a></p>\
                 <p>If you did not ask for this, simply ignore this email.</p>",
            ),
        }
    }
}

/// Escapes text for use in HTML content and double-quoted attributes.
fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub user: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub template: Template,
    pub vars: TemplateVars,
}

impl MailMessage {
    pub fn new(to: &str, template: Template, vars: TemplateVars) -> Self {
        Self {
            to: to.to_string(),
            subject: template.subject().to_string(),
            template,
            vars,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()>;
}

/// Logs messages instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        info!(
            to = %message.to,
            template = message.template.name(),
            subject = %message.subject,
            "mail send stub"
        );
        Ok(())
    }
}

/// Delivers through the SendGrid v3 HTTP API.
#[derive(Clone)]
pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl SendGridMailer {
    const ENDPOINT: &'static str = "https://api.sendgrid.com/v3/mail/send";

    pub fn new(api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from },
            "subject": message.subject,
            "content": [{
                "type": "text/html",
                "value": message.template.render(&message.vars),
            }],
        });
        self.client
            .post(Self::ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("sendgrid request")?
            .error_for_status()
            .context("sendgrid rejected message")?;
        Ok(())
    }
}

pub fn mailer_from_config(cfg: &MailConfig) -> Arc<dyn Mailer> {
    match &cfg.sendgrid_api_key {
        Some(key) => Arc::new(SendGridMailer::new(key.clone(), cfg.from.clone())),
        None => Arc::new(LogMailer),
    }
}

/// Fire-and-forget delivery.
pub fn dispatch(mailer: Arc<dyn Mailer>, message: MailMessage) -> JoinHandle<()> {
    let span = tracing::info_span!("mail_dispatch", template = message.template.name());
    tokio::spawn(
        async move {
            if let Err(e) = mailer.send(&message).await {
                error!(error = ?e, to = %message.to, "mail dispatch failed");
            }
        }
        .instrument(span),
    )
}

/// Joins the public base URL and a route path, e.g. `confirmMail/<secret>`.
pub fn link(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/api/v1/{path}")
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn message() -> MailMessage {
        MailMessage::new(
            "a@x.com",
            Template::Signup,
            TemplateVars {
                user: "alice".into(),
                url: link("http://localhost:8080/", "confirmMail/abc"),
            },
        )
    }

    #[test]
    fn link_joins_base_and_path() {
        assert_eq!(
            link("https://accounts.example/", "resetPassword/deadbeef"),
            "https://accounts.example/api/v1/resetPassword/deadbeef"
        );
    }

    #[test]
    fn templates_embed_user_and_url() {
        let msg = message();
        let html = msg.template.render(&msg.vars);
        assert!(html.contains("alice"));
        assert!(html.contains("http://localhost:8080/api/v1/confirmMail/abc"));
        assert_eq!(msg.subject, Template::Signup.subject());
        assert_eq!(Template::ForgotPassword.name(), "forgotPassword");
    }

    #[test]
    fn markup_in_user_name_is_escaped() {
        let html = Template::Signup.render(&TemplateVars {
            user: "<img src=x>".into(),
            url: "http://localhost:8080/api/v1/confirmMail/abc?a=1&b=\"2\"".into(),
        });
        assert!(!html.contains("<img"));
        assert!(html.contains("Hi &lt;img src=x&gt;,"));
        assert!(html.contains("confirmMail/abc?a=1&amp;b=&quot;2&quot;"));
    }

    #[tokio::test]
    async fn dispatch_delivers_in_background() {
        let (mailer, mut rx) = RecordingMailer::new();
        dispatch(Arc::new(mailer), message());
        let got = rx.recv().await.expect("message delivered");
        assert_eq!(got.to, "a@x.com");
        assert_eq!(secret_from(&got), "abc");
    }

    #[tokio::test]
    async fn dispatch_failure_is_contained() {
        let handle = dispatch(Arc::new(FailingMailer), message());
        assert!(handle.await.is_ok());
    }
}
