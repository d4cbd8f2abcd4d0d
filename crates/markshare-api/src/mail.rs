//! Outgoing account emails.
//!
//! The actual SMTP delivery belongs to a relay service; this side renders the
//! message and hands it over as JSON.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Messages kept by a capturing [`MailManager`].
#[derive(Debug, Clone, Default)]
pub struct Outbox(Arc<Mutex<Vec<OutgoingMail>>>);

impl Outbox {
    pub fn messages(&self) -> Vec<OutgoingMail> {
        self.0.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[derive(Clone)]
enum Transport {
    /// POST to an HTTP mail relay.
    Relay {
        client: reqwest::Client,
        endpoint: String,
    },
    /// No relay configured: log the message instead.
    Log,
    Capture(Outbox),
}

#[derive(Clone)]
pub struct MailManager {
    from: String,
    public_url: String,
    transport: Transport,
}

impl MailManager {
    pub fn relay(from: &str, public_url: &str, endpoint: &str) -> Self {
        Self::with_transport(
            from,
            public_url,
            Transport::Relay {
                client: reqwest::Client::new(),
                endpoint: endpoint.to_string(),
            },
        )
    }

    pub fn log_only(from: &str, public_url: &str) -> Self {
        Self::with_transport(from, public_url, Transport::Log)
    }

    /// Keeps every message in memory; returns the handle to read them back.
    pub fn capturing(from: &str, public_url: &str) -> (Self, Outbox) {
        let outbox = Outbox::default();
        let manager = Self::with_transport(from, public_url, Transport::Capture(outbox.clone()));
        (manager, outbox)
    }

    fn with_transport(from: &str, public_url: &str, transport: Transport) -> Self {
        Self {
            from: from.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub async fn send_verification(&self, to: &str, token: &str) -> anyhow::Result<()> {
        let link = format!("{}/verify-email?token={token}", self.public_url);
        let html = render(
            "Verify your email address",
            "Thank you for registering! Please click the button below to verify your email address:",
            "Verify Email",
            &link,
            "This link will expire in 24 hours.",
        );
        self.deliver(to, "Verify your email address", html).await
    }

    pub async fn send_password_reset(&self, to: &str, token: &str) -> anyhow::Result<()> {
        let link = format!("{}/reset-password?token={token}", self.public_url);
        let html = render(
            "Reset your password",
            "You requested to reset your password. Click the button below to create a new password:",
            "Reset Password",
            &link,
            "This link will expire in 1 hour. If you didn't request this, you can safely ignore this email.",
        );
        self.deliver(to, "Reset your password", html).await
    }

    async fn deliver(&self, to: &str, subject: &str, html: String) -> anyhow::Result<()> {
        let mail = OutgoingMail {
            from: self.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            html,
        };

        match &self.transport {
            Transport::Relay { client, endpoint } => {
                client
                    .post(endpoint)
                    .json(&mail)
                    .send()
                    .await
                    .context("mail relay unreachable")?
                    .error_for_status()
                    .context("mail relay refused message")?;
                tracing::debug!(to, subject, "mail handed to relay");
            }
            Transport::Log => {
                tracing::info!(to, subject, html = %mail.html, "mail relay not configured, logging message");
            }
            Transport::Capture(outbox) => {
                outbox
                    .0
                    .lock()
                    .map_err(|e| anyhow::anyhow!("outbox lock poisoned: {e}"))?
                    .push(mail);
            }
        }

        Ok(())
    }
}

fn render(heading: &str, intro: &str, action: &str, link: &str, footer: &str) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>{heading}</h2>
  <p>{intro}</p>
  <a href="{link}" style="display: inline-block; padding: 12px 24px; background-color: #4F46E5; color: white; text-decoration: none; border-radius: 6px; margin: 16px 0;">{action}</a>
  <p>Or copy and paste this link into your browser:</p>
  <p>{link}</p>
  <p>{footer}</p>
</div>"#
    )
}
