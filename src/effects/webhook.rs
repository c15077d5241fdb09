use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use super::{EmailDispatcher, Notification, NotificationSink, OutgoingEmail};

pub struct WebhookNotificationSink {
    client: Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("failed to reach notification webhook")?
            .error_for_status()
            .context("notification webhook rejected the request")?;
        Ok(())
    }
}

pub struct WebhookEmailDispatcher {
    client: Client,
    url: String,
    from: String,
}

impl WebhookEmailDispatcher {
    pub fn new(client: Client, url: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailDispatcher for WebhookEmailDispatcher {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let body = json!({
            "from": self.from,
            "to": email.to,
            "subject": email.subject,
            "text": email.body,
        });

        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("failed to reach email webhook")?
            .error_for_status()
            .context("email webhook rejected the request")?;
        Ok(())
    }
}

/// Used when no notification webhook is configured.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            recipient_id = %notification.recipient_id,
            ticket_id = %notification.ticket_id,
            ticket_number = %notification.ticket_number,
            kind = ?notification.kind,
            "notification (no webhook configured)"
        );
        Ok(())
    }
}

pub struct LogEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogEmailDispatcher {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "email (no webhook configured)");
        Ok(())
    }
}
