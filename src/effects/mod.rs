//! Best-effort collaborators triggered by lifecycle transitions.
//!
//! Nothing in here may fail the operation that triggered it: side effects are
//! queued as jobs after the transaction commits and delivered by the worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::jobs::{enqueue_job, JOB_DELIVER_NOTIFICATION, JOB_SEND_EMAIL, JOB_SUMMARIZE_TICKET};
use crate::state::AppState;

pub mod summarizer;
pub mod webhook;

pub use summarizer::{HttpSummaryGenerator, TemplateSummaryGenerator};
pub use webhook::{LogEmailDispatcher, LogNotificationSink, WebhookEmailDispatcher, WebhookNotificationSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assigned,
    StatusChanged,
    CommentAdded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Everything a summary generator gets to see about a closed ticket.
#[derive(Debug, Clone, Serialize)]
pub struct TicketDigest {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
    pub status_history: Vec<String>,
    pub public_comments: Vec<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync + 'static {
    async fn summarize(&self, digest: &TicketDigest) -> Result<String>;
}

#[async_trait]
pub trait EmailDispatcher: Send + Sync + 'static {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Notify(Notification),
    Summarize { ticket_id: Uuid },
    Email(OutgoingEmail),
}

#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn NotificationSink>,
    pub summarizer: Arc<dyn SummaryGenerator>,
    pub mailer: Arc<dyn EmailDispatcher>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.summary_timeout_seconds.max(1)))
            .build()?;

        let notifier: Arc<dyn NotificationSink> = match &config.notification_webhook_url {
            Some(url) => Arc::new(WebhookNotificationSink::new(client.clone(), url.clone())),
            None => Arc::new(LogNotificationSink),
        };

        let summarizer: Arc<dyn SummaryGenerator> = match &config.summary_endpoint {
            Some(endpoint) => Arc::new(HttpSummaryGenerator::new(
                client.clone(),
                endpoint.clone(),
                config.summary_api_key.clone(),
            )),
            None => Arc::new(TemplateSummaryGenerator),
        };

        let mailer: Arc<dyn EmailDispatcher> = match &config.email_webhook_url {
            Some(url) => Arc::new(WebhookEmailDispatcher::new(
                client,
                url.clone(),
                config.email_from.clone(),
            )),
            None => Arc::new(LogEmailDispatcher),
        };

        Ok(Self {
            notifier,
            summarizer,
            mailer,
        })
    }
}

/// Queues side effects for the worker. Failures are logged and swallowed.
pub fn dispatch(state: &AppState, effects: Vec<SideEffect>) {
    if effects.is_empty() {
        return;
    }

    let mut conn = match state.db() {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = ?err, count = effects.len(), "dropping side effects due to pool error");
            return;
        }
    };

    for effect in effects {
        let (job_type, payload) = match &effect {
            SideEffect::Notify(notification) => (JOB_DELIVER_NOTIFICATION, json!(notification)),
            SideEffect::Summarize { ticket_id } => {
                (JOB_SUMMARIZE_TICKET, json!({ "ticket_id": ticket_id }))
            }
            SideEffect::Email(email) => (JOB_SEND_EMAIL, json!(email)),
        };

        if let Err(err) = enqueue_job(&mut conn, job_type, payload, None) {
            warn!(job_type, error = %err, "failed to enqueue side effect");
        }
    }
}
