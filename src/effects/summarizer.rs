use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{SummaryGenerator, TicketDigest};

const SUMMARY_INSTRUCTIONS: &str = "Summarize this closed support ticket for the knowledge base: \
the reported problem, what was done, and how it was resolved. Keep it under 120 words.";

pub struct HttpSummaryGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSummaryGenerator {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[async_trait]
impl SummaryGenerator for HttpSummaryGenerator {
    async fn summarize(&self, digest: &TicketDigest) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "instructions": SUMMARY_INSTRUCTIONS,
            "ticket": digest,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("failed to reach summary endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("summary endpoint returned {status}: {body}"));
        }

        let parsed: SummaryResponse = response
            .json()
            .await
            .context("summary endpoint returned malformed JSON")?;
        let summary = parsed.summary.trim().to_string();
        if summary.is_empty() {
            return Err(anyhow!("summary endpoint returned an empty summary"));
        }
        Ok(summary)
    }
}

/// Deterministic summary built from the ticket's own record. Used when no
/// text-generation endpoint is configured.
pub struct TemplateSummaryGenerator;

#[async_trait]
impl SummaryGenerator for TemplateSummaryGenerator {
    async fn summarize(&self, digest: &TicketDigest) -> Result<String> {
        Ok(render_template(digest))
    }
}

fn render_template(digest: &TicketDigest) -> String {
    let mut lines = vec![format!(
        "{} ({} priority): {}",
        digest.ticket_number, digest.priority, digest.title
    )];
    lines.push(format!("Reported: {}", first_sentence(&digest.description)));

    if !digest.status_history.is_empty() {
        lines.push(format!("Status history: {}", digest.status_history.join(" -> ")));
    }
    match digest.public_comments.len() {
        0 => {}
        1 => lines.push("1 reply on the ticket.".to_string()),
        n => lines.push(format!("{n} replies on the ticket.")),
    }
    if let Some(closed_at) = &digest.closed_at {
        lines.push(format!("Closed at {closed_at}."));
    }

    lines.join("\n")
}

fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.find(['.', '\n']) {
        Some(idx) => trimmed[..=idx].trim_end_matches('\n'),
        None => trimmed,
    }
}
