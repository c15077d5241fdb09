use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    jobs::{backoff_for, JOB_SUMMARIZE_TICKET, MAX_SUMMARY_ATTEMPTS},
    lifecycle::{summarize_ticket, SummaryError},
    models::Job,
    state::AppState,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct SummarizePayload {
    ticket_id: Uuid,
}

pub struct SummarizeTicketJob;

impl SummarizeTicketJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for SummarizeTicketJob {
    fn job_type(&self) -> &'static str {
        JOB_SUMMARIZE_TICKET
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: SummarizePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid summarize payload: {err}"),
                }
            }
        };

        match summarize_ticket(&state, payload.ticket_id).await {
            Ok(_) => JobExecution::Success,
            // Nothing left to summarize.
            Err(err @ (SummaryError::NotFound | SummaryError::NotClosed)) => {
                warn!(job_id = %job.id, ticket_id = %payload.ticket_id, error = %err, "skipping summary");
                JobExecution::Success
            }
            Err(err) if job.attempts < MAX_SUMMARY_ATTEMPTS => JobExecution::Retry {
                delay: backoff_for(job.attempts),
                error: err.to_string(),
            },
            Err(err) => JobExecution::Failed {
                error: err.to_string(),
            },
        }
    }
}
