use std::sync::Arc;

use async_trait::async_trait;

use crate::{effects::OutgoingEmail, jobs::JOB_SEND_EMAIL, models::Job, state::AppState};

use super::{JobExecution, JobHandler};

pub struct SendEmailJob;

impl SendEmailJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let email: OutgoingEmail = match serde_json::from_value(job.payload) {
            Ok(email) => email,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };

        // At most once: a failed send is not retried.
        match state.mailer.send(&email).await {
            Ok(()) => JobExecution::Success,
            Err(err) => JobExecution::Failed {
                error: format!("email dispatch to {} failed: {err:#}", email.to),
            },
        }
    }
}
