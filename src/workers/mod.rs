use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{finish_job, reschedule_job, reserve_job, JobQueueError, JobStatus},
    models::Job,
    state::AppState,
};

pub mod email;
pub mod notify;
pub mod summarize;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

/// Delivers one kind of side effect. Handlers decide whether a failure is
/// worth another attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(job_types = ?self.handlers.keys().collect::<Vec<_>>(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Processes ready jobs until none are left. Returns how many were handled.
    pub async fn drain(&self) -> Result<usize, JobQueueError> {
        let mut handled = 0;
        while self.tick().await? {
            handled += 1;
        }
        Ok(handled)
    }

    async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let job = match self.state.db() {
            Ok(mut conn) => reserve_job(&mut conn, &job_types)?,
            Err(err) => {
                error!(?err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };
        let Some(job) = job else {
            return Ok(false);
        };

        let outcome = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: "no handler registered".to_string(),
            },
        };
        self.settle(&job, outcome)?;
        Ok(true)
    }

    fn settle(&self, job: &Job, outcome: JobExecution) -> Result<(), JobQueueError> {
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                // The job stays in processing; nothing else will pick it up.
                error!(job_id = %job.id, ?err, "could not record job outcome due to pool error");
                return Ok(());
            }
        };

        match outcome {
            JobExecution::Success => {
                finish_job(&mut conn, job.id, JobStatus::Succeeded, None)?;
                info!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, "job completed");
            }
            JobExecution::Retry { delay, error } => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    retry_in_secs = delay.as_secs(),
                    %error,
                    "job will retry"
                );
                reschedule_job(&mut conn, job.id, delay, &error)?;
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, %error, "job failed");
                finish_job(&mut conn, job.id, JobStatus::Failed, Some(&error))?;
            }
        }
        Ok(())
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(notify::DeliverNotificationJob::new()),
        Arc::new(email::SendEmailJob::new()),
        Arc::new(summarize::SummarizeTicketJob::new()),
    ]
}
