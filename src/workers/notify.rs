use std::sync::Arc;

use async_trait::async_trait;

use crate::{effects::Notification, jobs::JOB_DELIVER_NOTIFICATION, models::Job, state::AppState};

use super::{JobExecution, JobHandler};

/// Delivers a queued notification. Delivery is attempted once; a failing sink
/// marks the job failed without retrying.
pub struct DeliverNotificationJob;

impl DeliverNotificationJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for DeliverNotificationJob {
    fn job_type(&self) -> &'static str {
        JOB_DELIVER_NOTIFICATION
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let notification: Notification = match serde_json::from_value(job.payload) {
            Ok(notification) => notification,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid notification payload: {err}"),
                }
            }
        };

        match state.notifier.notify(&notification).await {
            Ok(()) => JobExecution::Success,
            Err(err) => JobExecution::Failed {
                error: format!("notification delivery failed: {err:#}"),
            },
        }
    }
}
