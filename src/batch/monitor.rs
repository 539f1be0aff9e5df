/*!
 * Job monitoring: polling a submitted job until it reaches a terminal state.
 */

use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{BatchService, JobStatus, RemoteJob};

/// Terminal state of a job as seen by the monitor
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(RemoteJob),
    Failed(RemoteJob),
    /// Ended in a status outside the known lifecycle (cancelled, expired, ...)
    Unexpected(RemoteJob),
}

/// Polls job status at a fixed interval
#[derive(Debug, Clone)]
pub struct JobMonitor {
    service: Arc<dyn BatchService>,
    poll_interval: Duration,
}

impl JobMonitor {
    pub fn new(service: Arc<dyn BatchService>, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_interval,
        }
    }

    /// Wait for `job_id` to leave the active states
    ///
    /// A failed status query is returned to the caller, which owns the retry
    /// budget; the job itself keeps running remotely.
    pub async fn wait(&self, job_id: &str, label: &str) -> Result<JobOutcome, ProviderError> {
        let mut last_status: Option<JobStatus> = None;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let job = self.service.retrieve_job(job_id).await?;
            let status = job.job_status();

            if last_status.as_ref() != Some(&status) {
                info!(
                    "[{}] {} job {} status: {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    label,
                    job_id,
                    status
                );
            } else {
                debug!("{} job {} still {}", label, job_id, status);
            }

            match status {
                JobStatus::Completed => return Ok(JobOutcome::Completed(job)),
                JobStatus::Failed => return Ok(JobOutcome::Failed(job)),
                JobStatus::Other(ref raw) => {
                    warn!("{} job {} ended with unexpected status '{}'", label, job_id, raw);
                    return Ok(JobOutcome::Unexpected(job));
                }
                _ => last_status = Some(status),
            }
        }
    }
}
