/*!
 * Job submission: staging a manifest, uploading it and creating the job.
 */

use bytes::Bytes;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::errors::BatchError;
use crate::file_utils::FileManager;
use crate::providers::{BatchService, RemoteJob};

use super::builder::{BatchManifest, RequestOptions};

/// Enforces a minimum delay between consecutive submissions
#[derive(Debug)]
pub struct SubmissionThrottle {
    spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl SubmissionThrottle {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last: Mutex::new(None),
        }
    }

    /// Wait until a submission is allowed, then claim the slot
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.spacing {
                tokio::time::sleep(self.spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// A job accepted by the service
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job: RemoteJob,
    /// Local copy of the uploaded manifest
    pub manifest_path: PathBuf,
    /// Tag shared by every staging artifact of this attempt
    pub tag: String,
    pub request_count: usize,
}

/// Stages manifests and submits them as batch jobs
#[derive(Debug)]
pub struct JobSubmitter {
    service: Arc<dyn BatchService>,
    options: RequestOptions,
    completion_window: String,
    staging_dir: PathBuf,
    throttle: SubmissionThrottle,
    debug: bool,
}

impl JobSubmitter {
    pub fn new(
        service: Arc<dyn BatchService>,
        options: RequestOptions,
        completion_window: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        spacing: Duration,
        debug: bool,
    ) -> Self {
        Self {
            service,
            options,
            completion_window: completion_window.into(),
            staging_dir: staging_dir.into(),
            throttle: SubmissionThrottle::new(spacing),
            debug,
        }
    }

    /// Submit `manifest` as attempt `retry` of batch `batch_index`
    ///
    /// Any failure is reported as a submission or staging error; the caller
    /// decides whether the batch is abandoned.
    pub async fn submit(
        &self,
        batch_index: usize,
        retry: u32,
        manifest: &BatchManifest,
    ) -> Result<SubmittedJob, BatchError> {
        if manifest.is_empty() {
            return Err(BatchError::EmptyBatch(batch_index));
        }

        let tag = FileManager::short_tag();
        let manifest_path =
            FileManager::staging_path(&self.staging_dir, "batch", batch_index, retry, &tag, "jsonl");

        let jsonl = manifest
            .to_jsonl(&self.options)
            .map_err(|e| BatchError::Staging(e.to_string()))?;
        FileManager::write_to_file(&manifest_path, &jsonl)
            .map_err(|e| BatchError::Staging(format!("{:#}", e)))?;

        if self.debug {
            if let Some(sample) = manifest.sample_request(&self.options) {
                let sample_path = FileManager::with_suffix(&manifest_path, ".sample.json");
                FileManager::write_to_file(&sample_path, &sample)
                    .map_err(|e| BatchError::Staging(format!("{:#}", e)))?;
            }
        }

        self.throttle.wait().await;

        let file_name = manifest_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("batch_{}_{}.jsonl", batch_index, tag));
        let file = self
            .service
            .upload_manifest(&file_name, Bytes::from(jsonl))
            .await
            .map_err(BatchError::Submission)?;
        debug!("Uploaded {} as {}", file_name, file.id);

        let job = self
            .service
            .create_job(&file.id, &self.options.url, &self.completion_window)
            .await
            .map_err(BatchError::Submission)?;

        info!(
            "Batch {} submitted as job {} ({} requests, rows {}-{})",
            batch_index,
            job.id,
            manifest.len(),
            manifest.range.start,
            manifest.range.end
        );

        Ok(SubmittedJob {
            job,
            manifest_path,
            tag,
            request_count: manifest.len(),
        })
    }
}
