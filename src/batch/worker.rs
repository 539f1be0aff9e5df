/*!
 * The per-batch pipeline: build, submit, monitor, retry and merge.
 *
 * Each batch runs as an explicit loop with a single retry counter shared by
 * job failures and monitoring errors. From the second job failure on, the
 * range shrinks to its first half; the discarded half is abandoned for this
 * run and picked up again when the run is resumed.
 */

use log::{debug, error, info, warn};
use rand::Rng;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::BatchConfig;
use crate::errors::BatchError;
use crate::file_utils::FileManager;
use crate::providers::{BatchService, RemoteJob};

use super::builder::BatchBuilder;
use super::merger::{parse_output, ResultMerger};
use super::monitor::{JobMonitor, JobOutcome};
use super::submitter::{JobSubmitter, SubmittedJob};

/// First half of `range`, never shorter than one position
pub fn halve(range: &Range<usize>) -> Range<usize> {
    let keep = (range.len() / 2).max(1).min(range.len());
    range.start..range.start + keep
}

/// How a batch ended
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    /// A job completed and its results were merged
    Completed,
    /// Given up; the reason is kept for the run summary
    Abandoned(String),
    /// Nothing to submit in the range
    Empty,
    /// Not started, or not resubmitted, because the run was interrupted
    Cancelled,
}

/// Result of running one batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub index: usize,
    /// Range the batch was created with
    pub range: Range<usize>,
    pub status: BatchStatus,
    /// Jobs submitted for this batch
    pub jobs: u32,
    pub retries: u32,
    /// Results accepted by the merger
    pub merged: usize,
    /// Malformed or out-of-range output lines
    pub malformed: usize,
    /// Submitted requests with no usable result
    pub unmatched: usize,
    /// Pending records not classified by this batch
    pub abandoned_records: usize,
}

impl BatchOutcome {
    fn new(index: usize, range: Range<usize>) -> Self {
        Self {
            index,
            range,
            status: BatchStatus::Empty,
            jobs: 0,
            retries: 0,
            merged: 0,
            malformed: 0,
            unmatched: 0,
            abandoned_records: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}

/// Counts from collecting a completed job
#[derive(Debug, Default, Clone, Copy)]
struct Collected {
    merged: usize,
    malformed: usize,
    unmatched: usize,
}

/// Runs batches through the full job lifecycle
#[derive(Debug)]
pub struct BatchWorker {
    service: Arc<dyn BatchService>,
    builder: BatchBuilder,
    submitter: JobSubmitter,
    monitor: JobMonitor,
    merger: Arc<ResultMerger>,
    categories: Vec<String>,
    batch: BatchConfig,
    staging_dir: PathBuf,
    debug: bool,
    cancelled: Arc<AtomicBool>,
}

impl BatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<dyn BatchService>,
        builder: BatchBuilder,
        submitter: JobSubmitter,
        monitor: JobMonitor,
        merger: Arc<ResultMerger>,
        categories: Vec<String>,
        batch: BatchConfig,
        debug: bool,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            service,
            builder,
            submitter,
            monitor,
            merger,
            categories,
            staging_dir: batch.staging_dir.clone(),
            batch,
            debug,
            cancelled,
        }
    }

    pub fn builder(&self) -> &BatchBuilder {
        &self.builder
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn abandon(&self, mut outcome: BatchOutcome, reason: String) -> BatchOutcome {
        outcome.abandoned_records = self.builder.pending_in(&outcome.range);
        error!(
            "Batch {} abandoned ({} records left unclassified): {}",
            outcome.index, outcome.abandoned_records, reason
        );
        outcome.status = BatchStatus::Abandoned(reason);
        outcome
    }

    /// Spend one unit of the retry budget, if any is left
    fn next_retry(&self, outcome: &mut BatchOutcome) -> bool {
        if outcome.retries >= self.batch.max_retries {
            return false;
        }
        outcome.retries += 1;
        true
    }

    /// Exponential backoff plus up to 10% jitter
    fn retry_delay(&self, retries: u32) -> Duration {
        let base = self.batch.backoff_for(retries);
        let jitter_ms = (base.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Process batch `index` covering `range`
    pub async fn run(&self, index: usize, range: Range<usize>) -> BatchOutcome {
        let label = format!("Batch {}", index);
        let mut outcome = BatchOutcome::new(index, range.clone());

        if self.is_cancelled() {
            outcome.status = BatchStatus::Cancelled;
            outcome.abandoned_records = self.builder.pending_in(&outcome.range);
            return outcome;
        }

        let manifest = self.builder.build(range.clone());
        if manifest.is_empty() {
            info!("Skipping {}: no valid requests", label);
            return outcome;
        }

        let mut current = range;
        let mut submitted = match self.submitter.submit(index, 0, &manifest).await {
            Ok(submitted) => submitted,
            Err(e) => return self.abandon(outcome, e.to_string()),
        };
        outcome.jobs += 1;

        loop {
            match self.monitor.wait(&submitted.job.id, &label).await {
                Ok(JobOutcome::Completed(job)) => {
                    match self.collect(&label, index, &submitted, &job, &current).await {
                        Ok(collected) => {
                            outcome.merged = collected.merged;
                            outcome.malformed = collected.malformed;
                            outcome.unmatched = collected.unmatched;
                            outcome.abandoned_records =
                                self.builder.pending_in(&(current.end..outcome.range.end));
                            if outcome.abandoned_records > 0 {
                                warn!(
                                    "{}: rows {}-{} were dropped while shrinking; {} records left for a later run",
                                    label, current.end, outcome.range.end, outcome.abandoned_records
                                );
                            }
                            outcome.status = BatchStatus::Completed;
                            info!("{} completed: {} results merged", label, collected.merged);
                            return outcome;
                        }
                        Err(e) => {
                            // The job stays completed remotely; re-polling returns at once
                            if !self.next_retry(&mut outcome) {
                                return self.abandon(outcome, e.to_string());
                            }
                            warn!("{}: {} (retry {}/{})", label, e, outcome.retries, self.batch.max_retries);
                            tokio::time::sleep(self.retry_delay(outcome.retries)).await;
                        }
                    }
                }
                Ok(JobOutcome::Failed(job)) => {
                    let failure = BatchError::JobFailed {
                        job_id: job.id.clone(),
                        message: job.error_summary(),
                    };
                    error!("{}: {}", label, failure);
                    self.dump_failed_job(index, &submitted, &job);

                    if !self.next_retry(&mut outcome) {
                        error!("{} failed after {} retries. Giving up.", label, self.batch.max_retries);
                        return self.abandon(outcome, failure.to_string());
                    }
                    if self.is_cancelled() {
                        info!("{}: not resubmitting after interrupt", label);
                        outcome.status = BatchStatus::Cancelled;
                        outcome.abandoned_records = self.builder.pending_in(&outcome.range);
                        return outcome;
                    }

                    if outcome.retries > 1 {
                        let shrunk = halve(&current);
                        info!(
                            "{}: reducing batch from {} to {} rows ({}-{})",
                            label,
                            current.len(),
                            shrunk.len(),
                            shrunk.start,
                            shrunk.end
                        );
                        current = shrunk;
                    }

                    let delay = self.retry_delay(outcome.retries);
                    info!(
                        "{}: retrying in {:?} (attempt {}/{})",
                        label, delay, outcome.retries, self.batch.max_retries
                    );
                    tokio::time::sleep(delay).await;

                    let manifest = self.builder.build(current.clone());
                    if manifest.is_empty() {
                        return self.abandon(outcome, "no valid requests left after shrinking".to_string());
                    }
                    submitted = match self.submitter.submit(index, outcome.retries, &manifest).await {
                        Ok(submitted) => submitted,
                        Err(e) => return self.abandon(outcome, e.to_string()),
                    };
                    outcome.jobs += 1;
                }
                Ok(JobOutcome::Unexpected(job)) => {
                    let err = BatchError::UnexpectedStatus {
                        job_id: job.id.clone(),
                        status: job.status.clone(),
                    };
                    return self.abandon(outcome, err.to_string());
                }
                Err(e) => {
                    let transient = e.is_transient();
                    let err = BatchError::Monitoring(e);
                    if !transient {
                        error!("{}: {}", label, err);
                        return self.abandon(outcome, err.to_string());
                    }
                    if !self.next_retry(&mut outcome) {
                        return self.abandon(outcome, err.to_string());
                    }
                    warn!("{}: {} (retry {}/{})", label, err, outcome.retries, self.batch.max_retries);
                    tokio::time::sleep(self.retry_delay(outcome.retries)).await;
                }
            }
        }
    }

    /// Download, stage and merge the output of a completed job
    async fn collect(
        &self,
        label: &str,
        index: usize,
        submitted: &SubmittedJob,
        job: &RemoteJob,
        range: &Range<usize>,
    ) -> Result<Collected, BatchError> {
        if let Some(error_file) = &job.error_file_id {
            match self.service.download_file(error_file).await {
                Ok(text) => {
                    let path = FileManager::staging_path(&self.staging_dir, "errors", index, 0, &submitted.tag, "jsonl");
                    if let Err(e) = FileManager::write_to_file(&path, &text) {
                        warn!("{}: could not save error file: {:#}", label, e);
                    }
                }
                Err(e) => warn!("{}: could not download error file {}: {}", label, error_file, e),
            }
        }

        let Some(output_file) = &job.output_file_id else {
            warn!("{}: job {} completed without an output file", label, job.id);
            return Ok(Collected {
                unmatched: submitted.request_count,
                ..Default::default()
            });
        };

        let text = self
            .service
            .download_file(output_file)
            .await
            .map_err(BatchError::Download)?;

        let results_path = FileManager::staging_path(&self.staging_dir, "results", index, 0, &submitted.tag, "jsonl");
        match FileManager::write_to_file(&results_path, &text) {
            Ok(()) => debug!("{}: raw results saved to {:?}", label, results_path),
            Err(e) => warn!("{}: could not save raw results: {:#}", label, e),
        }

        let parsed = parse_output(&text, range, &self.categories);
        let report = self.merger.merge(label, &parsed.results);
        let unmatched = submitted.request_count.saturating_sub(parsed.results.len());
        if unmatched > 0 {
            warn!("{}: {} requests returned no usable result", label, unmatched);
        }

        Ok(Collected {
            merged: report.merged(),
            malformed: parsed.malformed,
            unmatched,
        })
    }

    fn dump_failed_job(&self, index: usize, submitted: &SubmittedJob, job: &RemoteJob) {
        if !self.debug {
            return;
        }
        let path = FileManager::staging_path(&self.staging_dir, "errors", index, 0, &submitted.tag, "json");
        if let Err(e) = FileManager::write_json_pretty(&path, job) {
            warn!("Could not write failed job details to {:?}: {:#}", path, e);
        }
    }
}
