/*!
 * Run orchestration.
 *
 * The record store is partitioned into contiguous ranges and each range is
 * handed to a batch worker; at most `max_concurrent_jobs` batches are in
 * flight at once. Batch failures never abort the run, they are tallied in
 * the run summary. Once interrupted, no new batch is started while
 * in-flight batches finish their current job.
 */

use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::Config;
use crate::providers::BatchService;
use crate::records::RecordStore;

use super::builder::{BatchBuilder, RequestOptions};
use super::merger::ResultMerger;
use super::monitor::JobMonitor;
use super::submitter::JobSubmitter;
use super::worker::{BatchOutcome, BatchStatus, BatchWorker};

/// Totals of one run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total_records: usize,
    /// Records with blank content, never submitted
    pub invalid_records: usize,
    /// Records classified by an earlier run
    pub previously_classified: usize,
    pub batches: usize,
    pub completed_batches: usize,
    pub abandoned_batches: usize,
    pub empty_batches: usize,
    pub cancelled_batches: usize,
    pub jobs_submitted: usize,
    pub merged: usize,
    pub malformed: usize,
    pub unmatched: usize,
    /// Pending records left unclassified by abandoned or shrunk batches
    pub abandoned_records: usize,
    /// Records classified once the run ended
    pub classified: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn add(&mut self, outcome: &BatchOutcome) {
        match outcome.status {
            BatchStatus::Completed => self.completed_batches += 1,
            BatchStatus::Abandoned(_) => self.abandoned_batches += 1,
            BatchStatus::Empty => self.empty_batches += 1,
            BatchStatus::Cancelled => self.cancelled_batches += 1,
        }
        self.jobs_submitted += outcome.jobs as usize;
        self.merged += outcome.merged;
        self.malformed += outcome.malformed;
        self.unmatched += outcome.unmatched;
        self.abandoned_records += outcome.abandoned_records;
    }

    /// Log the summary block
    pub fn log(&self) {
        info!("Run finished in {:.1}s", self.elapsed.as_secs_f64());
        info!(
            "Records: {} total, {} classified, {} empty, {} from a previous run",
            self.total_records, self.classified, self.invalid_records, self.previously_classified
        );
        info!(
            "Batches: {} total, {} completed, {} abandoned, {} empty, {} not started",
            self.batches,
            self.completed_batches,
            self.abandoned_batches,
            self.empty_batches,
            self.cancelled_batches
        );
        info!(
            "Jobs submitted: {}, results merged: {}, malformed lines: {}",
            self.jobs_submitted, self.merged, self.malformed
        );
        if self.unmatched > 0 || self.abandoned_records > 0 {
            warn!(
                "{} requests returned no result and {} records were abandoned; rerun to resume",
                self.unmatched, self.abandoned_records
            );
        }
        if self.interrupted {
            warn!("Run was interrupted; rerun with the same arguments to resume");
        }
    }
}

/// Drives all batches of a run
#[derive(Debug)]
pub struct BatchOrchestrator {
    worker: Arc<BatchWorker>,
    store: Arc<RecordStore>,
    merger: Arc<ResultMerger>,
    batch_size: usize,
    max_concurrent_jobs: usize,
    cancelled: Arc<AtomicBool>,
}

impl BatchOrchestrator {
    /// Wire the batch pipeline for `store` against `service`
    pub fn new(
        service: Arc<dyn BatchService>,
        store: Arc<RecordStore>,
        merger: Arc<ResultMerger>,
        config: &Config,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let builder = BatchBuilder::new(store.clone(), &config.taxonomy);
        let submitter = JobSubmitter::new(
            service.clone(),
            RequestOptions::from(&config.provider),
            config.provider.completion_window.clone(),
            config.batch.staging_dir.clone(),
            Duration::from_millis(config.batch.submission_spacing_ms),
            config.debug,
        );
        let monitor = JobMonitor::new(service.clone(), config.batch.poll_interval());
        let worker = BatchWorker::new(
            service,
            builder,
            submitter,
            monitor,
            merger.clone(),
            config.taxonomy.categories.clone(),
            config.batch.clone(),
            config.debug,
            cancelled.clone(),
        );

        Self {
            worker: Arc::new(worker),
            store,
            merger,
            batch_size: config.batch.batch_size,
            max_concurrent_jobs: config.batch.max_concurrent_jobs.max(1),
            cancelled,
        }
    }

    /// Ranges the run will process, in order
    pub fn batch_ranges(&self) -> Vec<Range<usize>> {
        self.worker.builder().partition(self.batch_size)
    }

    /// Process every batch and return the run totals
    ///
    /// `progress_callback` receives (finished batches, total batches).
    pub async fn run(&self, progress_callback: impl Fn(usize, usize) + Clone + Send + 'static) -> RunSummary {
        let start = Instant::now();
        let ranges = self.batch_ranges();
        let total_batches = ranges.len();
        let finished = Arc::new(AtomicUsize::new(0));

        info!(
            "Processing {} records in {} batches ({} pending, up to {} concurrent jobs)",
            self.store.len(),
            total_batches,
            self.store.pending_count(),
            self.max_concurrent_jobs
        );

        let outcomes = stream::iter(ranges.into_iter().enumerate())
            .map(|(index, range)| {
                let worker = self.worker.clone();
                let finished = finished.clone();
                let progress_callback = progress_callback.clone();

                async move {
                    let outcome = worker.run(index, range).await;
                    let current = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    progress_callback(current, total_batches);
                    outcome
                }
            })
            .buffer_unordered(self.max_concurrent_jobs)
            .collect::<Vec<_>>()
            .await;

        let mut summary = RunSummary {
            total_records: self.store.len(),
            invalid_records: self.store.invalid_count(),
            previously_classified: self.store.completed_count(),
            batches: total_batches,
            interrupted: self.cancelled.load(Ordering::SeqCst),
            ..Default::default()
        };
        for outcome in &outcomes {
            summary.add(outcome);
        }
        summary.classified = self.merger.classified_count();
        summary.elapsed = start.elapsed();
        summary
    }
}
