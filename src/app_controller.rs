use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::Config;
use crate::errors::AppError;
use crate::batch::{BatchOrchestrator, ResultMerger, RunSummary};
use crate::checkpoint::{load_checkpoint, CheckpointWriter};
use crate::file_utils::FileManager;
use crate::ledger::Ledger;
use crate::providers::openai::OpenAI;
use crate::providers::{BatchService, JobStatus, RemoteJob};
use crate::records::RecordStore;

// @module: Application controller for batch classification runs

/// Delay between two cancellation requests
const CANCEL_SPACING: Duration = Duration::from_millis(500);

/// Result of a cancellation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Active jobs found
    pub found: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Main application controller for classification runs
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Set once the run is interrupted
    cancelled: Arc<AtomicBool>,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flag that stops new batches from starting once set
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Batch service built from the provider configuration
    pub fn service(&self) -> Arc<dyn BatchService> {
        let provider = &self.config.provider;
        Arc::new(OpenAI::new(
            provider.api_key.clone(),
            provider.endpoint.clone(),
            provider.timeout_secs,
        ))
    }

    /// `<output>.partial`
    pub fn default_checkpoint_path(output: &Path) -> PathBuf {
        FileManager::with_suffix(output, ".partial")
    }

    /// Classify `input` into `output` against the configured service
    pub async fn run(&self, input: &Path, output: &Path, checkpoint: Option<&Path>) -> Result<RunSummary> {
        self.run_with_service(self.service(), input, output, checkpoint).await
    }

    /// Classify `input` into `output` using `service`
    ///
    /// Only an unreadable input, an unusable staging directory or a failed
    /// final write are errors; batch failures are reported in the summary.
    pub async fn run_with_service(
        &self,
        service: Arc<dyn BatchService>,
        input: &Path,
        output: &Path,
        checkpoint: Option<&Path>,
    ) -> Result<RunSummary> {
        let checkpoint_path = checkpoint
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::default_checkpoint_path(output));

        let mut store = RecordStore::load(input, &self.config.records)
            .with_context(|| format!("Failed to load learning outcomes from {:?}", input))?;
        info!("Loaded {} learning outcomes from {:?}", store.len(), input);

        let ledger = self.resume_ledger(&checkpoint_path, output);
        if !ledger.is_empty() {
            let marked = store.annotate_completed(&ledger.classified_keys());
            info!("Resuming: {} outcomes already classified", marked);
        }

        FileManager::ensure_dir(&self.config.batch.staging_dir)
            .context("Failed to prepare the staging directory")?;

        let store = Arc::new(store);
        let writer = CheckpointWriter::new(&checkpoint_path, self.config.taxonomy.clone());
        let merger = Arc::new(ResultMerger::new(store.clone(), ledger, writer));
        let orchestrator = BatchOrchestrator::new(
            service,
            store.clone(),
            merger.clone(),
            &self.config,
            self.cancelled.clone(),
        );

        info!(
            "Classifying with {} ({} per batch, {} concurrent jobs)",
            self.config.provider.model, self.config.batch.batch_size, self.config.batch.max_concurrent_jobs
        );

        let progress_bar = ProgressBar::new(orchestrator.batch_ranges().len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));
        progress_bar.set_message("Classifying");

        let pb = progress_bar.clone();
        let summary = orchestrator
            .run(move |finished, _total| {
                pb.set_position(finished as u64);
            })
            .await;
        progress_bar.finish_and_clear();

        merger
            .write_output(output)
            .with_context(|| format!("Failed to write results to {:?}", output))?;
        info!("Results saved to {:?}", output);
        summary.log();

        Ok(summary)
    }

    /// Ledger from the checkpoint, or from a previous output, or empty
    fn resume_ledger(&self, checkpoint: &Path, output: &Path) -> Ledger {
        let source = [checkpoint, output]
            .into_iter()
            .find(|p| FileManager::file_exists(p));
        let Some(source) = source else {
            return Ledger::new();
        };

        info!("Found previous results at {:?}", source);
        match load_checkpoint(source, &self.config.records, &self.config.taxonomy) {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!("Could not resume from {:?}, starting fresh: {:#}", source, e);
                Ledger::new()
            }
        }
    }

    /// Cancel active jobs among the `limit` most recent ones
    ///
    /// `confirm` sees the active jobs and decides whether to go ahead.
    pub async fn cancel_active_jobs(
        &self,
        service: Arc<dyn BatchService>,
        limit: usize,
        confirm: impl FnOnce(&[RemoteJob]) -> bool,
    ) -> Result<CancelReport> {
        let jobs = service
            .list_jobs(limit)
            .await
            .context("Failed to list batch jobs")?;

        let active: Vec<RemoteJob> = jobs
            .into_iter()
            .filter(|job| {
                matches!(
                    job.job_status(),
                    JobStatus::Validating | JobStatus::InProgress | JobStatus::Queued
                )
            })
            .collect();

        let mut report = CancelReport {
            found: active.len(),
            ..Default::default()
        };
        if active.is_empty() {
            info!("No active batch jobs found");
            return Ok(report);
        }

        for job in &active {
            let created = job
                .created_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            info!("{} ({}) created {}", job.id, job.status, created);
        }

        if !confirm(&active) {
            info!("Cancellation aborted");
            return Ok(report);
        }

        for (i, job) in active.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(CANCEL_SPACING).await;
            }
            match service.cancel_job(&job.id).await {
                Ok(updated) => {
                    info!("Cancelled {} (now {})", job.id, updated.status);
                    report.cancelled += 1;
                }
                Err(e) => {
                    warn!("Failed to cancel {}: {}", job.id, e);
                    report.failed += 1;
                }
            }
        }

        info!("Cancelled {}/{} active jobs", report.cancelled, report.found);
        Ok(report)
    }
}
