/*!
 * Batch pipeline.
 *
 * - `builder`: partitioning and manifest rendering
 * - `submitter`: staging, upload and job creation
 * - `monitor`: status polling
 * - `merger`: output parsing and ledger updates
 * - `worker`: the per-batch retry loop
 * - `orchestrator`: bounded-concurrency run over all batches
 */

pub mod builder;
pub mod merger;
pub mod monitor;
pub mod orchestrator;
pub mod submitter;
pub mod worker;

pub use builder::{BatchBuilder, BatchManifest, RequestId, RequestOptions};
pub use merger::{parse_output, MergeReport, ResultMerger};
pub use monitor::{JobMonitor, JobOutcome};
pub use orchestrator::{BatchOrchestrator, RunSummary};
pub use submitter::{JobSubmitter, SubmissionThrottle, SubmittedJob};
pub use worker::{BatchOutcome, BatchStatus, BatchWorker};
