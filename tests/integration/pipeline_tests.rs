/*!
 * Integration tests for the batch pipeline against the mock service.
 */

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use outcome_classifier::app_config::{default_categories, Config};
use outcome_classifier::app_controller::Controller;
use outcome_classifier::batch::RunSummary;
use outcome_classifier::providers::mock::{MockBatchService, MockBehavior};

use crate::common;

struct Fixture {
    dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new(csv: &str) -> Self {
        common::init_logging();
        let dir = common::create_temp_dir().unwrap();
        let input = common::create_test_file(dir.path(), "outcomes.csv", csv).unwrap();
        let output = dir.path().join("classified.csv");
        Self { dir, input, output }
    }

    fn config(&self, batch_size: usize, max_concurrent_jobs: usize, max_retries: u32) -> Config {
        let mut config = common::test_config(self.dir.path());
        config.batch.batch_size = batch_size;
        config.batch.max_concurrent_jobs = max_concurrent_jobs;
        config.batch.max_retries = max_retries;
        config
    }

    async fn run(&self, config: Config, service: &MockBatchService) -> RunSummary {
        let controller = Controller::with_config(config).unwrap();
        controller
            .run_with_service(Arc::new(service.clone()), &self.input, &self.output, None)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_run_withWorkingService_shouldClassifyEveryRecord() {
    let fixture = Fixture::new(&common::outcomes_csv(10));
    let service = MockBatchService::working();

    let summary = fixture.run(fixture.config(3, 2, 3), &service).await;

    assert_eq!(summary.batches, 4);
    assert_eq!(summary.completed_batches, 4);
    assert_eq!(summary.classified, 10);
    assert_eq!(summary.abandoned_records, 0);
    assert_eq!(service.job_count(), 4);

    let categories = default_categories();
    let best = common::column(&fixture.output, "best_aim").unwrap();
    assert_eq!(best.len(), 10);
    for (position, value) in best.iter().enumerate() {
        assert_eq!(value, &categories[position % categories.len()]);
    }
}

#[tokio::test]
async fn test_run_withFailingService_shouldStopAfterMaxRetriesWithShrinkingJobs() {
    let fixture = Fixture::new(&common::outcomes_csv(8));
    let service = MockBatchService::failing();

    let summary = fixture.run(fixture.config(8, 1, 3), &service).await;

    let sizes: Vec<usize> = service.submitted_jobs().iter().map(|ids| ids.len()).collect();
    assert_eq!(sizes, vec![8, 8, 4, 2]);
    assert_eq!(summary.jobs_submitted, 4);
    assert_eq!(summary.abandoned_batches, 1);
    assert_eq!(summary.abandoned_records, 8);
    assert_eq!(summary.classified, 0);

    // Output is still written, with empty classification columns
    let best = common::column(&fixture.output, "best_aim").unwrap();
    assert_eq!(best.len(), 8);
    assert!(best.iter().all(|v| v.is_empty()));
}

#[tokio::test]
async fn test_run_withSizeLimitedService_shouldSucceedOnShrunkRange() {
    let fixture = Fixture::new(&common::outcomes_csv(8));
    let service = MockBatchService::fail_above(2);

    let summary = fixture.run(fixture.config(8, 1, 3), &service).await;

    assert_eq!(summary.completed_batches, 1);
    assert_eq!(summary.classified, 2);
    assert_eq!(summary.abandoned_records, 6);

    let last = service.submitted_jobs().last().cloned().unwrap();
    assert_eq!(last, vec!["outcome-0".to_string(), "outcome-1".to_string()]);

    let best = common::column(&fixture.output, "best_aim").unwrap();
    assert!(!best[0].is_empty() && !best[1].is_empty());
    assert!(best[2..].iter().all(|v| v.is_empty()));
}

#[tokio::test]
async fn test_run_withFlakyPolls_shouldRepollWithoutResubmitting() {
    let fixture = Fixture::new(&common::outcomes_csv(4));
    let service = MockBatchService::flaky_polls(3).with_polls_before_terminal(3);

    let summary = fixture.run(fixture.config(4, 1, 3), &service).await;

    assert_eq!(service.job_count(), 1);
    assert_eq!(summary.completed_batches, 1);
    assert_eq!(summary.classified, 4);
}

#[tokio::test]
async fn test_run_withFlakyPollsAndNoRetries_shouldAbandon() {
    let fixture = Fixture::new(&common::outcomes_csv(4));
    let service = MockBatchService::flaky_polls(1);

    let summary = fixture.run(fixture.config(4, 1, 0), &service).await;

    assert_eq!(summary.abandoned_batches, 1);
    assert_eq!(summary.classified, 0);
}

#[tokio::test]
async fn test_run_withSubmissionFailure_shouldAbandonWithoutRetry() {
    let fixture = Fixture::new(&common::outcomes_csv(6));
    let service = MockBatchService::new(MockBehavior::SubmissionFailing);

    let summary = fixture.run(fixture.config(3, 1, 3), &service).await;

    assert_eq!(service.job_count(), 0);
    assert_eq!(summary.abandoned_batches, 2);
    assert_eq!(summary.jobs_submitted, 0);
    assert_eq!(summary.abandoned_records, 6);
}

#[tokio::test]
async fn test_run_withUnexpectedTerminalStatus_shouldNotRetry() {
    let fixture = Fixture::new(&common::outcomes_csv(4));
    let service = MockBatchService::new(MockBehavior::EndsWith("expired".to_string()));

    let summary = fixture.run(fixture.config(4, 1, 3), &service).await;

    assert_eq!(service.job_count(), 1);
    assert_eq!(summary.abandoned_batches, 1);
    assert_eq!(summary.classified, 0);
}

#[tokio::test]
async fn test_run_withMalformedLines_shouldSkipThemAndMergeTheRest() {
    let fixture = Fixture::new(&common::outcomes_csv(6));
    let service = MockBatchService::new(MockBehavior::MalformedOutput);

    let summary = fixture.run(fixture.config(3, 1, 3), &service).await;

    assert_eq!(summary.malformed, 2);
    assert_eq!(summary.classified, 6);
    assert_eq!(summary.unmatched, 0);
}

#[tokio::test]
async fn test_run_withEmptyRecord_shouldLeaveItUnclassified() {
    let csv = format!("{}\nBIO 100,A,Cells,\nBIO 100,B,,\nBIO 100,C,,Mitosis\n", common::HEADER);
    let fixture = Fixture::new(&csv);
    let service = MockBatchService::working();

    let summary = fixture.run(fixture.config(10, 1, 3), &service).await;

    assert_eq!(summary.invalid_records, 1);
    assert_eq!(summary.classified, 2);
    assert_eq!(
        service.submitted_jobs(),
        vec![vec!["outcome-0".to_string(), "outcome-2".to_string()]]
    );

    let best = common::column(&fixture.output, "best_aim").unwrap();
    assert!(!best[0].is_empty());
    assert!(best[1].is_empty());
    assert!(!best[2].is_empty());
}

#[tokio::test]
async fn test_run_withOnlyEmptyRecords_shouldSubmitNothing() {
    let csv = format!("{}\nBIO 100,A,,\nBIO 100,B, ,\n", common::HEADER);
    let fixture = Fixture::new(&csv);
    let service = MockBatchService::working();

    let summary = fixture.run(fixture.config(10, 1, 3), &service).await;

    assert_eq!(service.job_count(), 0);
    assert_eq!(summary.empty_batches, 1);
    assert!(fixture.output.exists());
}

#[tokio::test]
async fn test_run_withConcurrentWorkers_shouldSubmitEachRecordOnce() {
    let fixture = Fixture::new(&common::outcomes_csv(20));
    let service = MockBatchService::working().with_polls_before_terminal(3);

    let summary = fixture.run(fixture.config(2, 4, 3), &service).await;

    assert_eq!(summary.classified, 20);
    assert_eq!(service.job_count(), 10);

    let mut seen = HashSet::new();
    for ids in service.submitted_jobs() {
        for id in ids {
            assert!(seen.insert(id), "request submitted twice");
        }
    }
    assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn test_run_whenInterrupted_shouldNotStartBatches() {
    let fixture = Fixture::new(&common::outcomes_csv(6));
    let service = MockBatchService::working();
    let controller = Controller::with_config(fixture.config(2, 1, 3)).unwrap();
    controller.cancellation_flag().store(true, Ordering::SeqCst);

    let summary = controller
        .run_with_service(Arc::new(service.clone()), &fixture.input, &fixture.output, None)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.cancelled_batches, 3);
    assert_eq!(service.job_count(), 0);
}

/// Set the cancellation flag of `controller` after `delay`
fn interrupt_after(controller: &Controller, delay: Duration) {
    let flag = controller.cancellation_flag();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        flag.store(true, Ordering::SeqCst);
    });
}

#[tokio::test]
async fn test_run_whenInterruptedDuringPolling_shouldFinishCurrentJobOnly() {
    let fixture = Fixture::new(&common::outcomes_csv(6));
    let service = MockBatchService::working().with_polls_before_terminal(1);
    let mut config = fixture.config(2, 1, 3);
    config.batch.poll_interval_secs = 1;
    let controller = Controller::with_config(config).unwrap();

    interrupt_after(&controller, Duration::from_millis(300));
    let summary = controller
        .run_with_service(Arc::new(service.clone()), &fixture.input, &fixture.output, None)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(service.job_count(), 1);
    assert_eq!(summary.completed_batches, 1);
    assert_eq!(summary.cancelled_batches, 2);
    assert_eq!(summary.classified, 2);

    let best = common::column(&fixture.output, "best_aim").unwrap();
    assert!(!best[0].is_empty() && !best[1].is_empty());
    assert!(best[2..].iter().all(|v| v.is_empty()));
}

#[tokio::test]
async fn test_run_whenJobFailsAfterInterrupt_shouldNotResubmit() {
    let fixture = Fixture::new(&common::outcomes_csv(4));
    let service = MockBatchService::failing().with_polls_before_terminal(1);
    let mut config = fixture.config(4, 1, 3);
    config.batch.poll_interval_secs = 1;
    let controller = Controller::with_config(config).unwrap();

    interrupt_after(&controller, Duration::from_millis(300));
    let summary = controller
        .run_with_service(Arc::new(service.clone()), &fixture.input, &fixture.output, None)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(service.job_count(), 1);
    assert_eq!(summary.jobs_submitted, 1);
    assert_eq!(summary.cancelled_batches, 1);
    assert_eq!(summary.classified, 0);
}

#[tokio::test]
async fn test_run_withRevokedKey_shouldAbandonWithoutRetrying() {
    let fixture = Fixture::new(&common::outcomes_csv(4));
    let service = MockBatchService::new(MockBehavior::RevokedKey);

    let summary = fixture.run(fixture.config(4, 1, 3), &service).await;

    assert_eq!(service.job_count(), 1);
    assert_eq!(service.retrieve_calls(), 1);
    assert_eq!(summary.abandoned_batches, 1);
    assert_eq!(summary.abandoned_records, 4);
}

#[tokio::test]
async fn test_run_withMissingInput_shouldFail() {
    let fixture = Fixture::new(&common::outcomes_csv(1));
    let controller = Controller::with_config(fixture.config(2, 1, 3)).unwrap();

    let result = controller
        .run_with_service(
            Arc::new(MockBatchService::working()),
            &fixture.dir.path().join("missing.csv"),
            &fixture.output,
            None,
        )
        .await;
    assert!(result.is_err());
}
