/*!
 * Integration tests for checkpoints and resuming interrupted runs.
 */

use std::collections::HashSet;
use std::sync::Arc;

use outcome_classifier::app_config::{RecordConfig, TaxonomyConfig};
use outcome_classifier::app_controller::Controller;
use outcome_classifier::checkpoint::load_checkpoint;
use outcome_classifier::providers::mock::MockBatchService;

use crate::common;

#[tokio::test]
async fn test_rerun_afterPartialRun_shouldOnlySubmitRemainingRecords() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "outcomes.csv", &common::outcomes_csv(8)).unwrap();
    let output = dir.path().join("classified.csv");

    let mut config = common::test_config(dir.path());
    config.batch.batch_size = 8;
    config.batch.max_retries = 3;

    // First run only gets positions 0 and 1 through
    let limited = MockBatchService::fail_above(2);
    let first = Controller::with_config(config.clone())
        .unwrap()
        .run_with_service(Arc::new(limited), &input, &output, None)
        .await
        .unwrap();
    assert_eq!(first.classified, 2);

    let checkpoint = Controller::default_checkpoint_path(&output);
    assert!(checkpoint.exists());

    let working = MockBatchService::working();
    let second = Controller::with_config(config)
        .unwrap()
        .run_with_service(Arc::new(working.clone()), &input, &output, None)
        .await
        .unwrap();

    assert_eq!(second.previously_classified, 2);
    assert_eq!(second.classified, 8);

    let resubmitted: HashSet<String> = working.submitted_jobs().into_iter().flatten().collect();
    assert_eq!(resubmitted.len(), 6);
    assert!(!resubmitted.contains("outcome-0"));
    assert!(!resubmitted.contains("outcome-1"));

    let best = common::column(&output, "best_aim").unwrap();
    assert!(best.iter().all(|v| !v.is_empty()));

    // Two resumed runs end where one uninterrupted run does
    let single = dir.path().join("single.csv");
    Controller::with_config(common::test_config(dir.path()))
        .unwrap()
        .run_with_service(Arc::new(MockBatchService::working()), &input, &single, None)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        std::fs::read_to_string(&single).unwrap()
    );
}

#[tokio::test]
async fn test_rerun_afterCompleteRun_shouldSubmitNothing() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "outcomes.csv", &common::outcomes_csv(5)).unwrap();
    let output = dir.path().join("classified.csv");
    let config = common::test_config(dir.path());

    Controller::with_config(config.clone())
        .unwrap()
        .run_with_service(Arc::new(MockBatchService::working()), &input, &output, None)
        .await
        .unwrap();
    let before = std::fs::read_to_string(&output).unwrap();

    let service = MockBatchService::working();
    let summary = Controller::with_config(config)
        .unwrap()
        .run_with_service(Arc::new(service.clone()), &input, &output, None)
        .await
        .unwrap();

    assert_eq!(service.job_count(), 0);
    assert_eq!(summary.classified, 5);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), before);
}

#[tokio::test]
async fn test_checkpoint_shouldMatchClassifiedIdentities() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "outcomes.csv", &common::outcomes_csv(6)).unwrap();
    let output = dir.path().join("classified.csv");
    let checkpoint = dir.path().join("progress.csv");

    let mut config = common::test_config(dir.path());
    config.batch.batch_size = 2;
    Controller::with_config(config)
        .unwrap()
        .run_with_service(Arc::new(MockBatchService::working()), &input, &output, Some(&checkpoint))
        .await
        .unwrap();

    let ledger = load_checkpoint(&checkpoint, &RecordConfig::default(), &TaxonomyConfig::default()).unwrap();
    assert_eq!(ledger.classified_count(), 6);
    assert!(!Controller::default_checkpoint_path(&output).exists());
}

#[tokio::test]
async fn test_rerun_withCorruptCheckpoint_shouldStartFresh() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "outcomes.csv", &common::outcomes_csv(3)).unwrap();
    let output = dir.path().join("classified.csv");
    let checkpoint = Controller::default_checkpoint_path(&output);
    std::fs::write(&checkpoint, [0xff, 0xfe, 0x00, b'\n', 0xc3]).unwrap();

    let service = MockBatchService::working();
    let summary = Controller::with_config(common::test_config(dir.path()))
        .unwrap()
        .run_with_service(Arc::new(service.clone()), &input, &output, None)
        .await
        .unwrap();

    assert_eq!(summary.previously_classified, 0);
    assert_eq!(summary.classified, 3);
}
