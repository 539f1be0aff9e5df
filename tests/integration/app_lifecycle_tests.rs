/*!
 * Tests for controller entry points outside the classification run.
 */

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use outcome_classifier::app_controller::{CancelReport, Controller};
use outcome_classifier::providers::mock::MockBatchService;
use outcome_classifier::providers::BatchService;
use outcome_classifier::AppError;

use crate::common;

async fn start_jobs(service: &MockBatchService, count: usize) {
    let file = service
        .upload_manifest("m.jsonl", Bytes::from(r#"{"custom_id":"outcome-0"}"#))
        .await
        .unwrap();
    for _ in 0..count {
        service.create_job(&file.id, "/v1/chat/completions", "24h").await.unwrap();
    }
}

#[tokio::test]
async fn test_cancelActiveJobs_withConfirmation_shouldCancelAll() {
    let dir = common::create_temp_dir().unwrap();
    let controller = Controller::with_config(common::test_config(dir.path())).unwrap();
    let service = MockBatchService::working().with_polls_before_terminal(50);
    start_jobs(&service, 2).await;

    let report = controller
        .cancel_active_jobs(Arc::new(service.clone()), 10, |jobs| jobs.len() == 2)
        .await
        .unwrap();

    assert_eq!(
        report,
        CancelReport {
            found: 2,
            cancelled: 2,
            failed: 0
        }
    );
    let jobs = service.list_jobs(10).await.unwrap();
    assert!(jobs.iter().all(|j| !j.job_status().is_active()));
}

#[tokio::test]
async fn test_cancelActiveJobs_whenDeclined_shouldCancelNothing() {
    let dir = common::create_temp_dir().unwrap();
    let controller = Controller::with_config(common::test_config(dir.path())).unwrap();
    let service = MockBatchService::working().with_polls_before_terminal(50);
    start_jobs(&service, 1).await;

    let report = controller
        .cancel_active_jobs(Arc::new(service.clone()), 10, |_| false)
        .await
        .unwrap();

    assert_eq!(report.found, 1);
    assert_eq!(report.cancelled, 0);
    let jobs = service.list_jobs(10).await.unwrap();
    assert!(jobs[0].job_status().is_active());
}

#[tokio::test]
async fn test_cancelActiveJobs_shouldSkipFinishedJobs() {
    let dir = common::create_temp_dir().unwrap();
    let controller = Controller::with_config(common::test_config(dir.path())).unwrap();
    let service = MockBatchService::working().with_polls_before_terminal(1);
    start_jobs(&service, 1).await;
    service.retrieve_job("batch_1").await.unwrap();

    let report = controller
        .cancel_active_jobs(Arc::new(service), 10, |_| panic!("nothing to confirm"))
        .await
        .unwrap();
    assert_eq!(report, CancelReport::default());
}

#[test]
fn test_defaultCheckpointPath_shouldAppendPartial() {
    assert_eq!(
        Controller::default_checkpoint_path(Path::new("out/classified.csv")),
        PathBuf::from("out/classified.csv.partial")
    );
}

#[test]
fn test_service_shouldNotExposeApiKey() {
    let dir = common::create_temp_dir().unwrap();
    let controller = Controller::with_config(common::test_config(dir.path())).unwrap();
    let service = controller.service();
    assert!(!format!("{:?}", service).contains("sk-test"));
}

#[test]
fn test_withConfig_withoutApiKey_shouldRejectConfiguration() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::test_config(dir.path());
    config.provider.api_key = String::new();

    let error = Controller::with_config(config).err().unwrap();
    assert!(matches!(error.downcast_ref::<AppError>(), Some(AppError::Config(_))));
}
