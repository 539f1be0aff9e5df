/*!
 * Tests for the batch service abstraction and the mock service
 */

use bytes::Bytes;
use outcome_classifier::errors::ProviderError;
use outcome_classifier::providers::mock::MockBatchService;
use outcome_classifier::providers::{BatchService, JobStatus};

#[tokio::test]
async fn test_mockService_listJobs_shouldReturnNewestFirst() {
    let service = MockBatchService::working();
    let file = service
        .upload_manifest("m.jsonl", Bytes::from(r#"{"custom_id":"outcome-0"}"#))
        .await
        .unwrap();
    let first = service.create_job(&file.id, "", "").await.unwrap();
    let second = service.create_job(&file.id, "", "").await.unwrap();

    let jobs = service.list_jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, second.id);
    assert_eq!(jobs[1].id, first.id);
    assert_eq!(service.list_jobs(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mockService_cancelJob_shouldLeaveActiveStates() {
    let service = MockBatchService::working().with_polls_before_terminal(10);
    let file = service
        .upload_manifest("m.jsonl", Bytes::from(r#"{"custom_id":"outcome-0"}"#))
        .await
        .unwrap();
    let job = service.create_job(&file.id, "", "").await.unwrap();

    let cancelled = service.cancel_job(&job.id).await.unwrap();
    assert!(!cancelled.job_status().is_active());
    assert_eq!(cancelled.job_status(), JobStatus::Other("cancelling".to_string()));
}

#[tokio::test]
async fn test_mockService_unknownJob_shouldBeNotFound() {
    let service = MockBatchService::working();
    let result = service.retrieve_job("batch_missing").await;
    assert!(matches!(result, Err(ProviderError::NotFound(_))));
}

#[test]
fn test_providerError_isTransient_shouldSeparateServerFaults() {
    assert!(ProviderError::ConnectionError("reset".into()).is_transient());
    assert!(ProviderError::ApiError { status_code: 502, message: String::new() }.is_transient());
    assert!(!ProviderError::ApiError { status_code: 400, message: String::new() }.is_transient());
    assert!(!ProviderError::AuthenticationError("bad key".into()).is_transient());
}
