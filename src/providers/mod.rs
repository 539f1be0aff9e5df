/*!
 * Provider implementations for the external batch classification service.
 *
 * This module contains the service abstraction and its implementations:
 * - OpenAI: OpenAI-compatible Batch API over HTTP
 * - Mock: deterministic in-process service for tests and benchmarks
 */

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::errors::ProviderError;

pub mod mock;
pub mod openai;

/// Lifecycle status of a remote batch job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    /// Any status outside the known lifecycle (cancelled, expired, ...)
    Other(String),
}

impl JobStatus {
    /// Parse the raw status string reported by the service
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "queued" => Self::Queued,
            "validating" => Self::Validating,
            "in_progress" => Self::InProgress,
            "finalizing" => Self::Finalizing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Still moving through the lifecycle
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Validating | Self::InProgress | Self::Finalizing
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Validating => "validating",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request counters reported with a job
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// The service's view of a submitted batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteJob {
    /// Job identifier
    pub id: String,
    /// Raw lifecycle status
    #[serde(default)]
    pub status: String,
    /// Uploaded manifest file
    #[serde(default)]
    pub input_file_id: Option<String>,
    /// Results file, present once the job completed
    #[serde(default)]
    pub output_file_id: Option<String>,
    /// Per-request error file, if any request failed
    #[serde(default)]
    pub error_file_id: Option<String>,
    /// Job-level errors as reported by the service
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

impl RemoteJob {
    pub fn job_status(&self) -> JobStatus {
        JobStatus::parse(&self.status)
    }

    /// Human-readable summary of job-level errors
    pub fn error_summary(&self) -> String {
        let messages: Vec<String> = self
            .errors
            .as_ref()
            .and_then(|e| e.get("data"))
            .and_then(|d| d.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let code = item.get("code").and_then(|c| c.as_str()).unwrap_or("");
                        let message = item.get("message").and_then(|m| m.as_str())?;
                        Some(if code.is_empty() {
                            message.to_string()
                        } else {
                            format!("{}: {}", code, message)
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if messages.is_empty() {
            "no error details reported".to_string()
        } else {
            messages.join("; ")
        }
    }
}

/// Uploaded file handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// Common trait for batch services
///
/// This trait defines the operations the orchestrator needs from the
/// external service, allowing real and simulated services to be used
/// interchangeably.
#[async_trait]
pub trait BatchService: Send + Sync + Debug {
    /// Upload a JSONL manifest for batch processing
    async fn upload_manifest(&self, file_name: &str, content: Bytes) -> Result<RemoteFile, ProviderError>;

    /// Create a batch job over an uploaded manifest
    ///
    /// # Arguments
    /// * `input_file_id` - The uploaded manifest
    /// * `endpoint` - Per-request endpoint the job is bound to
    /// * `completion_window` - Time the service is given to finish the job
    async fn create_job(
        &self,
        input_file_id: &str,
        endpoint: &str,
        completion_window: &str,
    ) -> Result<RemoteJob, ProviderError>;

    /// Fetch the current state of a job
    async fn retrieve_job(&self, job_id: &str) -> Result<RemoteJob, ProviderError>;

    /// Download a file produced by the service as text
    async fn download_file(&self, file_id: &str) -> Result<String, ProviderError>;

    /// List recent jobs, newest first
    async fn list_jobs(&self, limit: usize) -> Result<Vec<RemoteJob>, ProviderError>;

    /// Request cancellation of a job
    async fn cancel_job(&self, job_id: &str) -> Result<RemoteJob, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobStatus_parse_shouldMapKnownStates() {
        assert_eq!(JobStatus::parse("in_progress"), JobStatus::InProgress);
        assert_eq!(JobStatus::parse("COMPLETED"), JobStatus::Completed);
        assert_eq!(JobStatus::parse("expired"), JobStatus::Other("expired".to_string()));
    }

    #[test]
    fn test_jobStatus_isActive_shouldExcludeTerminal() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Finalizing.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Failed.is_active());
        assert!(!JobStatus::Other("cancelled".into()).is_active());
    }

    #[test]
    fn test_remoteJob_deserialize_shouldTolerateMissingFields() {
        let job: RemoteJob = serde_json::from_str(r#"{"id": "batch_1", "status": "failed",
            "errors": {"data": [{"code": "invalid_json", "message": "bad line 3"}]}}"#)
            .unwrap();
        assert_eq!(job.job_status(), JobStatus::Failed);
        assert!(job.output_file_id.is_none());
        assert_eq!(job.error_summary(), "invalid_json: bad line 3");
    }
}
