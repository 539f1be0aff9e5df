/*!
 * Mock batch service for testing.
 *
 * This module provides an in-process `BatchService` that simulates the
 * lifecycle of remote batch jobs:
 * - `MockBatchService::working()` - every job completes with scores
 * - `MockBatchService::failing()` - every job ends in `failed`
 * - `MockBatchService::fail_first(n)` - the first n jobs fail
 * - `MockBatchService::fail_above(n)` - jobs with more than n requests fail
 * - `MockBatchService::flaky_polls(n)` - every nth status check errors
 */

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::app_config::default_categories;
use crate::batch::builder::RequestId;
use crate::errors::ProviderError;
use crate::providers::{BatchService, RemoteFile, RemoteJob, RequestCounts};

/// Behavior mode for the mock service
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Every job completes
    Working,
    /// Every job fails
    Failing,
    /// The first `jobs` created jobs fail, later ones complete
    FailFirst { jobs: usize },
    /// Jobs with more than `max_requests` requests fail
    FailAbove { max_requests: usize },
    /// Every `fail_every`-th status check returns a connection error
    FlakyPolls { fail_every: usize },
    /// Job creation always errors
    SubmissionFailing,
    /// Jobs end in the given status (e.g. "expired")
    EndsWith(String),
    /// Completed output contains a malformed line per job
    MalformedOutput,
    /// Status checks are rejected with an authentication error
    RevokedKey,
}

/// Score generator: request position and categories to scores
pub type ScoreFn = fn(usize, &[String]) -> BTreeMap<String, f64>;

#[derive(Debug)]
struct MockJob {
    remote: RemoteJob,
    request_ids: Vec<String>,
    fails: bool,
    polls: usize,
}

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<String, String>,
    jobs: Vec<MockJob>,
    retrieve_calls: usize,
    next_file: usize,
}

/// Mock batch service for testing pipeline behavior
#[derive(Debug, Clone)]
pub struct MockBatchService {
    /// Behavior mode
    behavior: MockBehavior,
    /// Status checks a job needs before it reaches a terminal state
    polls_before_terminal: usize,
    /// Categories the generated scores cover
    categories: Vec<String>,
    /// Custom score generator (optional)
    score_fn: Option<ScoreFn>,
    state: Arc<Mutex<MockState>>,
}

impl MockBatchService {
    /// Create a new mock service with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            polls_before_terminal: 2,
            categories: default_categories(),
            score_fn: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn fail_first(jobs: usize) -> Self {
        Self::new(MockBehavior::FailFirst { jobs })
    }

    pub fn fail_above(max_requests: usize) -> Self {
        Self::new(MockBehavior::FailAbove { max_requests })
    }

    pub fn flaky_polls(fail_every: usize) -> Self {
        Self::new(MockBehavior::FlakyPolls { fail_every })
    }

    /// Number of status checks before a job turns terminal
    pub fn with_polls_before_terminal(mut self, polls: usize) -> Self {
        self.polls_before_terminal = polls.max(1);
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Set a custom score generator
    pub fn with_score_fn(mut self, score_fn: ScoreFn) -> Self {
        self.score_fn = Some(score_fn);
        self
    }

    /// Default scores: the category at `position % n` scores 90, the others less
    pub fn default_scores(position: usize, categories: &[String]) -> BTreeMap<String, f64> {
        let favored = position % categories.len().max(1);
        categories
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let score = if i == favored { 90.0 } else { 10.0 + i as f64 };
                (c.clone(), score)
            })
            .collect()
    }

    /// Request ids of every created job, in creation order
    pub fn submitted_jobs(&self) -> Vec<Vec<String>> {
        self.state.lock().jobs.iter().map(|j| j.request_ids.clone()).collect()
    }

    /// Number of jobs created so far
    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Number of status checks served so far
    pub fn retrieve_calls(&self) -> usize {
        self.state.lock().retrieve_calls
    }

    fn job_fails(&self, index: usize, request_count: usize) -> bool {
        match &self.behavior {
            MockBehavior::Failing => true,
            MockBehavior::FailFirst { jobs } => index < *jobs,
            MockBehavior::FailAbove { max_requests } => request_count > *max_requests,
            _ => false,
        }
    }

    fn terminal_status(&self, fails: bool) -> String {
        match &self.behavior {
            MockBehavior::EndsWith(status) => status.clone(),
            _ if fails => "failed".to_string(),
            _ => "completed".to_string(),
        }
    }

    /// Render the JSONL output of a completed job
    fn render_output(&self, request_ids: &[String]) -> String {
        let mut lines = Vec::with_capacity(request_ids.len() + 1);
        for (i, custom_id) in request_ids.iter().enumerate() {
            let position = RequestId::decode(custom_id).map(|id| id.position()).unwrap_or(i);
            let scores = match self.score_fn {
                Some(generator) => generator(position, &self.categories),
                None => Self::default_scores(position, &self.categories),
            };
            let content = serde_json::to_string(&scores).unwrap_or_else(|_| "{}".to_string());
            let line = json!({
                "id": format!("batch_req_{}", i),
                "custom_id": custom_id,
                "response": {
                    "status_code": 200,
                    "body": {
                        "choices": [
                            {"index": 0, "message": {"role": "assistant", "content": content}}
                        ]
                    }
                },
                "error": null
            });
            lines.push(line.to_string());
        }

        if self.behavior == MockBehavior::MalformedOutput {
            lines.insert(0, "{not json".to_string());
        }

        lines.join("\n")
    }
}

#[async_trait]
impl BatchService for MockBatchService {
    async fn upload_manifest(&self, file_name: &str, content: Bytes) -> Result<RemoteFile, ProviderError> {
        let mut state = self.state.lock();
        state.next_file += 1;
        let id = format!("file-{}", state.next_file);
        state
            .files
            .insert(id.clone(), String::from_utf8_lossy(&content).into_owned());
        Ok(RemoteFile {
            id,
            filename: Some(file_name.to_string()),
            bytes: Some(content.len() as u64),
        })
    }

    async fn create_job(
        &self,
        input_file_id: &str,
        _endpoint: &str,
        _completion_window: &str,
    ) -> Result<RemoteJob, ProviderError> {
        if self.behavior == MockBehavior::SubmissionFailing {
            return Err(ProviderError::ApiError {
                status_code: 400,
                message: "Simulated submission failure".to_string(),
            });
        }

        let mut state = self.state.lock();
        let manifest = state
            .files
            .get(input_file_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(input_file_id.to_string()))?;

        let request_ids: Vec<String> = manifest
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|v| v.get("custom_id").and_then(|c| c.as_str()).map(String::from))
            .collect();

        let index = state.jobs.len();
        let fails = self.job_fails(index, request_ids.len());
        let remote = RemoteJob {
            id: format!("batch_{}", index + 1),
            status: "validating".to_string(),
            input_file_id: Some(input_file_id.to_string()),
            created_at: Some(1_700_000_000 + index as i64),
            request_counts: Some(RequestCounts {
                total: request_ids.len() as u64,
                ..Default::default()
            }),
            ..Default::default()
        };

        state.jobs.push(MockJob {
            remote: remote.clone(),
            request_ids,
            fails,
            polls: 0,
        });
        Ok(remote)
    }

    async fn retrieve_job(&self, job_id: &str) -> Result<RemoteJob, ProviderError> {
        let mut state = self.state.lock();
        state.retrieve_calls += 1;

        if let MockBehavior::FlakyPolls { fail_every } = self.behavior {
            if fail_every > 0 && state.retrieve_calls % fail_every == 0 {
                return Err(ProviderError::ConnectionError(format!(
                    "Simulated network blip (check #{})",
                    state.retrieve_calls
                )));
            }
        }

        if self.behavior == MockBehavior::RevokedKey {
            return Err(ProviderError::AuthenticationError("Incorrect API key provided".to_string()));
        }

        let next_file = state.next_file + 1;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.remote.id == job_id)
            .ok_or_else(|| ProviderError::NotFound(job_id.to_string()))?;

        if !job.remote.job_status().is_active() {
            return Ok(job.remote.clone());
        }

        job.polls += 1;
        if job.polls < self.polls_before_terminal {
            let progress = ["validating", "in_progress", "finalizing"];
            job.remote.status = progress[job.polls.min(progress.len() - 1)].to_string();
            return Ok(job.remote.clone());
        }

        job.remote.status = self.terminal_status(job.fails);
        let mut output = None;
        if job.remote.status == "completed" {
            let total = job.request_ids.len() as u64;
            job.remote.request_counts = Some(RequestCounts {
                total,
                completed: total,
                failed: 0,
            });
            job.remote.output_file_id = Some(format!("file-{}", next_file));
            output = Some(self.render_output(&job.request_ids));
        } else if job.remote.status == "failed" {
            job.remote.errors = Some(json!({
                "data": [{"code": "simulated_failure", "message": "Simulated job failure"}]
            }));
        }

        let remote = job.remote.clone();
        if let Some(content) = output {
            state.next_file = next_file;
            state.files.insert(format!("file-{}", next_file), content);
        }
        Ok(remote)
    }

    async fn download_file(&self, file_id: &str) -> Result<String, ProviderError> {
        self.state
            .lock()
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(file_id.to_string()))
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<RemoteJob>, ProviderError> {
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .rev()
            .take(limit)
            .map(|j| j.remote.clone())
            .collect())
    }

    async fn cancel_job(&self, job_id: &str) -> Result<RemoteJob, ProviderError> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.remote.id == job_id)
            .ok_or_else(|| ProviderError::NotFound(job_id.to_string()))?;
        job.remote.status = "cancelling".to_string();
        Ok(job.remote.clone())
    }
}
