use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{BatchService, RemoteFile, RemoteJob};

/// OpenAI client for the Files and Batches APIs
pub struct OpenAI {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API base URL, e.g. `https://api.openai.com/v1`
    endpoint: String,
}

impl fmt::Debug for OpenAI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAI")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Batch creation request
#[derive(Debug, Serialize)]
struct CreateBatchRequest<'a> {
    input_file_id: &'a str,
    endpoint: &'a str,
    completion_window: &'a str,
}

/// Paginated list of batches
#[derive(Debug, Deserialize)]
struct BatchList {
    #[serde(default)]
    data: Vec<RemoteJob>,
}

impl OpenAI {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        let base = if self.endpoint.is_empty() {
            "https://api.openai.com/v1"
        } else {
            self.endpoint.trim_end_matches('/')
        };
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    fn connection_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() || e.is_connect() {
            ProviderError::ConnectionError(e.to_string())
        } else {
            ProviderError::RequestFailed(e.to_string())
        }
    }

    /// Map non-success responses onto provider errors
    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to get error response text".to_string());
        error!("OpenAI API error ({}): {}", status, message);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::AuthenticationError(message)
            }
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded(message),
            StatusCode::NOT_FOUND => ProviderError::NotFound(message),
            _ => ProviderError::ApiError {
                status_code: status.as_u16(),
                message,
            },
        })
    }

    async fn parse_job(response: Response) -> Result<RemoteJob, ProviderError> {
        let response = Self::check(response).await?;
        response
            .json::<RemoteJob>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl BatchService for OpenAI {
    async fn upload_manifest(&self, file_name: &str, content: Bytes) -> Result<RemoteFile, ProviderError> {
        debug!("Uploading {} ({} bytes)", file_name, content.len());
        let part = multipart::Part::bytes(content.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let form = multipart::Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(Self::connection_error)?;

        Self::check(response)
            .await?
            .json::<RemoteFile>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }

    async fn create_job(
        &self,
        input_file_id: &str,
        endpoint: &str,
        completion_window: &str,
    ) -> Result<RemoteJob, ProviderError> {
        let request = CreateBatchRequest {
            input_file_id,
            endpoint,
            completion_window,
        };

        let response = self
            .client
            .post(self.url("batches"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Self::connection_error)?;

        Self::parse_job(response).await
    }

    async fn retrieve_job(&self, job_id: &str) -> Result<RemoteJob, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("batches/{}", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::connection_error)?;

        Self::parse_job(response).await
    }

    async fn download_file(&self, file_id: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("files/{}/content", file_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::connection_error)?;

        let body = Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(Self::connection_error)?;

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<RemoteJob>, ProviderError> {
        let response = self
            .client
            .get(self.url("batches"))
            .query(&[("limit", limit.to_string())])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::connection_error)?;

        let list = Self::check(response)
            .await?
            .json::<BatchList>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        Ok(list.data)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<RemoteJob, ProviderError> {
        let response = self
            .client
            .post(self.url(&format!("batches/{}/cancel", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::connection_error)?;

        Self::parse_job(response).await
    }
}
