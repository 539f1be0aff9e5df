/*!
 * Error types for the outcome-classifier application.
 *
 * This module contains custom error types for the different layers of the
 * batch pipeline, using the thiserror crate for ergonomic error definitions.
 * Only configuration and input-store errors are fatal for a run; every
 * `BatchError` is contained to the batch that raised it.
 */

use thiserror::Error;

/// Errors that can occur when talking to the batch service API
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The service does not know the requested job or file
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Whether retrying the same call later could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionError(_) | Self::RateLimitExceeded(_) | Self::RequestFailed(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::ParseError(_) | Self::AuthenticationError(_) | Self::NotFound(_) => false,
        }
    }
}

/// Errors raised inside the pipeline of a single batch
#[derive(Error, Debug)]
pub enum BatchError {
    /// The range produced no submittable requests
    #[error("Batch {0} has no valid requests")]
    EmptyBatch(usize),

    /// Writing the manifest or another staging artifact failed
    #[error("Failed to stage batch artifact: {0}")]
    Staging(String),

    /// Uploading the manifest or creating the job failed
    #[error("Submission failed: {0}")]
    Submission(#[source] ProviderError),

    /// Polling the job status failed
    #[error("Monitoring failed: {0}")]
    Monitoring(#[source] ProviderError),

    /// The service reported the job as failed
    #[error("Job {job_id} failed: {message}")]
    JobFailed {
        /// Remote job identifier
        job_id: String,
        /// Error summary reported by the service
        message: String,
    },

    /// The job ended in a status the monitor does not recognise
    #[error("Job {job_id} ended with unexpected status '{status}'")]
    UnexpectedStatus {
        /// Remote job identifier
        job_id: String,
        /// Raw status string
        status: String,
    },

    /// Downloading the job output failed
    #[error("Failed to download job output: {0}")]
    Download(#[source] ProviderError),
}

/// Errors that can occur while loading the record store
#[derive(Error, Debug)]
pub enum RecordError {
    /// The input file could not be opened or read
    #[error("Input store is unreadable: {0}")]
    Unreadable(String),

    /// None of the configured text columns exist in the input
    #[error("Input is missing required columns: {0}")]
    MissingColumns(String),

    /// A row could not be decoded
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the batch service
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from the record store
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Error from a batch pipeline
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
