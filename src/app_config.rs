use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prompts;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Batch service connection settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Batch sizing, polling and retry settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Input column mapping
    #[serde(default)]
    pub records: RecordConfig,

    /// Categories and prompts
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write extra staging artifacts (sample requests, failed job dumps)
    #[serde(default)]
    pub debug: bool,
}

/// Batch service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: API key, usually supplied through OPENAI_API_KEY
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    // @field: Model used for every request in a manifest
    #[serde(default = "default_model")]
    pub model: String,

    // @field: Per-request endpoint the batch job is bound to
    #[serde(default = "default_request_endpoint")]
    pub request_endpoint: String,

    // @field: Completion window requested for each job
    #[serde(default = "default_completion_window")]
    pub completion_window: String,

    /// Temperature parameter for classification requests
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    // @field: HTTP timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            request_endpoint: default_request_endpoint(),
            completion_window: default_completion_window(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Batch orchestration settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchConfig {
    /// Maximum number of records per batch job
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum number of batch jobs in flight at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Seconds between job status checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Retry ceiling per batch, shared by job failures and monitoring errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Minimum delay between two job submissions
    #[serde(default = "default_submission_spacing_ms")]
    pub submission_spacing_ms: u64,

    /// Directory for manifests and raw results
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            submission_spacing_ms: default_submission_spacing_ms(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl BatchConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Exponential backoff before retry number `attempt` (1-based), capped
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.retry_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Mapping from input columns to record fields
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordConfig {
    /// The two natural-key columns forming a record identity
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,

    /// Text columns rendered into the prompt (title first, details second)
    #[serde(default = "default_text_columns")]
    pub text_columns: Vec<String>,

    /// String columns trimmed of surrounding whitespace on load
    #[serde(default = "default_clean_columns")]
    pub clean_columns: Vec<String>,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            key_columns: default_key_columns(),
            text_columns: default_text_columns(),
            clean_columns: default_clean_columns(),
        }
    }
}

/// Classification taxonomy and prompt settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaxonomyConfig {
    /// Categories in canonical order; ties in scores resolve to the earliest
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Prefix of the per-category score columns in the checkpoint
    #[serde(default = "default_score_column_prefix")]
    pub score_column_prefix: String,

    /// Name of the selected-category column in the checkpoint
    #[serde(default = "default_selected_column")]
    pub selected_column: String,

    /// System prompt sent with every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// User prompt template; `{outcome}` is replaced with the record text
    #[serde(default = "default_user_prompt")]
    pub user_prompt: String,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            score_column_prefix: default_score_column_prefix(),
            selected_column: default_selected_column(),
            system_prompt: default_system_prompt(),
            user_prompt: default_user_prompt(),
        }
    }
}

impl TaxonomyConfig {
    /// Checkpoint column holding the score for `category`
    pub fn score_column(&self, category: &str) -> String {
        format!("{}{}", self.score_column_prefix, category.replace(' ', "_"))
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    // @returns: Matching log filter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4.1-mini-2025-04-14".to_string()
}

fn default_request_endpoint() -> String {
    "/v1/chat/completions".to_string()
}

fn default_completion_window() -> String {
    "24h".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_submission_spacing_ms() -> u64 {
    1000
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("temp_batches")
}

fn default_key_columns() -> Vec<String> {
    vec!["course_name".to_string(), "learning_outcome_id".to_string()]
}

fn default_text_columns() -> Vec<String> {
    vec![
        "learning_outcome_title".to_string(),
        "learning_outcome_details".to_string(),
    ]
}

fn default_clean_columns() -> Vec<String> {
    [
        "course_name",
        "course_title",
        "department",
        "college",
        "learning_outcome_title",
        "learning_outcome_details",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The four Aims of a BYU Education, in canonical order
pub fn default_categories() -> Vec<String> {
    vec![
        "Spiritually Strengthening".to_string(),
        "Intellectually Enlarging".to_string(),
        "Character Building".to_string(),
        "Lifelong Learning and Service".to_string(),
    ]
}

fn default_score_column_prefix() -> String {
    "confidence_".to_string()
}

fn default_selected_column() -> String {
    "best_aim".to_string()
}

fn default_system_prompt() -> String {
    prompts::AIMS_CLASSIFIER.to_string()
}

fn default_user_prompt() -> String {
    prompts::AIMS_USER_TEMPLATE.to_string()
}

impl Config {
    /// Load a configuration file, writing a default one when it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {:?}", path))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            return Ok(config);
        }

        log::warn!("Config file not found at {:?}, creating default config.", path);
        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {:?}", path))?;
        Ok(config)
    }

    /// Turn on debug artifacts and raise logging to at least `debug`
    pub fn enable_debug(&mut self) {
        self.debug = true;
        if self.log_level.to_level_filter() < log::LevelFilter::Debug {
            self.log_level = LogLevel::Debug;
        }
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.trim().is_empty() {
            return Err(anyhow!(
                "API key is required (set OPENAI_API_KEY or provider.api_key)"
            ));
        }

        url::Url::parse(&self.provider.endpoint)
            .map_err(|e| anyhow!("Invalid provider endpoint '{}': {}", self.provider.endpoint, e))?;

        if self.provider.model.trim().is_empty() {
            return Err(anyhow!("Model name must not be empty"));
        }

        if self.batch.batch_size == 0 {
            return Err(anyhow!("Batch size must be at least 1"));
        }

        if self.batch.max_concurrent_jobs == 0 {
            return Err(anyhow!("Maximum concurrent jobs must be at least 1"));
        }

        if self.records.key_columns.len() != 2 {
            return Err(anyhow!(
                "Exactly two key columns are required, got {}",
                self.records.key_columns.len()
            ));
        }

        if self.records.text_columns.is_empty() || self.records.text_columns.len() > 2 {
            return Err(anyhow!("One or two text columns are required"));
        }

        if self.taxonomy.categories.is_empty() {
            return Err(anyhow!("Taxonomy must contain at least one category"));
        }

        let mut seen = HashSet::new();
        for category in &self.taxonomy.categories {
            if category.trim().is_empty() || !seen.insert(category.trim()) {
                return Err(anyhow!("Invalid or duplicate category: '{}'", category));
            }
        }

        if self.taxonomy.selected_column.trim().is_empty() {
            return Err(anyhow!("Selected category column name must not be empty"));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            provider: ProviderConfig::default(),
            batch: BatchConfig::default(),
            records: RecordConfig::default(),
            taxonomy: TaxonomyConfig::default(),
            log_level: LogLevel::default(),
            debug: false,
        }
    }
}
