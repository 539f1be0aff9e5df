/*!
 * Common test utilities for the outcome-classifier test suite
 */

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use outcome_classifier::app_config::Config;

pub const HEADER: &str = "course_name,learning_outcome_id,learning_outcome_title,learning_outcome_details";

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// CSV with `count` valid learning outcomes
pub fn outcomes_csv(count: usize) -> String {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..count {
        csv.push_str(&format!("BIO 100,{},Outcome {},Details for outcome {}\n", i + 1, i + 1, i + 1));
    }
    csv
}

/// Configuration with no waiting anywhere, staging inside `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.provider.api_key = "sk-test".to_string();
    config.batch.poll_interval_secs = 0;
    config.batch.retry_backoff_ms = 0;
    config.batch.submission_spacing_ms = 0;
    config.batch.staging_dir = dir.join("staging");
    config
}

/// Rows of a CSV file, header excluded
pub fn read_rows(path: &Path) -> Result<(csv::StringRecord, Vec<csv::StringRecord>)> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok((headers, rows))
}

/// Value of `column` in every row
pub fn column(path: &Path, column: &str) -> Result<Vec<String>> {
    let (headers, rows) = read_rows(path)?;
    let index = headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| anyhow::anyhow!("missing column {}", column))?;
    Ok(rows.iter().map(|r| r.get(index).unwrap_or("").to_string()).collect())
}

/// Route library logs to the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
