/*!
 * Tests for configuration loading and validation
 */

use outcome_classifier::app_config::{Config, LogLevel};

use crate::common;

#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let config = Config::load_or_create(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config.batch.batch_size, 1000);
    assert_eq!(config.taxonomy.selected_column, "best_aim");

    let reloaded = Config::load_or_create(&path).unwrap();
    assert_eq!(reloaded.provider.model, config.provider.model);
}

#[test]
fn test_loadOrCreate_withPartialFile_shouldFillDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "conf.json",
        r#"{"batch": {"max_retries": 7}, "log_level": "debug"}"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();
    assert_eq!(config.batch.max_retries, 7);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.records.key_columns.len(), 2);
}

#[test]
fn test_loadOrCreate_withInvalidJson_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "conf.json", "{ not json").unwrap();
    assert!(Config::load_or_create(&path).is_err());
}

#[test]
fn test_validate_withZeroConcurrency_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::test_config(dir.path());
    assert!(config.validate().is_ok());

    config.batch.max_concurrent_jobs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withSingleKeyColumn_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::test_config(dir.path());
    config.records.key_columns.pop();
    assert!(config.validate().is_err());
}

#[test]
fn test_enableDebug_withInfoLevel_shouldRaiseToDebug() {
    let mut config = Config::default();
    config.enable_debug();

    assert!(config.debug);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.log_level.to_level_filter(), log::LevelFilter::Debug);
}

#[test]
fn test_enableDebug_withTraceLevel_shouldKeepTrace() {
    let mut config = Config::default();
    config.log_level = LogLevel::Trace;
    config.enable_debug();

    assert!(config.debug);
    assert_eq!(config.log_level, LogLevel::Trace);
}
