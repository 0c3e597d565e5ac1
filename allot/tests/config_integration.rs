//! Integration tests for layered configuration feeding the runtime settings.

mod common;

use std::fs;
use std::time::Duration;

use allot::config::{ConfigBuilder, LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE};
use allot::{Database, Error};
use serial_test::serial;
use tempfile::TempDir;

const ENV_VARS: [&str; 3] = ["ALLOT_MAX_ATTEMPT_COUNT", "ALLOT_DATABASE_PATH", "ALLOT_PERIOD_MS"];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_project_files_drive_settings() {
    clear_env();
    let data_dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let nested = project.path().join("deploy").join("site");
    fs::create_dir_all(&nested).unwrap();

    let db_path = project.path().join("state.db");
    fs::write(
        project.path().join(PROJECT_CONFIG_FILE),
        format!(
            "executor:\n  period_ms: 2000\n  next_attempt_secs: 15\nscheduler:\n  max_slot_days: 2\ndatabase:\n  path: {}\n",
            db_path.display()
        ),
    )
    .unwrap();
    fs::write(
        project.path().join(LOCAL_CONFIG_FILE),
        "executor:\n  period_ms: 500\n",
    )
    .unwrap();

    let config = ConfigBuilder::new()
        .with_working_dir(&nested)
        .with_data_dir(data_dir.path())
        .build()
        .unwrap();

    let executor = config.executor_settings();
    assert_eq!(executor.period, Duration::from_millis(500));
    assert_eq!(executor.next_attempt, chrono::Duration::seconds(15));
    assert_eq!(executor.max_attempt_count, 5);
    assert_eq!(config.scheduler_settings().max_slot, Some(chrono::Duration::days(2)));

    let db = Database::open(config.database_config().unwrap()).unwrap();
    assert_eq!(db.config().path, db_path);
    assert!(db_path.exists());
}

#[test]
#[serial]
fn test_environment_overrides_files() {
    clear_env();
    let data_dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join(PROJECT_CONFIG_FILE),
        "executor:\n  max_attempt_count: 3\n",
    )
    .unwrap();
    std::env::set_var("ALLOT_MAX_ATTEMPT_COUNT", "8");

    let result = ConfigBuilder::new()
        .with_working_dir(project.path())
        .with_data_dir(data_dir.path())
        .build();
    clear_env();

    assert_eq!(result.unwrap().executor_settings().max_attempt_count, 8);
}

#[test]
#[serial]
fn test_invalid_file_is_reported() {
    clear_env();
    let data_dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join(PROJECT_CONFIG_FILE),
        "executor:\n  period_ms: 0\n",
    )
    .unwrap();

    let result = ConfigBuilder::new()
        .with_working_dir(project.path())
        .with_data_dir(data_dir.path())
        .build();
    assert!(matches!(result, Err(Error::Validation { field, .. }) if field == "executor.period_ms"));

    fs::write(project.path().join(PROJECT_CONFIG_FILE), "ports: [1]\n").unwrap();
    let result = ConfigBuilder::new()
        .with_working_dir(project.path())
        .with_data_dir(data_dir.path())
        .build();
    assert!(result.is_err());
}
