//! Configuration schema definitions.
//!
//! Every section and every field is optional so that partial files can be
//! layered on top of each other. Defaults are applied when the merged
//! configuration is converted into runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::database::DatabaseConfig;
use crate::executor::ExecutorSettings;
use crate::scheduler::SchedulerSettings;

/// Complete configuration structure.
///
/// # Examples
///
/// ```
/// use allot::config::{Config, ExecutorConfig};
///
/// let config = Config {
///     executor: Some(ExecutorConfig {
///         max_attempt_count: Some(3),
///         ..Default::default()
///     }),
///     ..Default::default()
/// };
/// assert_eq!(config.executor_settings().max_attempt_count, 3);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Scheduler settings.
    pub scheduler: Option<SchedulerConfig>,

    /// Executor settings.
    pub executor: Option<ExecutorConfig>,

    /// Database settings.
    pub database: Option<DatabaseSection>,
}

/// Scheduler section.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// When false, no room or permanent-room executables are created.
    pub allow_executables: Option<bool>,

    /// Longest accepted request slot, in days.
    pub max_slot_days: Option<u32>,
}

/// Executor section.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Pause between ticks (milliseconds).
    pub period_ms: Option<u64>,

    /// How early executables are started (seconds).
    pub start_lookahead_secs: Option<u64>,

    /// How long after the slot end executables are stopped (seconds).
    pub stop_lookbehind_secs: Option<u64>,

    /// Delay before a failed action is retried (seconds).
    pub next_attempt_secs: Option<u64>,

    /// Failed attempts after which an item is given up.
    pub max_attempt_count: Option<u32>,

    /// Poll interval while a batch is running (milliseconds).
    pub batch_poll_ms: Option<u64>,

    /// Timeout for a single device command (seconds).
    pub command_timeout_secs: Option<u64>,
}

/// Database section.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Path to the database file.
    pub path: Option<PathBuf>,

    /// Busy timeout for lock contention (milliseconds).
    pub busy_timeout_ms: Option<u64>,
}

fn seconds(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

impl Config {
    /// Builds executor settings, falling back to defaults for missing fields.
    #[must_use]
    pub fn executor_settings(&self) -> ExecutorSettings {
        let defaults = ExecutorSettings::default();
        let Some(section) = &self.executor else {
            return defaults;
        };

        ExecutorSettings {
            period: section
                .period_ms
                .map_or(defaults.period, Duration::from_millis),
            start_lookahead: section
                .start_lookahead_secs
                .map_or(defaults.start_lookahead, seconds),
            stop_lookbehind: section
                .stop_lookbehind_secs
                .map_or(defaults.stop_lookbehind, seconds),
            next_attempt: section
                .next_attempt_secs
                .map_or(defaults.next_attempt, seconds),
            max_attempt_count: section
                .max_attempt_count
                .unwrap_or(defaults.max_attempt_count),
            batch_poll: section
                .batch_poll_ms
                .map_or(defaults.batch_poll, Duration::from_millis),
            command_timeout: section
                .command_timeout_secs
                .map_or(defaults.command_timeout, Duration::from_secs),
        }
    }

    /// Builds scheduler settings.
    #[must_use]
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let mut settings = SchedulerSettings::default();
        if let Some(section) = &self.scheduler {
            if let Some(allow) = section.allow_executables {
                settings.allow_executables = allow;
            }
            settings.max_slot = section
                .max_slot_days
                .map(|days| chrono::Duration::days(i64::from(days)));
        }
        settings
    }

    /// Builds the database configuration.
    ///
    /// Without a configured path the file lives in the data directory
    /// (`$ALLOT_DATA_DIR` or `~/.allot`).
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the home directory
    /// cannot be determined.
    pub fn database_config(&self) -> crate::Result<DatabaseConfig> {
        let section = self.database.clone().unwrap_or_default();
        let path = match section.path {
            Some(path) => path,
            None => crate::database::resolve_database_path()?,
        };

        let mut config = DatabaseConfig::new(path);
        if let Some(ms) = section.busy_timeout_ms {
            config = config.with_busy_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
scheduler:
  allow_executables: false
  max_slot_days: 7
executor:
  period_ms: 1000
  start_lookahead_secs: 10
  stop_lookbehind_secs: 5
  next_attempt_secs: 30
  max_attempt_count: 3
  batch_poll_ms: 50
  command_timeout_secs: 20
database:
  path: /var/lib/allot/allot.db
  busy_timeout_ms: 2000
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        let executor = config.executor_settings();
        assert_eq!(executor.period, Duration::from_millis(1000));
        assert_eq!(executor.start_lookahead, chrono::Duration::seconds(10));
        assert_eq!(executor.stop_lookbehind, chrono::Duration::seconds(5));
        assert_eq!(executor.next_attempt, chrono::Duration::seconds(30));
        assert_eq!(executor.max_attempt_count, 3);
        assert_eq!(executor.batch_poll, Duration::from_millis(50));
        assert_eq!(executor.command_timeout, Duration::from_secs(20));

        let scheduler = config.scheduler_settings();
        assert!(!scheduler.allow_executables);
        assert_eq!(scheduler.max_slot, Some(chrono::Duration::days(7)));

        let database = config.database_config().unwrap();
        assert_eq!(database.path, PathBuf::from("/var/lib/allot/allot.db"));
        assert_eq!(database.busy_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str("executor:\n  period: 5\n");
        assert!(result.is_err());

        let result: Result<Config, _> = serde_yaml::from_str("ports:\n  min: 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::default();
        assert_eq!(config.executor_settings(), ExecutorSettings::default());
        assert_eq!(config.scheduler_settings(), SchedulerSettings::default());
    }

    #[test]
    fn test_partial_executor_section() {
        let config: Config = serde_yaml::from_str("executor:\n  next_attempt_secs: 5\n").unwrap();
        let settings = config.executor_settings();
        assert_eq!(settings.next_attempt, chrono::Duration::seconds(5));
        assert_eq!(settings.max_attempt_count, 5);
        assert_eq!(settings.period, Duration::from_millis(5000));
    }
}
