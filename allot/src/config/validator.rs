//! Configuration validation.
//!
//! Only values that would make the executor or the database unusable are
//! rejected here; everything else is accepted as written.

use crate::config::schema::{Config, DatabaseSection, ExecutorConfig, SchedulerConfig};
use crate::error::{Error, Result};

/// Validates configuration values.
///
/// # Examples
///
/// ```
/// use allot::config::{Config, ConfigValidator};
///
/// let config = Config::default();
/// ConfigValidator::validate(&config).unwrap();
/// ```
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a complete configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(config: &Config) -> Result<()> {
        if let Some(ref scheduler) = config.scheduler {
            Self::validate_scheduler(scheduler)?;
        }
        if let Some(ref executor) = config.executor {
            Self::validate_executor(executor)?;
        }
        if let Some(ref database) = config.database {
            Self::validate_database(database)?;
        }
        Ok(())
    }

    fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<()> {
        Self::require_positive("scheduler.max_slot_days", scheduler.max_slot_days.map(u64::from))
    }

    fn validate_executor(executor: &ExecutorConfig) -> Result<()> {
        Self::require_positive("executor.period_ms", executor.period_ms)?;
        Self::require_positive("executor.batch_poll_ms", executor.batch_poll_ms)?;
        Self::require_positive("executor.command_timeout_secs", executor.command_timeout_secs)?;
        Self::require_positive(
            "executor.max_attempt_count",
            executor.max_attempt_count.map(u64::from),
        )?;

        // Durations are stored as chrono::Duration, which is bounded by i64 seconds.
        for (field, value) in [
            ("executor.start_lookahead_secs", executor.start_lookahead_secs),
            ("executor.stop_lookbehind_secs", executor.stop_lookbehind_secs),
            ("executor.next_attempt_secs", executor.next_attempt_secs),
        ] {
            if value.is_some_and(|secs| i64::try_from(secs).is_err()) {
                return Err(Error::Validation {
                    field: field.into(),
                    message: "Value is out of range".into(),
                });
            }
        }

        Ok(())
    }

    fn validate_database(database: &DatabaseSection) -> Result<()> {
        if let Some(ref path) = database.path {
            if path.as_os_str().is_empty() {
                return Err(Error::Validation {
                    field: "database.path".into(),
                    message: "Path cannot be empty".into(),
                });
            }
        }
        Ok(())
    }

    fn require_positive(field: &str, value: Option<u64>) -> Result<()> {
        if value == Some(0) {
            return Err(Error::Validation {
                field: field.into(),
                message: "Value must be greater than 0".into(),
            });
        }
        Ok(())
    }
}
