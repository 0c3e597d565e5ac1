//! Environment variable handling for configuration overrides.
//!
//! This module provides support for `ALLOT_*` environment variables that
//! override configuration file values.

use crate::config::schema::Config;
use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Handles environment variable overrides for configuration.
///
/// | Variable | Field |
/// |----------|-------|
/// | `ALLOT_ALLOW_EXECUTABLES` | `scheduler.allow_executables` |
/// | `ALLOT_MAX_SLOT_DAYS` | `scheduler.max_slot_days` |
/// | `ALLOT_PERIOD_MS` | `executor.period_ms` |
/// | `ALLOT_START_LOOKAHEAD_SECS` | `executor.start_lookahead_secs` |
/// | `ALLOT_STOP_LOOKBEHIND_SECS` | `executor.stop_lookbehind_secs` |
/// | `ALLOT_NEXT_ATTEMPT_SECS` | `executor.next_attempt_secs` |
/// | `ALLOT_MAX_ATTEMPT_COUNT` | `executor.max_attempt_count` |
/// | `ALLOT_BATCH_POLL_MS` | `executor.batch_poll_ms` |
/// | `ALLOT_COMMAND_TIMEOUT_SECS` | `executor.command_timeout_secs` |
/// | `ALLOT_DATABASE_PATH` | `database.path` |
/// | `ALLOT_BUSY_TIMEOUT_MS` | `database.busy_timeout_ms` |
///
/// # Examples
///
/// ```no_run
/// use allot::config::{Config, EnvironmentConfig};
///
/// let mut config = Config::default();
/// EnvironmentConfig::apply_overrides(&mut config).unwrap();
/// ```
#[derive(Debug)]
pub struct EnvironmentConfig;

impl EnvironmentConfig {
    /// Apply environment variable overrides to config.
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable value is invalid
    /// (e.g., a non-numeric period or an invalid boolean).
    pub fn apply_overrides(config: &mut Config) -> Result<()> {
        Self::apply_scheduler_overrides(config)?;
        Self::apply_executor_overrides(config)?;
        Self::apply_database_overrides(config)?;
        Ok(())
    }

    fn apply_scheduler_overrides(config: &mut Config) -> Result<()> {
        let allow = Self::read_bool("ALLOT_ALLOW_EXECUTABLES")?;
        let max_slot_days = Self::read_number("ALLOT_MAX_SLOT_DAYS")?;

        if allow.is_some() || max_slot_days.is_some() {
            let scheduler = config.scheduler.get_or_insert_with(Default::default);
            scheduler.allow_executables = allow.or(scheduler.allow_executables);
            scheduler.max_slot_days = max_slot_days.or(scheduler.max_slot_days);
        }

        Ok(())
    }

    fn apply_executor_overrides(config: &mut Config) -> Result<()> {
        let mut executor = config.executor.clone().unwrap_or_default();
        let before = executor.clone();

        if let Some(value) = Self::read_number("ALLOT_PERIOD_MS")? {
            executor.period_ms = Some(value);
        }
        if let Some(value) = Self::read_number("ALLOT_START_LOOKAHEAD_SECS")? {
            executor.start_lookahead_secs = Some(value);
        }
        if let Some(value) = Self::read_number("ALLOT_STOP_LOOKBEHIND_SECS")? {
            executor.stop_lookbehind_secs = Some(value);
        }
        if let Some(value) = Self::read_number("ALLOT_NEXT_ATTEMPT_SECS")? {
            executor.next_attempt_secs = Some(value);
        }
        if let Some(value) = Self::read_number("ALLOT_MAX_ATTEMPT_COUNT")? {
            executor.max_attempt_count = Some(value);
        }
        if let Some(value) = Self::read_number("ALLOT_BATCH_POLL_MS")? {
            executor.batch_poll_ms = Some(value);
        }
        if let Some(value) = Self::read_number("ALLOT_COMMAND_TIMEOUT_SECS")? {
            executor.command_timeout_secs = Some(value);
        }

        if executor != before {
            config.executor = Some(executor);
        }

        Ok(())
    }

    fn apply_database_overrides(config: &mut Config) -> Result<()> {
        if let Some(path) = env::var_os("ALLOT_DATABASE_PATH") {
            config.database.get_or_insert_with(Default::default).path = Some(PathBuf::from(path));
        }

        if let Some(ms) = Self::read_number("ALLOT_BUSY_TIMEOUT_MS")? {
            config.database.get_or_insert_with(Default::default).busy_timeout_ms = Some(ms);
        }

        Ok(())
    }

    fn read_bool(name: &str) -> Result<Option<bool>> {
        env::var(name)
            .ok()
            .map(|value| Self::parse_bool(name, &value))
            .transpose()
    }

    fn read_number<T: FromStr>(name: &str) -> Result<Option<T>> {
        env::var(name)
            .ok()
            .map(|value| Self::parse_number(name, &value))
            .transpose()
    }

    /// Parse a boolean value from a string.
    ///
    /// Accepts: true/1/yes/on for true, false/0/no/off for false (case-insensitive).
    fn parse_bool(field: &str, s: &str) -> Result<bool> {
        match s.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(Error::Validation {
                field: field.into(),
                message: format!(
                    "Invalid boolean value: '{s}' (expected true/false/1/0/yes/no/on/off)"
                ),
            }),
        }
    }

    fn parse_number<T: FromStr>(field: &str, s: &str) -> Result<T> {
        s.trim().parse().map_err(|_| Error::Validation {
            field: field.into(),
            message: format!("Must be a non-negative integer, got '{s}'"),
        })
    }
}
