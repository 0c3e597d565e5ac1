//! Configuration merging and precedence handling.
//!
//! Sections are merged field by field: a field set in a higher-precedence
//! source replaces the same field from lower sources, unset fields fall
//! through.

use crate::config::loader::ConfigSource;
use crate::config::schema::{Config, DatabaseSection, ExecutorConfig, SchedulerConfig};

/// Merges configuration sources according to precedence rules.
///
/// # Examples
///
/// ```
/// use allot::config::{Config, ConfigMerger, SchedulerConfig};
///
/// let low = Config {
///     scheduler: Some(SchedulerConfig { max_slot_days: Some(1), ..Default::default() }),
///     ..Default::default()
/// };
/// let high = Config {
///     scheduler: Some(SchedulerConfig { max_slot_days: Some(7), ..Default::default() }),
///     ..Default::default()
/// };
///
/// let mut result = low;
/// ConfigMerger::merge_into(&mut result, &high);
/// assert_eq!(result.scheduler.unwrap().max_slot_days, Some(7));
/// ```
#[derive(Debug)]
pub struct ConfigMerger;

impl ConfigMerger {
    /// Merge multiple configuration sources into final config.
    ///
    /// Sources should be provided in order from lowest to highest precedence.
    #[must_use]
    pub fn merge(sources: Vec<ConfigSource>) -> Config {
        let mut result = Config::default();

        for source in sources {
            Self::merge_into(&mut result, &source.config);
        }

        result
    }

    /// Merge source config into target (source overwrites target).
    pub fn merge_into(target: &mut Config, source: &Config) {
        if let Some(ref scheduler) = source.scheduler {
            let merged = target.scheduler.get_or_insert_with(Default::default);
            Self::merge_scheduler(merged, scheduler);
        }

        if let Some(ref executor) = source.executor {
            let merged = target.executor.get_or_insert_with(Default::default);
            Self::merge_executor(merged, executor);
        }

        if let Some(ref database) = source.database {
            let merged = target.database.get_or_insert_with(Default::default);
            Self::merge_database(merged, database);
        }
    }

    fn merge_scheduler(target: &mut SchedulerConfig, source: &SchedulerConfig) {
        target.allow_executables = source.allow_executables.or(target.allow_executables);
        target.max_slot_days = source.max_slot_days.or(target.max_slot_days);
    }

    fn merge_executor(target: &mut ExecutorConfig, source: &ExecutorConfig) {
        target.period_ms = source.period_ms.or(target.period_ms);
        target.start_lookahead_secs = source.start_lookahead_secs.or(target.start_lookahead_secs);
        target.stop_lookbehind_secs = source.stop_lookbehind_secs.or(target.stop_lookbehind_secs);
        target.next_attempt_secs = source.next_attempt_secs.or(target.next_attempt_secs);
        target.max_attempt_count = source.max_attempt_count.or(target.max_attempt_count);
        target.batch_poll_ms = source.batch_poll_ms.or(target.batch_poll_ms);
        target.command_timeout_secs = source.command_timeout_secs.or(target.command_timeout_secs);
    }

    fn merge_database(target: &mut DatabaseSection, source: &DatabaseSection) {
        if source.path.is_some() {
            target.path.clone_from(&source.path);
        }
        target.busy_timeout_ms = source.busy_timeout_ms.or(target.busy_timeout_ms);
    }
}
