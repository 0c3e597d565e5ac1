//! Property-based tests for configuration merging.

use super::merger::ConfigMerger;
use super::schema::{Config, ExecutorConfig, SchedulerConfig};
use proptest::prelude::*;

fn executor_strategy() -> impl Strategy<Value = ExecutorConfig> {
    (
        prop::option::of(1u64..=60_000),
        prop::option::of(0u64..=3600),
        prop::option::of(0u64..=3600),
        prop::option::of(0u64..=3600),
        prop::option::of(1u32..=20),
        prop::option::of(1u64..=1000),
        prop::option::of(1u64..=600),
    )
        .prop_map(
            |(period, lookahead, lookbehind, next, max, poll, timeout)| ExecutorConfig {
                period_ms: period,
                start_lookahead_secs: lookahead,
                stop_lookbehind_secs: lookbehind,
                next_attempt_secs: next,
                max_attempt_count: max,
                batch_poll_ms: poll,
                command_timeout_secs: timeout,
            },
        )
}

fn scheduler_strategy() -> impl Strategy<Value = SchedulerConfig> {
    (prop::option::of(any::<bool>()), prop::option::of(1u32..=365)).prop_map(
        |(allow_executables, max_slot_days)| SchedulerConfig {
            allow_executables,
            max_slot_days,
        },
    )
}

fn config_strategy() -> impl Strategy<Value = Config> {
    (
        prop::option::of(scheduler_strategy()),
        prop::option::of(executor_strategy()),
    )
        .prop_map(|(scheduler, executor)| Config {
            scheduler,
            executor,
            database: None,
        })
}

fn merged(low: &Config, high: &Config) -> Config {
    let mut result = low.clone();
    ConfigMerger::merge_into(&mut result, high);
    result
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 1000,
        .. ProptestConfig::default()
    })]

    // Every field set in the higher source survives the merge
    #[test]
    fn config_merge_higher_precedence_wins(low in config_strategy(), high in config_strategy()) {
        let result = merged(&low, &high);

        if let Some(high_executor) = &high.executor {
            let executor = result.executor.clone().unwrap_or_default();
            if high_executor.period_ms.is_some() {
                prop_assert_eq!(executor.period_ms, high_executor.period_ms);
            }
            if high_executor.max_attempt_count.is_some() {
                prop_assert_eq!(executor.max_attempt_count, high_executor.max_attempt_count);
            }
        }
        if let Some(high_scheduler) = &high.scheduler {
            let scheduler = result.scheduler.clone().unwrap_or_default();
            if high_scheduler.allow_executables.is_some() {
                prop_assert_eq!(scheduler.allow_executables, high_scheduler.allow_executables);
            }
        }
    }

    // Merging with an empty config is the identity on either side
    #[test]
    fn config_merge_empty_is_identity(config in config_strategy()) {
        prop_assert_eq!(merged(&config, &Config::default()), config.clone());
        prop_assert_eq!(merged(&Config::default(), &config), config);
    }

    // Merge is associative: (a + b) + c == a + (b + c)
    #[test]
    fn config_merge_associative(
        a in config_strategy(),
        b in config_strategy(),
        c in config_strategy()
    ) {
        prop_assert_eq!(merged(&merged(&a, &b), &c), merged(&a, &merged(&b, &c)));
    }

    // Merging a config into itself changes nothing
    #[test]
    fn config_merge_idempotent(config in config_strategy()) {
        prop_assert_eq!(merged(&config, &config), config);
    }

    // Merged configs of valid values always convert into usable settings
    #[test]
    fn config_merge_settings_stay_positive(low in config_strategy(), high in config_strategy()) {
        let settings = merged(&low, &high).executor_settings();
        prop_assert!(!settings.period.is_zero());
        prop_assert!(settings.max_attempt_count > 0);
        prop_assert!(!settings.command_timeout.is_zero());
    }
}
