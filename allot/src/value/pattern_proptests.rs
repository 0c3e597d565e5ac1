//! Property-based tests for value patterns and allocation.
//!
//! These verify that candidate enumeration is deterministic, that every
//! generated value matches its pattern, and that allocation never hands out
//! a value that is already taken.

#[cfg(test)]
mod tests {
    use crate::value::pattern::Pattern;
    use crate::value::{ValueAllocator, ValueProvider, ValueProviderId};
    use proptest::prelude::*;
    use std::collections::HashSet;

    // ============================================================================
    // STRATEGY DEFINITIONS
    // ============================================================================

    /// Strategy for small patterns made of a literal prefix and one or two
    /// placeholders, kept small enough to enumerate completely.
    fn pattern_strategy() -> impl Strategy<Value = String> {
        (
            "[a-z]{0,3}",
            prop_oneof![Just("digit"), Just("hash")],
            1usize..=2,
            proptest::option::of(1usize..=2),
        )
            .prop_map(|(prefix, kind, width, second)| {
                let width = if kind == "hash" { 1 } else { width };
                match second {
                    Some(second) => format!("{prefix}{{{kind}:{width}}}-{{digit:{second}}}"),
                    None => format!("{prefix}{{{kind}:{width}}}"),
                }
            })
    }

    // ============================================================================
    // ENUMERATION PROPERTIES
    // ============================================================================

    proptest! {
        /// Enumerating a pattern twice yields the same sequence.
        #[test]
        fn prop_enumeration_is_deterministic(source in pattern_strategy()) {
            let pattern = Pattern::parse(&source).unwrap();
            let first: Vec<String> = pattern.values().take(200).collect();
            let second: Vec<String> = pattern.values().take(200).collect();
            prop_assert_eq!(first, second);
        }

        /// Every enumerated value matches its own pattern.
        #[test]
        fn prop_values_match_pattern(source in pattern_strategy()) {
            let pattern = Pattern::parse(&source).unwrap();
            for value in pattern.values().take(500) {
                prop_assert!(pattern.matches(&value), "{} does not match {}", value, source);
            }
        }

        /// Enumeration yields exactly `candidate_count` distinct values.
        #[test]
        fn prop_enumeration_is_complete_and_unique(source in pattern_strategy()) {
            let pattern = Pattern::parse(&source).unwrap();
            let count = usize::try_from(pattern.candidate_count().unwrap()).unwrap();
            let values: Vec<String> = pattern.values().collect();
            let distinct: HashSet<&String> = values.iter().collect();
            prop_assert_eq!(values.len(), count);
            prop_assert_eq!(distinct.len(), count);
        }
    }

    // ============================================================================
    // ALLOCATION PROPERTIES
    // ============================================================================

    proptest! {
        /// Allocation returns an untaken value, and the same one for the same
        /// taken set.
        #[test]
        fn prop_allocation_skips_taken_values(
            taken in proptest::collection::hash_set(0u32..100, 0..60)
        ) {
            let providers = vec![ValueProvider::patterns(["{digit:2}"])];
            let allocator = ValueAllocator::resolve(&providers, ValueProviderId::new(0)).unwrap();
            let taken: HashSet<String> = taken.into_iter().map(|n| format!("{n:02}")).collect();

            let first = allocator.allocate(None, |v| taken.contains(v)).unwrap().value;
            let second = allocator.allocate(None, |v| taken.contains(v)).unwrap().value;
            prop_assert!(!taken.contains(&first));
            prop_assert_eq!(&first, &second);

            // Nothing below the allocated value was free.
            let first_number: u32 = first.parse().unwrap();
            for n in 0..first_number {
                let expected = format!("{n:02}");
                prop_assert!(taken.contains(&expected));
            }
        }
    }
}
