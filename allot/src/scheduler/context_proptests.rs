//! Property-based tests for allocation context savepoints.

#[cfg(test)]
mod tests {
    use crate::reservation::ReservationKind;
    use crate::resource::{ResourceCatalog, ResourceId};
    use crate::scheduler::context::AllocationContext;
    use crate::slot::Slot;
    use crate::value::ValueProviderId;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    // ============================================================================
    // STRATEGY DEFINITIONS
    // ============================================================================

    /// One provisional allocation made inside a context.
    #[derive(Debug, Clone)]
    enum Step {
        Resource(u64),
        Licenses(u64, u32),
        Value(u32, u16),
        Reservation,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u64..20).prop_map(Step::Resource),
            (0u64..5, 1u32..10).prop_map(|(r, c)| Step::Licenses(r, c)),
            (0u32..3, 0u16..50).prop_map(|(s, v)| Step::Value(s, v)),
            Just(Step::Reservation),
        ]
    }

    fn day() -> Slot {
        let start = Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap();
        Slot::starting_at(start, Duration::days(1)).unwrap()
    }

    /// Applies a step, ignoring duplicates the context refuses.
    fn apply(ctx: &mut AllocationContext<'_>, step: &Step) {
        let slot = day();
        match step {
            Step::Resource(id) => {
                let node = ctx.create_reservation(
                    slot,
                    ReservationKind::Resource {
                        resource: ResourceId::new(*id),
                    },
                );
                let _ = ctx.reserve_resource(ResourceId::new(*id), slot, node);
            }
            Step::Licenses(id, count) => ctx.reserve_licenses(ResourceId::new(*id), slot, *count),
            Step::Value(scope, value) => {
                let _ = ctx.consume_value(ValueProviderId::new(*scope), &value.to_string(), slot);
            }
            Step::Reservation => {
                ctx.create_reservation(slot, ReservationKind::Compartment);
            }
        }
    }

    // ============================================================================
    // SAVEPOINT PROPERTIES
    // ============================================================================

    proptest! {
        /// Reverting a savepoint restores the size it was created at.
        #[test]
        fn prop_revert_restores_size(
            before in prop::collection::vec(step_strategy(), 0..20),
            after in prop::collection::vec(step_strategy(), 0..20),
        ) {
            let catalog = ResourceCatalog::new();
            let mut ctx = AllocationContext::new(&catalog, day());
            for step in &before {
                apply(&mut ctx, step);
            }
            let size = ctx.size();
            let savepoint = ctx.create_savepoint();
            for step in &after {
                apply(&mut ctx, step);
            }
            ctx.revert(&savepoint).unwrap();
            prop_assert_eq!(ctx.size(), size);
            ctx.destroy(savepoint).unwrap();
        }

        /// Nested savepoints revert independently: the inner revert keeps
        /// what was added between the two savepoints.
        #[test]
        fn prop_nested_revert_keeps_outer_work(
            outer in prop::collection::vec(step_strategy(), 0..10),
            inner in prop::collection::vec(step_strategy(), 1..10),
        ) {
            let catalog = ResourceCatalog::new();
            let mut ctx = AllocationContext::new(&catalog, day());
            let first = ctx.create_savepoint();
            for step in &outer {
                apply(&mut ctx, step);
            }
            let middle = ctx.size();
            let second = ctx.create_savepoint();
            for step in &inner {
                apply(&mut ctx, step);
            }
            ctx.revert(&second).unwrap();
            ctx.destroy(second).unwrap();
            prop_assert_eq!(ctx.size(), middle);

            ctx.revert(&first).unwrap();
            ctx.destroy(first).unwrap();
            prop_assert_eq!(ctx.size(), 0);
        }

        /// A value refused by the context stays refused until reverted.
        #[test]
        fn prop_consumed_value_is_exclusive(scope in 0u32..3, value in 0u16..100) {
            let catalog = ResourceCatalog::new();
            let mut ctx = AllocationContext::new(&catalog, day());
            let savepoint = ctx.create_savepoint();
            let scope = ValueProviderId::new(scope);
            ctx.consume_value(scope, &value.to_string(), day()).unwrap();
            prop_assert!(ctx.consume_value(scope, &value.to_string(), day()).is_err());
            ctx.revert(&savepoint).unwrap();
            prop_assert!(ctx.consume_value(scope, &value.to_string(), day()).is_ok());
            ctx.destroy(savepoint).unwrap();
        }
    }
}
