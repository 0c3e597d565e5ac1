//! Property-based tests for execution plans.
//!
//! Acyclic dependency graphs always drain completely, and no action is handed
//! out before the actions it depends on were removed.

#[cfg(test)]
mod tests {
    use crate::executable::{Executable, ExecutableId, ExecutableKind, ExecutableState};
    use crate::executor::action::ExecutionAction;
    use crate::executor::plan::ExecutionPlan;
    use proptest::prelude::*;
    use std::collections::HashSet;

    // ============================================================================
    // STRATEGY DEFINITIONS
    // ============================================================================

    fn executable(id: i64, dependencies: Vec<i64>) -> Executable {
        Executable {
            id: ExecutableId(id),
            kind: ExecutableKind::Compartment { connections: vec![] },
            slot: "2012-01-01T00:00:00Z/2012-01-02T00:00:00Z".parse().unwrap(),
            state: ExecutableState::NotStarted,
            attempt_count: 0,
            next_attempt_at: None,
            room_id: None,
            dependencies: dependencies.into_iter().map(ExecutableId).collect(),
            report: None,
        }
    }

    /// Strategy for acyclic graphs: executable `i` only depends on lower ids.
    /// Each executable is either started or stopped.
    fn acyclic_actions() -> impl Strategy<Value = Vec<ExecutionAction>> {
        (1usize..25)
            .prop_flat_map(|count| {
                (
                    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), count),
                    prop::collection::vec(any::<bool>(), count),
                )
            })
            .prop_map(|(dependencies, stops)| {
                dependencies
                    .into_iter()
                    .zip(stops)
                    .enumerate()
                    .map(|(i, (picks, stop))| {
                        let deps: Vec<i64> = if i == 0 {
                            Vec::new()
                        } else {
                            picks.iter().map(|pick| i64::try_from(pick.index(i)).unwrap()).collect()
                        };
                        let executable = executable(i64::try_from(i).unwrap(), deps);
                        if stop {
                            ExecutionAction::Stop(executable)
                        } else {
                            ExecutionAction::Start(executable)
                        }
                    })
                    .collect()
            })
    }

    // ============================================================================
    // DRAINING PROPERTIES
    // ============================================================================

    proptest! {
        /// Popping and removing every batch empties an acyclic plan.
        #[test]
        fn prop_acyclic_plan_drains(actions in acyclic_actions()) {
            let count = actions.len();
            let mut plan = ExecutionPlan::build(actions).unwrap();
            let mut rounds = 0;
            while !plan.is_empty() {
                let batch = plan.pop_actions();
                prop_assert!(!batch.is_empty(), "plan stalled with {} actions left", plan.remaining());
                for id in batch {
                    plan.remove_action(id);
                }
                rounds += 1;
                prop_assert!(rounds <= count);
            }
        }

        /// Every action is handed out exactly once.
        #[test]
        fn prop_actions_popped_once(actions in acyclic_actions()) {
            let count = actions.len();
            let mut plan = ExecutionPlan::build(actions).unwrap();
            let mut seen = HashSet::new();
            loop {
                let batch = plan.pop_actions();
                if batch.is_empty() {
                    break;
                }
                for id in batch {
                    prop_assert!(seen.insert(id));
                    plan.remove_action(id);
                }
            }
            prop_assert_eq!(seen.len(), count);
        }

        /// A started executable is never handed out before the start of an
        /// executable it depends on was removed.
        #[test]
        fn prop_starts_follow_dependencies(actions in acyclic_actions()) {
            let planned: HashSet<ExecutableId> = actions
                .iter()
                .filter(|action| matches!(action, ExecutionAction::Start(_)))
                .map(ExecutionAction::executable_id)
                .collect();
            let mut plan = ExecutionPlan::build(actions).unwrap();
            let mut started: HashSet<ExecutableId> = HashSet::new();
            loop {
                let batch = plan.pop_actions();
                if batch.is_empty() {
                    break;
                }
                for id in &batch {
                    if let ExecutionAction::Start(executable) = plan.action(*id) {
                        for dependency in &executable.dependencies {
                            prop_assert!(!planned.contains(dependency) || started.contains(dependency));
                        }
                    }
                }
                for id in batch {
                    if let ExecutionAction::Start(executable) = plan.action(id) {
                        started.insert(executable.id);
                    }
                    plan.remove_action(id);
                }
            }
        }
    }
}
