//! Execution plan.
//!
//! The plan orders one tick's actions as a dependency graph:
//!
//! - starting or updating an executable waits for the start or update of
//!   every executable it depends on;
//! - stopping an executable waits for the stop of every executable depending
//!   on it;
//! - a migration runs before the start of its target and the stop of its
//!   source;
//! - a service is activated after its executable starts and deactivated
//!   before it stops.
//!
//! [`ExecutionPlan::pop_actions`] hands out the ready frontier;
//! [`ExecutionPlan::remove_action`] retires a finished action and may make
//! more actions ready.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::executable::ExecutableId;
use crate::executor::action::{ActionKind, ExecutionAction};

/// Position of an action within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(usize);

impl ActionId {
    /// Returns the position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Popped,
    Removed,
}

/// Dependency-ordered actions of one tick.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    actions: Vec<ExecutionAction>,
    status: Vec<Status>,
    /// `dependencies[a]` must be removed before `a` is ready.
    dependencies: Vec<BTreeSet<ActionId>>,
    dependents: Vec<BTreeSet<ActionId>>,
}

impl ExecutionPlan {
    /// Builds the plan for `actions`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DependencyCycle`] naming the executables on a cycle.
    pub fn build(actions: Vec<ExecutionAction>) -> Result<Self> {
        let count = actions.len();
        let mut plan = Self {
            status: vec![Status::Pending; count],
            dependencies: vec![BTreeSet::new(); count],
            dependents: vec![BTreeSet::new(); count],
            actions,
        };

        let mut by_executable: HashMap<(ActionKind, ExecutableId), Vec<ActionId>> = HashMap::new();
        for (index, action) in plan.actions.iter().enumerate() {
            by_executable
                .entry((action.kind(), action.executable_id()))
                .or_default()
                .push(ActionId(index));
        }
        let lookup = |kind: ActionKind, executable: ExecutableId| -> Vec<ActionId> {
            by_executable.get(&(kind, executable)).cloned().unwrap_or_default()
        };

        let mut edges = Vec::new();
        for (index, action) in plan.actions.iter().enumerate() {
            let id = ActionId(index);
            match action {
                ExecutionAction::Start(executable) | ExecutionAction::Update(executable) => {
                    for dependency in &executable.dependencies {
                        for kind in [ActionKind::Start, ActionKind::Update, ActionKind::Migration] {
                            edges.extend(lookup(kind, *dependency).into_iter().map(|d| (id, d)));
                        }
                    }
                }
                ExecutionAction::Stop(executable) => {
                    // Stop every dependent before the executable it relies on.
                    for dependency in &executable.dependencies {
                        edges.extend(lookup(ActionKind::Stop, *dependency).into_iter().map(|d| (d, id)));
                    }
                    edges.extend(
                        lookup(ActionKind::DeactivateService, executable.id)
                            .into_iter()
                            .map(|d| (id, d)),
                    );
                }
                ExecutionAction::Migration { source, target } => {
                    edges.extend(lookup(ActionKind::Start, target.id).into_iter().map(|s| (s, id)));
                    edges.extend(lookup(ActionKind::Stop, source.id).into_iter().map(|s| (s, id)));
                }
                ExecutionAction::ActivateService(service) => {
                    for kind in [ActionKind::Start, ActionKind::Migration] {
                        edges.extend(lookup(kind, service.executable).into_iter().map(|d| (id, d)));
                    }
                }
                ExecutionAction::DeactivateService(_) => {}
            }
        }
        for (action, dependency) in edges {
            if action != dependency {
                plan.dependencies[action.0].insert(dependency);
                plan.dependents[dependency.0].insert(action);
            }
        }

        plan.check_cycles()?;
        Ok(plan)
    }

    /// Depth-first search with three colors; a grey node reached again
    /// closes a cycle.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Grey,
            Black,
        }

        let mut color = vec![Color::White; self.actions.len()];
        for start in 0..self.actions.len() {
            if color[start] != Color::White {
                continue;
            }
            // Stack of (node, dependencies left to visit).
            let mut path: Vec<ActionId> = vec![ActionId(start)];
            let mut stack: Vec<(ActionId, Vec<ActionId>)> =
                vec![(ActionId(start), self.dependencies[start].iter().copied().collect())];
            color[start] = Color::Grey;

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(next) => match color[next.0] {
                        Color::White => {
                            color[next.0] = Color::Grey;
                            path.push(next);
                            stack.push((next, self.dependencies[next.0].iter().copied().collect()));
                        }
                        Color::Grey => {
                            let from = path.iter().position(|id| *id == next).unwrap_or(0);
                            let mut executables: Vec<ExecutableId> = path[from..]
                                .iter()
                                .map(|id| self.actions[id.0].executable_id())
                                .collect();
                            executables.push(self.actions[next.0].executable_id());
                            return Err(Error::DependencyCycle { executables });
                        }
                        Color::Black => {}
                    },
                    None => {
                        color[node.0] = Color::Black;
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the number of actions not yet removed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.status.iter().filter(|s| **s != Status::Removed).count()
    }

    /// Returns true when every action has been removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns an action of the plan.
    #[must_use]
    pub fn action(&self, id: ActionId) -> &ExecutionAction {
        &self.actions[id.0]
    }

    /// Returns the ready frontier: pending actions whose dependencies are all
    /// removed, ordered by kind priority and then by position. Returned
    /// actions are not returned again.
    pub fn pop_actions(&mut self) -> Vec<ActionId> {
        let mut ready: Vec<ActionId> = (0..self.actions.len())
            .map(ActionId)
            .filter(|id| self.status[id.0] == Status::Pending)
            .filter(|id| {
                self.dependencies[id.0]
                    .iter()
                    .all(|d| self.status[d.0] == Status::Removed)
            })
            .collect();
        ready.sort_by_key(|id| (self.actions[id.0].kind().priority(), *id));
        for id in &ready {
            self.status[id.0] = Status::Popped;
        }
        ready
    }

    /// Retires an action, letting its dependents become ready.
    pub fn remove_action(&mut self, id: ActionId) {
        self.status[id.0] = Status::Removed;
    }

    /// Retires an action together with every pending action depending on it,
    /// directly or not. Returns the dependents retired this way.
    pub fn remove_with_dependents(&mut self, id: ActionId) -> Vec<ActionId> {
        self.remove_action(id);
        let mut removed = Vec::new();
        let mut queue: Vec<ActionId> = self.dependents[id.0].iter().copied().collect();
        while let Some(next) = queue.pop() {
            if self.status[next.0] != Status::Pending {
                continue;
            }
            self.status[next.0] = Status::Removed;
            removed.push(next);
            queue.extend(self.dependents[next.0].iter().copied());
        }
        removed.sort();
        removed
    }

    /// Returns the pending actions for `executable` of `kind`.
    #[must_use]
    pub fn pending(&self, kind: ActionKind, executable: ExecutableId) -> Vec<ActionId> {
        (0..self.actions.len())
            .map(ActionId)
            .filter(|id| self.status[id.0] == Status::Pending)
            .filter(|id| {
                let action = &self.actions[id.0];
                action.kind() == kind && action.executable_id() == executable
            })
            .collect()
    }
}
