//! Outcome of one executor tick.

use chrono::{DateTime, Utc};

use crate::executable::{ExecutableId, ExecutableState, ServiceId};

/// New persisted state of one executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableUpdate {
    /// The executable.
    pub id: ExecutableId,
    /// Its new state.
    pub state: ExecutableState,
    /// Its new attempt counter.
    pub attempt_count: u32,
    /// Earliest time of the next attempt, set after a failure.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Device room id; `None` leaves the stored one untouched.
    pub room_id: Option<String>,
    /// Failure report; cleared on success.
    pub report: Option<String>,
}

/// New persisted state of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdate {
    /// The service.
    pub id: ServiceId,
    /// Whether it is now active.
    pub active: bool,
    /// Its new attempt counter.
    pub attempt_count: u32,
    /// Earliest time of the next attempt, set after a failure.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Recording id while active.
    pub recording_id: Option<String>,
    /// Failure report; cleared on success.
    pub report: Option<String>,
}

/// Everything one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Executable state transitions, in completion order.
    pub executables: Vec<ExecutableUpdate>,
    /// Service state transitions, in completion order.
    pub services: Vec<ServiceUpdate>,
    /// Descriptions of actions skipped because a dependency failed.
    pub skipped: Vec<String>,
}

impl ExecutionResult {
    /// Returns true when the tick changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executables.is_empty() && self.services.is_empty() && self.skipped.is_empty()
    }

    /// Returns the executables that reached `state`.
    #[must_use]
    pub fn in_state(&self, state: ExecutableState) -> Vec<ExecutableId> {
        self.executables
            .iter()
            .filter(|update| update.state == state)
            .map(|update| update.id)
            .collect()
    }

    /// Returns the executables now running.
    #[must_use]
    pub fn started(&self) -> Vec<ExecutableId> {
        self.in_state(ExecutableState::Started)
    }

    /// Returns the executables now stopped.
    #[must_use]
    pub fn stopped(&self) -> Vec<ExecutableId> {
        self.in_state(ExecutableState::Stopped)
    }

    /// Returns the executables whose action failed this tick.
    #[must_use]
    pub fn failed(&self) -> Vec<ExecutableId> {
        self.executables
            .iter()
            .filter(|update| update.report.is_some())
            .map(|update| update.id)
            .collect()
    }

    /// Returns the services activated this tick.
    #[must_use]
    pub fn activated(&self) -> Vec<ServiceId> {
        self.services
            .iter()
            .filter(|update| update.active && update.report.is_none())
            .map(|update| update.id)
            .collect()
    }
}
