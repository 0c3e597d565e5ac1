//! Execution actions.
//!
//! An action is one thing the executor does to one executable or service in
//! a tick. Performing an action talks to devices; recording its outcome
//! produces the state transition the tick persists.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::executable::{Executable, ExecutableId, ExecutableKind, ExecutableService, ExecutableState, ServiceKind};
use crate::executor::device::{CommandResult, DeviceCommand, TimeoutChannel};
use crate::executor::result::{ExecutableUpdate, ExecutionResult, ServiceUpdate};

/// A running room as known to the devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomHandle {
    /// Agent controlling the hosting device.
    pub agent: Option<String>,
    /// Device room id.
    pub room_id: String,
}

/// Running rooms by executable.
pub type RoomHandles = HashMap<ExecutableId, RoomHandle>;

/// The kind of an action, ordering ready actions within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// Stop an executable.
    Stop,
    /// Deactivate a service.
    DeactivateService,
    /// Hand a running room over to its replacement.
    Migration,
    /// Start an executable.
    Start,
    /// Push changed settings to a running executable.
    Update,
    /// Activate a service.
    ActivateService,
}

impl ActionKind {
    /// Returns the batch priority; lower runs first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Stop | Self::DeactivateService => 0,
            Self::Migration => 1,
            Self::Start | Self::Update => 2,
            Self::ActivateService => 3,
        }
    }
}

/// The outcome of performing an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action succeeded; `identifier` is what the device assigned, if
    /// anything (room id, recording id).
    Succeeded {
        /// Device-assigned identifier.
        identifier: Option<String>,
    },
    /// The action failed.
    Failed(String),
}

impl ActionOutcome {
    const fn done() -> Self {
        Self::Succeeded { identifier: None }
    }

    /// Returns true for a successful outcome.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

impl From<CommandResult> for ActionOutcome {
    fn from(result: CommandResult) -> Self {
        match result {
            CommandResult::Success(identifier) => Self::Succeeded { identifier },
            CommandResult::Failed(reason) => Self::Failed(reason),
        }
    }
}

/// One unit of executor work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionAction {
    /// Start an executable.
    Start(Executable),
    /// Push changed settings to a running executable.
    Update(Executable),
    /// Stop an executable.
    Stop(Executable),
    /// Hand the running `source` over to `target`.
    Migration {
        /// The running executable being replaced.
        source: Executable,
        /// The replacement.
        target: Executable,
    },
    /// Activate a service.
    ActivateService(ExecutableService),
    /// Deactivate a service.
    DeactivateService(ExecutableService),
}

impl fmt::Display for ExecutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(e) => write!(f, "start {} ({})", e.id, e.kind.name()),
            Self::Update(e) => write!(f, "update {} ({})", e.id, e.kind.name()),
            Self::Stop(e) => write!(f, "stop {} ({})", e.id, e.kind.name()),
            Self::Migration { source, target } => write!(f, "migrate {} to {}", source.id, target.id),
            Self::ActivateService(s) => write!(f, "activate {} of {}", s.id, s.executable),
            Self::DeactivateService(s) => write!(f, "deactivate {} of {}", s.id, s.executable),
        }
    }
}

fn require_agent<'e>(agent: Option<&'e str>, what: &str) -> Result<&'e str, ActionOutcome> {
    agent.ok_or_else(|| ActionOutcome::Failed(format!("{what} has no controlling agent")))
}

impl ExecutionAction {
    /// Returns the kind of the action.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Start(_) => ActionKind::Start,
            Self::Update(_) => ActionKind::Update,
            Self::Stop(_) => ActionKind::Stop,
            Self::Migration { .. } => ActionKind::Migration,
            Self::ActivateService(_) => ActionKind::ActivateService,
            Self::DeactivateService(_) => ActionKind::DeactivateService,
        }
    }

    /// Returns the executable the action concerns; for a migration that is
    /// the target.
    #[must_use]
    pub const fn executable_id(&self) -> ExecutableId {
        match self {
            Self::Start(e) | Self::Update(e) | Self::Stop(e) => e.id,
            Self::Migration { target, .. } => target.id,
            Self::ActivateService(s) | Self::DeactivateService(s) => s.executable,
        }
    }

    /// Returns the executable carried by executable actions.
    #[must_use]
    pub const fn executable(&self) -> Option<&Executable> {
        match self {
            Self::Start(e) | Self::Update(e) | Self::Stop(e) => Some(e),
            Self::Migration { target, .. } => Some(target),
            Self::ActivateService(_) | Self::DeactivateService(_) => None,
        }
    }

    /// Performs the action against the devices.
    #[must_use]
    pub fn perform(&self, channel: &TimeoutChannel<'_>, rooms: &RoomHandles) -> ActionOutcome {
        let outcome = match self {
            Self::Start(executable) => Self::start(executable, channel, rooms),
            Self::Update(executable) => Self::update(executable, channel),
            Self::Stop(executable) => Self::stop(executable, channel, rooms),
            Self::Migration { source, target } => Self::migrate(source, target, channel),
            Self::ActivateService(service) => Self::activate(service, channel, rooms),
            Self::DeactivateService(service) => Self::deactivate(service, channel),
        };
        outcome.unwrap_or_else(|failed| failed)
    }

    fn start(executable: &Executable, channel: &TimeoutChannel<'_>, rooms: &RoomHandles) -> Result<ActionOutcome, ActionOutcome> {
        match &executable.kind {
            ExecutableKind::Room(room) => {
                let agent = require_agent(room.agent.as_deref(), "room device")?;
                let outcome = ActionOutcome::from(channel.perform(agent, DeviceCommand::CreateRoom { room: room.clone() }));
                Ok(match outcome {
                    ActionOutcome::Succeeded { identifier } => ActionOutcome::Succeeded {
                        identifier: identifier.or_else(|| Some(room.name.clone())),
                    },
                    failed => failed,
                })
            }
            ExecutableKind::UsedRoom { room, license_count } => {
                let handle = rooms
                    .get(room)
                    .ok_or_else(|| ActionOutcome::Failed(format!("reused room {room} is not running")))?;
                let agent = require_agent(handle.agent.as_deref(), "reused room")?;
                let command = DeviceCommand::ModifyRoomLicenses {
                    room_id: handle.room_id.clone(),
                    delta: i64::from(*license_count),
                };
                Ok(match channel.perform(agent, command) {
                    CommandResult::Success(_) => ActionOutcome::Succeeded {
                        identifier: Some(handle.room_id.clone()),
                    },
                    CommandResult::Failed(reason) => ActionOutcome::Failed(reason),
                })
            }
            ExecutableKind::Compartment { connections } => {
                for connection in connections {
                    let Some(agent) = connection.agent.as_deref() else {
                        continue;
                    };
                    if let CommandResult::Failed(reason) = channel.perform(agent, DeviceCommand::dial(connection)) {
                        return Ok(ActionOutcome::Failed(format!("{} cannot dial {}: {reason}", connection.from, connection.alias.value)));
                    }
                }
                Ok(ActionOutcome::done())
            }
        }
    }

    fn update(executable: &Executable, channel: &TimeoutChannel<'_>) -> Result<ActionOutcome, ActionOutcome> {
        let ExecutableKind::Room(room) = &executable.kind else {
            return Ok(ActionOutcome::done());
        };
        let agent = require_agent(room.agent.as_deref(), "room device")?;
        let room_id = executable
            .room_id
            .clone()
            .ok_or_else(|| ActionOutcome::Failed(format!("{} has no room id", executable.id)))?;
        let command = DeviceCommand::ModifyRoom {
            room_id,
            room: room.clone(),
        };
        Ok(channel.perform(agent, command).into())
    }

    fn stop(executable: &Executable, channel: &TimeoutChannel<'_>, rooms: &RoomHandles) -> Result<ActionOutcome, ActionOutcome> {
        match &executable.kind {
            ExecutableKind::Room(room) => {
                let Some(room_id) = executable.room_id.clone() else {
                    return Ok(ActionOutcome::done());
                };
                let agent = require_agent(room.agent.as_deref(), "room device")?;
                Ok(channel.perform(agent, DeviceCommand::DeleteRoom { room_id }).into())
            }
            ExecutableKind::UsedRoom { room, license_count } => {
                let Some(handle) = rooms.get(room) else {
                    return Ok(ActionOutcome::done());
                };
                let agent = require_agent(handle.agent.as_deref(), "reused room")?;
                let command = DeviceCommand::ModifyRoomLicenses {
                    room_id: handle.room_id.clone(),
                    delta: -i64::from(*license_count),
                };
                Ok(channel.perform(agent, command).into())
            }
            ExecutableKind::Compartment { connections } => {
                let mut failures = Vec::new();
                for connection in connections {
                    let Some(agent) = connection.agent.as_deref() else {
                        continue;
                    };
                    let command = DeviceCommand::HangUp {
                        alias: connection.alias.clone(),
                    };
                    if let CommandResult::Failed(reason) = channel.perform(agent, command) {
                        failures.push(reason);
                    }
                }
                Ok(if failures.is_empty() {
                    ActionOutcome::done()
                } else {
                    ActionOutcome::Failed(failures.join("; "))
                })
            }
        }
    }

    fn migrate(source: &Executable, target: &Executable, channel: &TimeoutChannel<'_>) -> Result<ActionOutcome, ActionOutcome> {
        let (ExecutableKind::Room(from), ExecutableKind::Room(to)) = (&source.kind, &target.kind) else {
            return Err(ActionOutcome::Failed("only rooms can be migrated".to_string()));
        };
        if from.device != to.device {
            return Err(ActionOutcome::Failed(format!(
                "cannot migrate between devices {} and {}",
                from.device, to.device
            )));
        }
        let room_id = source
            .room_id
            .clone()
            .ok_or_else(|| ActionOutcome::Failed(format!("{} has no room id", source.id)))?;
        let agent = require_agent(to.agent.as_deref(), "room device")?;
        let command = DeviceCommand::ModifyRoom {
            room_id: room_id.clone(),
            room: to.clone(),
        };
        Ok(match channel.perform(agent, command) {
            CommandResult::Success(_) => ActionOutcome::Succeeded {
                identifier: Some(room_id),
            },
            CommandResult::Failed(reason) => ActionOutcome::Failed(reason),
        })
    }

    fn activate(service: &ExecutableService, channel: &TimeoutChannel<'_>, rooms: &RoomHandles) -> Result<ActionOutcome, ActionOutcome> {
        let ServiceKind::Recording { agent, .. } = &service.kind;
        let agent = require_agent(agent.as_deref(), "recording device")?;
        let handle = rooms
            .get(&service.executable)
            .ok_or_else(|| ActionOutcome::Failed(format!("{} is not running", service.executable)))?;
        let command = DeviceCommand::StartRecording {
            room_id: handle.room_id.clone(),
        };
        Ok(channel.perform(agent, command).into())
    }

    fn deactivate(service: &ExecutableService, channel: &TimeoutChannel<'_>) -> Result<ActionOutcome, ActionOutcome> {
        let ServiceKind::Recording { agent, .. } = &service.kind;
        let Some(recording_id) = service.recording_id.clone() else {
            return Ok(ActionOutcome::done());
        };
        let agent = require_agent(agent.as_deref(), "recording device")?;
        Ok(channel.perform(agent, DeviceCommand::StopRecording { recording_id }).into())
    }

    /// Returns the room handle a successful outcome makes known.
    #[must_use]
    pub fn room_handle(&self, outcome: &ActionOutcome) -> Option<(ExecutableId, RoomHandle)> {
        let ActionOutcome::Succeeded { identifier: Some(room_id) } = outcome else {
            return None;
        };
        match self {
            Self::Start(executable) | Self::Migration { target: executable, .. } => match &executable.kind {
                ExecutableKind::Room(room) => Some((
                    executable.id,
                    RoomHandle {
                        agent: room.agent.clone(),
                        room_id: room_id.clone(),
                    },
                )),
                _ => None,
            },
            _ => None,
        }
    }

    /// Records the state transition caused by `outcome` in `result`.
    ///
    /// A failure bumps the attempt counter and delays the next attempt to
    /// `retry_at`; a failed migration changes nothing, the regular start and
    /// stop actions take over.
    pub fn record(&self, outcome: &ActionOutcome, retry_at: DateTime<Utc>, result: &mut ExecutionResult) {
        let (identifier, failure) = match outcome {
            ActionOutcome::Succeeded { identifier } => (identifier.clone(), None),
            ActionOutcome::Failed(reason) => (None, Some(reason.clone())),
        };
        let executable_update = |executable: &Executable, ok: ExecutableState, failed: ExecutableState| {
            match &failure {
                None => ExecutableUpdate {
                    id: executable.id,
                    state: ok,
                    attempt_count: 0,
                    next_attempt_at: None,
                    room_id: identifier.clone(),
                    report: None,
                },
                Some(reason) => ExecutableUpdate {
                    id: executable.id,
                    state: failed,
                    attempt_count: if executable.state == failed {
                        executable.attempt_count + 1
                    } else {
                        1
                    },
                    next_attempt_at: Some(retry_at),
                    room_id: None,
                    report: Some(reason.clone()),
                },
            }
        };
        let service_update = |service: &ExecutableService, activating: bool| match &failure {
            None => ServiceUpdate {
                id: service.id,
                active: activating,
                attempt_count: 0,
                next_attempt_at: None,
                recording_id: if activating { identifier.clone() } else { None },
                report: None,
            },
            Some(reason) => ServiceUpdate {
                id: service.id,
                active: !activating,
                attempt_count: service.attempt_count + 1,
                next_attempt_at: Some(retry_at),
                recording_id: service.recording_id.clone(),
                report: Some(reason.clone()),
            },
        };

        match self {
            Self::Start(executable) => result.executables.push(executable_update(
                executable,
                ExecutableState::Started,
                ExecutableState::StartingFailed,
            )),
            Self::Update(executable) => result.executables.push(executable_update(
                executable,
                ExecutableState::Started,
                ExecutableState::Modified,
            )),
            Self::Stop(executable) => result.executables.push(executable_update(
                executable,
                ExecutableState::Stopped,
                ExecutableState::StoppingFailed,
            )),
            Self::Migration { source, target } => {
                if failure.is_none() {
                    result.executables.push(executable_update(
                        target,
                        ExecutableState::Started,
                        ExecutableState::StartingFailed,
                    ));
                    result.executables.push(ExecutableUpdate {
                        id: source.id,
                        state: ExecutableState::Stopped,
                        attempt_count: 0,
                        next_attempt_at: None,
                        room_id: None,
                        report: None,
                    });
                }
            }
            Self::ActivateService(service) => result.services.push(service_update(service, true)),
            Self::DeactivateService(service) => result.services.push(service_update(service, false)),
        }
    }
}
