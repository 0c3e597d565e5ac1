//! Device control channel.
//!
//! Commands are dispatched to the agent controlling a device and answered
//! through a one-shot `mpsc` receiver. [`TimeoutChannel`] bounds the wait
//! and turns a missing answer into a failed command.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::executable::{Connection, RoomEndpoint};
use crate::resource::Alias;

/// A command sent to a device agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Create a virtual room; answers with the device's room id.
    CreateRoom {
        /// The room to create.
        room: RoomEndpoint,
    },
    /// Change an existing room to match `room`.
    ModifyRoom {
        /// Device room id.
        room_id: String,
        /// The new room settings.
        room: RoomEndpoint,
    },
    /// Change the license count of an existing room by `delta`.
    ModifyRoomLicenses {
        /// Device room id.
        room_id: String,
        /// Licenses to add (negative to remove).
        delta: i64,
    },
    /// Delete a virtual room.
    DeleteRoom {
        /// Device room id.
        room_id: String,
    },
    /// Place a call.
    Dial {
        /// Alias to dial.
        alias: Alias,
    },
    /// Hang up a call.
    HangUp {
        /// Alias of the call.
        alias: Alias,
    },
    /// Start recording a room; answers with the recording id.
    StartRecording {
        /// Device room id of the recorded room.
        room_id: String,
    },
    /// Stop a recording.
    StopRecording {
        /// Recording id.
        recording_id: String,
    },
}

impl DeviceCommand {
    /// Builds the dial command for a connection.
    #[must_use]
    pub fn dial(connection: &Connection) -> Self {
        Self::Dial {
            alias: connection.alias.clone(),
        }
    }

    /// Returns a short name of the command for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::ModifyRoom { .. } => "modify-room",
            Self::ModifyRoomLicenses { .. } => "modify-room-licenses",
            Self::DeleteRoom { .. } => "delete-room",
            Self::Dial { .. } => "dial",
            Self::HangUp { .. } => "hang-up",
            Self::StartRecording { .. } => "start-recording",
            Self::StopRecording { .. } => "stop-recording",
        }
    }
}

/// The answer to a device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The command succeeded, optionally returning an identifier.
    Success(Option<String>),
    /// The command failed.
    Failed(String),
}

impl CommandResult {
    /// Returns true for [`CommandResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Transport to device agents.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceControlChannel: Send + Sync {
    /// Dispatches `command` to `agent`. The answer arrives on the returned
    /// receiver; a dropped sender means the command was lost.
    fn dispatch(&self, agent: &str, command: DeviceCommand) -> mpsc::Receiver<CommandResult>;
}

/// Sends commands and waits a bounded time for their answers.
#[derive(Clone, Copy)]
pub struct TimeoutChannel<'c> {
    channel: &'c dyn DeviceControlChannel,
    timeout: Duration,
}

impl std::fmt::Debug for TimeoutChannel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutChannel")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'c> TimeoutChannel<'c> {
    /// Wraps a channel with a per-command timeout.
    #[must_use]
    pub const fn new(channel: &'c dyn DeviceControlChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Sends `command` to `agent` and waits for the answer.
    #[must_use]
    pub fn perform(&self, agent: &str, command: DeviceCommand) -> CommandResult {
        let name = command.name();
        log::debug!("Sending {name} to {agent}");
        let receiver = self.channel.dispatch(agent, command);
        match receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                CommandResult::Failed(format!("{name} to {agent} timed out after {:?}", self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                CommandResult::Failed(format!("{name} to {agent} was dropped"))
            }
        }
    }
}

/// Returns a receiver already holding `result`.
#[must_use]
pub fn answered(result: CommandResult) -> mpsc::Receiver<CommandResult> {
    let (sender, receiver) = mpsc::channel();
    // The receiver is alive, so the send cannot fail.
    let _ = sender.send(result);
    receiver
}
