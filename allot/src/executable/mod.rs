//! Executables, services and migrations.
//!
//! An executable is the runtime counterpart of a reservation: a virtual room
//! to create on a device, or a set of connections to dial. Executables move
//! through [`ExecutableState`] as the executor starts, updates and stops them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::resource::{Alias, ResourceId, Technology};
use crate::slot::Slot;

/// Database identifier of an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutableId(pub i64);

impl fmt::Display for ExecutableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exe:{}", self.0)
    }
}

/// Database identifier of an executable service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub i64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc:{}", self.0)
    }
}

/// Lifecycle state of an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableState {
    /// Never started.
    NotStarted,
    /// Start in progress.
    Starting,
    /// Running.
    Started,
    /// The last start attempt failed.
    StartingFailed,
    /// Stop in progress.
    Stopping,
    /// Stopped for good.
    Stopped,
    /// The last stop attempt failed.
    StoppingFailed,
    /// Running, but changed since it was started.
    Modified,
}

impl ExecutableState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::NotStarted,
        Self::Starting,
        Self::Started,
        Self::StartingFailed,
        Self::Stopping,
        Self::Stopped,
        Self::StoppingFailed,
        Self::Modified,
    ];

    /// Returns true when the executable exists on its device.
    #[must_use]
    pub const fn is_started(self) -> bool {
        matches!(self, Self::Started | Self::Modified | Self::StoppingFailed)
    }

    /// Returns the database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::StartingFailed => "STARTING_FAILED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::StoppingFailed => "STOPPING_FAILED",
            Self::Modified => "MODIFIED",
        }
    }
}

impl fmt::Display for ExecutableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutableState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Validation {
                field: "state".to_string(),
                message: format!("unknown executable state '{s}'"),
            })
    }
}

/// A virtual room hosted on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEndpoint {
    /// The hosting device.
    pub device: ResourceId,
    /// Agent controlling the device.
    pub agent: Option<String>,
    /// Room name announced to the device.
    pub name: String,
    /// Technologies the room must support.
    pub technologies: BTreeSet<Technology>,
    /// Licenses taken by the room.
    pub license_count: u32,
    /// Aliases of the room.
    pub aliases: Vec<Alias>,
}

/// A single call placed by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Label of the calling endpoint.
    pub from: String,
    /// Agent that places the call.
    pub agent: Option<String>,
    /// Alias being dialed.
    pub alias: Alias,
}

/// What an executable does when started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableKind {
    /// Create a room on a device.
    Room(RoomEndpoint),
    /// Use an already existing room.
    UsedRoom {
        /// The reused room executable.
        room: ExecutableId,
        /// Licenses the reuse adds.
        license_count: u32,
    },
    /// Connect endpoints together.
    Compartment {
        /// Calls to place.
        connections: Vec<Connection>,
    },
}

impl ExecutableKind {
    /// Returns a short name of the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Room(_) => "room",
            Self::UsedRoom { .. } => "used room",
            Self::Compartment { .. } => "compartment",
        }
    }
}

/// A persisted executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    /// Database identifier.
    pub id: ExecutableId,
    /// What the executable does.
    pub kind: ExecutableKind,
    /// When the executable should be running.
    pub slot: Slot,
    /// Current state.
    pub state: ExecutableState,
    /// Consecutive failed attempts in the current state.
    pub attempt_count: u32,
    /// Earliest time of the next attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Device-assigned room identifier once started.
    pub room_id: Option<String>,
    /// Executables that must run before this one.
    pub dependencies: Vec<ExecutableId>,
    /// Last failure report.
    pub report: Option<String>,
}

impl Executable {
    /// Returns the agent that receives device commands for the executable.
    #[must_use]
    pub fn agent(&self) -> Option<&str> {
        match &self.kind {
            ExecutableKind::Room(room) => room.agent.as_deref(),
            _ => None,
        }
    }
}

/// Reference to an executable from a fresh allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutableRef {
    /// Index into the allocation's new executables.
    New(usize),
    /// An already persisted executable.
    Stored(ExecutableId),
}

/// What a service does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceKind {
    /// Record the owning room.
    Recording {
        /// Recording device.
        device: ResourceId,
        /// Agent controlling the recording device.
        agent: Option<String>,
    },
}

/// A service attached to a fresh executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    /// What the service does.
    pub kind: ServiceKind,
    /// When the service should be active.
    pub slot: Slot,
}

/// An executable produced by the scheduler, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecutable {
    /// What the executable does.
    pub kind: ExecutableKind,
    /// When the executable should be running.
    pub slot: Slot,
    /// Executables that must run before this one.
    pub dependencies: Vec<ExecutableRef>,
    /// Services attached to the executable.
    pub services: Vec<NewService>,
}

impl NewExecutable {
    /// Creates an executable without dependencies or services.
    #[must_use]
    pub fn new(kind: ExecutableKind, slot: Slot) -> Self {
        Self {
            kind,
            slot,
            dependencies: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// A persisted service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableService {
    /// Database identifier.
    pub id: ServiceId,
    /// Owning executable.
    pub executable: ExecutableId,
    /// What the service does.
    pub kind: ServiceKind,
    /// When the service should be active.
    pub slot: Slot,
    /// Whether the service is currently active.
    pub active: bool,
    /// Consecutive failed attempts.
    pub attempt_count: u32,
    /// Earliest time of the next attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Device-assigned recording identifier while active.
    pub recording_id: Option<String>,
    /// Last failure report.
    pub report: Option<String>,
}

/// Handover of a running room to its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Migration {
    /// The running executable being replaced.
    pub source: ExecutableId,
    /// The replacement executable.
    pub target: ExecutableId,
}

/// A migration produced by the scheduler, not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewMigration {
    /// The running executable being replaced.
    pub source: ExecutableId,
    /// Index of the replacement among the allocation's new executables.
    pub target: usize,
}
