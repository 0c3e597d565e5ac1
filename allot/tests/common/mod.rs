//! Common test utilities for integration tests.
//!
//! This module provides the resource catalog fixture, temporary databases and
//! a device channel that answers every command and remembers what it was
//! asked to do.

pub mod database;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use allot::executor::device::answered;
use allot::executor::{CommandResult, DeviceCommand, DeviceControlChannel, Executor, ExecutorSettings};
use allot::{ResourceCatalog, Slot};

/// Catalog with one MCU (H.323 and SIP rooms, E.164 and SIP aliases), a
/// recorder, and two H.323 terminals of which only the first has an agent.
#[allow(dead_code)]
pub const CATALOG_YAML: &str = r"
value_providers:
  - type: pattern
    patterns: ['{digit:2}']
resources:
  - id: 1
    name: mcu
    agent: mcu
    technologies: [H323, SIP]
    capabilities:
      - room_provider:
          license_count: 10
      - alias_provider:
          value_provider: 0
          restricted_to_resource: true
          aliases:
            - {type: H323_E164, value: '95{value}'}
            - {type: SIP_URI, value: '95{value}@example.org'}
  - id: 2
    name: recorder
    agent: rec
    technologies: [H323, SIP]
    capabilities:
      - recording: {}
  - id: 3
    name: boardroom
    agent: boardroom
    technologies: [H323]
    capabilities:
      - standalone_terminal:
          aliases: [{type: H323_E164, value: '420100'}]
  - id: 4
    name: huddle
    technologies: [H323]
    capabilities:
      - standalone_terminal:
          aliases: [{type: H323_E164, value: '420200'}]
";

/// Parses [`CATALOG_YAML`].
///
/// # Panics
///
/// Panics if the fixture does not parse.
#[allow(dead_code)]
pub fn catalog() -> ResourceCatalog {
    ResourceCatalog::from_yaml_str(CATALOG_YAML).unwrap()
}

/// Parses a `START/END` slot.
#[allow(dead_code)]
pub fn slot(text: &str) -> Slot {
    text.parse().unwrap()
}

/// Parses an RFC 3339 timestamp.
#[allow(dead_code)]
pub fn at(text: &str) -> DateTime<Utc> {
    text.parse().unwrap()
}

/// The meeting slot most tests book: 2012-01-01 from 12:00 to 14:00 UTC.
#[allow(dead_code)]
pub fn meeting() -> Slot {
    slot("2012-01-01T12:00:00Z/2012-01-01T14:00:00Z")
}

/// Device channel that records every command and answers it right away.
///
/// Room creation answers with `room-N` and recordings with `rec-N`.
/// Commands whose name is listed in `failing` are answered with a failure.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RecordingChannel {
    commands: Mutex<Vec<(String, DeviceCommand)>>,
    failing: Mutex<Vec<&'static str>>,
    counter: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingChannel {
    /// Creates a channel that answers every command with success.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every command named `name` fail from now on.
    pub fn fail(&self, name: &'static str) {
        self.failing.lock().push(name);
    }

    /// Lets every command succeed again.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    /// Returns and forgets the commands received so far.
    pub fn take(&self) -> Vec<(String, DeviceCommand)> {
        std::mem::take(&mut *self.commands.lock())
    }

    /// Returns and forgets the names of the commands received so far.
    pub fn take_names(&self) -> Vec<&'static str> {
        self.take().iter().map(|(_, command)| command.name()).collect()
    }
}

impl DeviceControlChannel for RecordingChannel {
    fn dispatch(&self, agent: &str, command: DeviceCommand) -> mpsc::Receiver<CommandResult> {
        let name = command.name();
        self.commands.lock().push((agent.to_string(), command.clone()));
        if self.failing.lock().contains(&name) {
            return answered(CommandResult::Failed(format!("{name} refused by {agent}")));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let identifier = match command {
            DeviceCommand::CreateRoom { .. } => Some(format!("room-{n}")),
            DeviceCommand::StartRecording { .. } => Some(format!("rec-{n}")),
            _ => None,
        };
        answered(CommandResult::Success(identifier))
    }
}

/// Creates an executor over `channel` with short retry settings.
#[allow(dead_code)]
pub fn executor(channel: &Arc<RecordingChannel>) -> Executor {
    let settings = ExecutorSettings {
        max_attempt_count: 2,
        ..ExecutorSettings::default()
    };
    Executor::new(channel.clone(), settings)
}
