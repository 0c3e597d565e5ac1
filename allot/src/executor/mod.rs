//! The executor.
//!
//! Each tick loads what is due (executables to start, update or stop, and
//! services to activate or deactivate), builds an [`ExecutionPlan`] and
//! drains it batch by batch. Actions of one batch run on scoped threads and
//! talk to devices through the [`DeviceControlChannel`]. Every state
//! transition of the tick is written inside the tick's transaction.
//!
//! Ticks never overlap: [`Executor::execute`] holds a mutex for the whole
//! tick.

pub mod action;
pub mod device;
pub mod plan;
pub mod result;

#[cfg(test)]
mod plan_proptests;

use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::database::Database;
use crate::error::Result;
use crate::executable::{ExecutableId, ExecutableKind};

pub use action::{ActionKind, ActionOutcome, ExecutionAction, RoomHandle, RoomHandles};
pub use device::{CommandResult, DeviceCommand, DeviceControlChannel, TimeoutChannel};
pub use plan::{ActionId, ExecutionPlan};
pub use result::{ExecutableUpdate, ExecutionResult, ServiceUpdate};

/// Timing and retry settings of the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Pause between ticks.
    pub period: Duration,
    /// How early executables are started before their slot.
    pub start_lookahead: chrono::Duration,
    /// How long after their slot executables are stopped.
    pub stop_lookbehind: chrono::Duration,
    /// Delay before a failed action is retried.
    pub next_attempt: chrono::Duration,
    /// Failed attempts after which an item is no longer due.
    pub max_attempt_count: u32,
    /// How often a running batch is polled.
    pub batch_poll: Duration,
    /// How long a device command may take.
    pub command_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(5000),
            start_lookahead: chrono::Duration::seconds(30),
            stop_lookbehind: chrono::Duration::zero(),
            next_attempt: chrono::Duration::seconds(60),
            max_attempt_count: 5,
            batch_poll: Duration::from_millis(100),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives executables through their lifecycle.
pub struct Executor {
    channel: Arc<dyn DeviceControlChannel>,
    settings: ExecutorSettings,
    tick: Mutex<()>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor talking to devices through `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn DeviceControlChannel>, settings: ExecutorSettings) -> Self {
        Self {
            channel,
            settings,
            tick: Mutex::new(()),
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Runs one tick at `now`.
    ///
    /// Device failures are recorded in the result and retried in later
    /// ticks; they do not fail the tick.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DependencyCycle`] when the due executables
    /// depend on each other in a cycle, and database errors. Nothing is
    /// written in either case.
    pub fn execute(&self, db: &Database, now: DateTime<Utc>) -> Result<ExecutionResult> {
        let _tick = self.tick.lock();
        let transaction = db.begin_tick()?;

        let actions = self.collect_actions(db, now)?;
        if actions.is_empty() {
            transaction.commit()?;
            return Ok(ExecutionResult::default());
        }
        log::info!("Executor tick at {now}: {} action(s) due", actions.len());

        let mut rooms = Self::room_handles(db, &actions)?;
        let mut plan = ExecutionPlan::build(actions)?;
        let result = self.drain(&mut plan, &mut rooms, now);

        db.apply_execution_result(&result)?;
        transaction.commit()?;
        log::info!(
            "Executor tick done: {} started, {} stopped, {} failed, {} skipped",
            result.started().len(),
            result.stopped().len(),
            result.failed().len(),
            result.skipped.len()
        );
        Ok(result)
    }

    /// Runs ticks every period until `shutdown` receives a message or its
    /// sender is dropped.
    ///
    /// A failed tick is logged and rolled back; the next tick runs as
    /// usual. Returns the number of ticks that failed.
    pub fn run(&self, db: &Database, shutdown: &mpsc::Receiver<()>) -> usize {
        log::info!("Executor started with a period of {:?}", self.settings.period);
        let mut failed = 0;
        loop {
            if let Err(err) = self.execute(db, Utc::now()) {
                log::error!("Executor tick failed: {err}");
                failed += 1;
            }
            match shutdown.recv_timeout(self.settings.period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Executor stopped");
                    return failed;
                }
            }
        }
    }

    fn collect_actions(&self, db: &Database, now: DateTime<Utc>) -> Result<Vec<ExecutionAction>> {
        let settings = &self.settings;
        let max = settings.max_attempt_count;
        let starts = db.list_executables_for_start(now, settings.start_lookahead, max)?;
        let updates = db.list_executables_for_update(now, settings.start_lookahead, max)?;
        let stops = db.list_executables_for_stop(now, settings.stop_lookbehind, max)?;

        let starting: HashSet<ExecutableId> = starts.iter().map(|e| e.id).collect();
        let stopping: HashSet<ExecutableId> = stops.iter().map(|e| e.id).collect();
        let mut actions = Vec::new();

        let mut deactivations = db.list_services_for_deactivation(now, settings.stop_lookbehind, max)?;
        for executable in &stops {
            for service in db.list_services(executable.id)? {
                if service.active && deactivations.iter().all(|s| s.id != service.id) {
                    deactivations.push(service);
                }
            }
        }
        actions.extend(deactivations.into_iter().map(ExecutionAction::DeactivateService));

        for target in &starts {
            let Some(migration) = db.get_migration_for_target(target.id)? else {
                continue;
            };
            match db.get_executable(migration.source)? {
                Some(source) if source.state.is_started() => actions.push(ExecutionAction::Migration {
                    source,
                    target: target.clone(),
                }),
                _ => {}
            }
        }

        actions.extend(stops.into_iter().map(ExecutionAction::Stop));
        actions.extend(starts.into_iter().map(ExecutionAction::Start));
        actions.extend(updates.into_iter().map(ExecutionAction::Update));

        for service in db.list_services_for_activation(now, settings.start_lookahead, max)? {
            if stopping.contains(&service.executable) {
                continue;
            }
            let running = match db.get_executable(service.executable)? {
                Some(executable) => executable.state.is_started(),
                None => false,
            };
            if running || starting.contains(&service.executable) {
                actions.push(ExecutionAction::ActivateService(service));
            }
        }
        Ok(actions)
    }

    /// Loads the rooms already running that the actions refer to.
    fn room_handles(db: &Database, actions: &[ExecutionAction]) -> Result<RoomHandles> {
        let mut referenced = HashSet::new();
        for action in actions {
            match action {
                ExecutionAction::Start(e) | ExecutionAction::Stop(e) => {
                    if let ExecutableKind::UsedRoom { room, .. } = &e.kind {
                        referenced.insert(*room);
                    }
                }
                ExecutionAction::ActivateService(s) => {
                    referenced.insert(s.executable);
                }
                _ => {}
            }
        }

        let mut rooms = RoomHandles::new();
        for id in referenced {
            let Some(executable) = db.get_executable(id)? else {
                continue;
            };
            if let (ExecutableKind::Room(room), Some(room_id)) = (&executable.kind, executable.room_id.clone()) {
                rooms.insert(
                    id,
                    RoomHandle {
                        agent: room.agent.clone(),
                        room_id,
                    },
                );
            }
        }
        Ok(rooms)
    }

    fn drain(&self, plan: &mut ExecutionPlan, rooms: &mut RoomHandles, now: DateTime<Utc>) -> ExecutionResult {
        let channel = TimeoutChannel::new(self.channel.as_ref(), self.settings.command_timeout);
        let retry_at = now + self.settings.next_attempt;
        let mut result = ExecutionResult::default();

        loop {
            let batch = plan.pop_actions();
            if batch.is_empty() {
                break;
            }
            let outcomes = self.perform_batch(plan, &batch, &channel, rooms);

            for (id, outcome) in batch.into_iter().zip(outcomes) {
                let action = plan.action(id).clone();
                action.record(&outcome, retry_at, &mut result);
                if let Some((executable, handle)) = action.room_handle(&outcome) {
                    rooms.insert(executable, handle);
                }

                match (&action, &outcome) {
                    (ExecutionAction::Migration { source, target }, ActionOutcome::Succeeded { .. }) => {
                        log::info!("Migrated {} to {}", source.id, target.id);
                        let superseded = plan
                            .pending(ActionKind::Start, target.id)
                            .into_iter()
                            .chain(plan.pending(ActionKind::Stop, source.id));
                        for handled in superseded.collect::<Vec<_>>() {
                            plan.remove_action(handled);
                        }
                        plan.remove_action(id);
                    }
                    (ExecutionAction::Migration { .. }, ActionOutcome::Failed(reason)) => {
                        log::warn!("{action} failed, falling back to stop and start: {reason}");
                        plan.remove_action(id);
                    }
                    (_, ActionOutcome::Succeeded { .. }) => {
                        log::debug!("{action} succeeded");
                        plan.remove_action(id);
                    }
                    (_, ActionOutcome::Failed(reason)) => {
                        log::warn!("{action} failed: {reason}");
                        for skipped in plan.remove_with_dependents(id) {
                            let skipped = plan.action(skipped).to_string();
                            log::warn!("Skipping {skipped}: {action} failed");
                            result.skipped.push(skipped);
                        }
                    }
                }
            }
        }
        result
    }

    /// Performs one batch concurrently, returning outcomes in batch order.
    fn perform_batch(
        &self,
        plan: &ExecutionPlan,
        batch: &[ActionId],
        channel: &TimeoutChannel<'_>,
        rooms: &RoomHandles,
    ) -> Vec<ActionOutcome> {
        let (sender, receiver) = mpsc::channel();
        let mut outcomes: Vec<Option<ActionOutcome>> = vec![None; batch.len()];

        thread::scope(|scope| {
            for (position, id) in batch.iter().enumerate() {
                let sender = sender.clone();
                let action = plan.action(*id);
                scope.spawn(move || {
                    let outcome = action.perform(channel, rooms);
                    // The receiver outlives the scope.
                    let _ = sender.send((position, outcome));
                });
            }
            drop(sender);

            let mut pending = batch.len();
            while pending > 0 {
                match receiver.recv_timeout(self.settings.batch_poll) {
                    Ok((position, outcome)) => {
                        outcomes[position] = Some(outcome);
                        pending -= 1;
                    }
                    Err(RecvTimeoutError::Timeout) => log::debug!("Waiting for {pending} action(s)"),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| ActionOutcome::Failed("action ended without an outcome".to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_util::{create_test_database, slot};
    use crate::database::StoredAllocation;
    use crate::executable::{ExecutableRef, ExecutableState, NewExecutable, NewMigration, RoomEndpoint};
    use crate::executor::device::{answered, MockDeviceControlChannel};
    use crate::reservation::{ReservationKind, ReservationTree};
    use crate::resource::ResourceId;
    use crate::scheduler::Allocation;
    use crate::slot::Slot;
    use std::collections::BTreeSet;

    fn day() -> Slot {
        slot("2012-01-01T00:00:00Z/2012-01-02T00:00:00Z")
    }

    fn room() -> ExecutableKind {
        ExecutableKind::Room(RoomEndpoint {
            device: ResourceId::new(1),
            agent: Some("mcu".to_string()),
            name: "weekly".to_string(),
            technologies: BTreeSet::new(),
            license_count: 5,
            aliases: vec![],
        })
    }

    fn store(db: &mut Database, executables: Vec<NewExecutable>, migrations: Vec<NewMigration>) -> StoredAllocation {
        let mut reservations = ReservationTree::new();
        let root = reservations.add(day(), ReservationKind::Compartment);
        for index in 0..executables.len() {
            let node = reservations.add(day(), ReservationKind::Compartment);
            reservations.add_child(root, node).unwrap();
            reservations.set_executable(node, index).unwrap();
        }
        let allocation = Allocation {
            root,
            reservations,
            executables,
            migrations,
        };
        db.store_allocation(&allocation, None).unwrap()
    }

    fn executor(channel: MockDeviceControlChannel) -> Executor {
        let settings = ExecutorSettings {
            batch_poll: Duration::from_millis(5),
            command_timeout: Duration::from_millis(200),
            ..ExecutorSettings::default()
        };
        Executor::new(Arc::new(channel), settings)
    }

    fn state(db: &Database, id: ExecutableId) -> (ExecutableState, u32) {
        let executable = db.get_executable(id).unwrap().unwrap();
        (executable.state, executable.attempt_count)
    }

    #[test]
    fn test_default_settings() {
        let settings = ExecutorSettings::default();
        assert_eq!(settings.max_attempt_count, 5);
        assert_eq!(settings.start_lookahead, chrono::Duration::seconds(30));
        assert_eq!(settings.period, Duration::from_secs(5));
    }

    #[test]
    fn test_idle_tick() {
        let db = create_test_database();
        let result = executor(MockDeviceControlChannel::new()).execute(&db, day().start()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_reused_room_starts_after_room() {
        let mut db = create_test_database();
        let room_id = store(&mut db, vec![NewExecutable::new(room(), day())], vec![]).executables[0];
        let mut used = NewExecutable::new(
            ExecutableKind::UsedRoom {
                room: room_id,
                license_count: 2,
            },
            day(),
        );
        used.dependencies.push(ExecutableRef::Stored(room_id));
        let used_id = store(&mut db, vec![used], vec![]).executables[0];

        let mut channel = MockDeviceControlChannel::new();
        channel.expect_dispatch().times(2).returning(|_, command| match command {
            DeviceCommand::CreateRoom { .. } => answered(CommandResult::Success(Some("r1".to_string()))),
            DeviceCommand::ModifyRoomLicenses { room_id, delta: 2 } if room_id == "r1" => {
                answered(CommandResult::Success(None))
            }
            other => answered(CommandResult::Failed(format!("unexpected {}", other.name()))),
        });

        let result = executor(channel).execute(&db, day().start()).unwrap();
        assert_eq!(result.started(), vec![room_id, used_id]);
        assert_eq!(state(&db, room_id), (ExecutableState::Started, 0));
        assert_eq!(state(&db, used_id), (ExecutableState::Started, 0));
        assert_eq!(db.get_executable(room_id).unwrap().unwrap().room_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_failed_room_skips_dependents() {
        let mut db = create_test_database();
        let room_id = store(&mut db, vec![NewExecutable::new(room(), day())], vec![]).executables[0];
        let mut used = NewExecutable::new(
            ExecutableKind::UsedRoom {
                room: room_id,
                license_count: 2,
            },
            day(),
        );
        used.dependencies.push(ExecutableRef::Stored(room_id));
        let used_id = store(&mut db, vec![used], vec![]).executables[0];

        let mut channel = MockDeviceControlChannel::new();
        channel
            .expect_dispatch()
            .times(1)
            .returning(|_, _| answered(CommandResult::Failed("no licenses".to_string())));

        let now = day().start();
        let result = executor(channel).execute(&db, now).unwrap();
        assert_eq!(result.failed(), vec![room_id]);
        assert_eq!(result.skipped.len(), 1);
        assert!(result.skipped[0].contains(&used_id.to_string()));

        assert_eq!(state(&db, room_id), (ExecutableState::StartingFailed, 1));
        assert_eq!(state(&db, used_id), (ExecutableState::NotStarted, 0));
        let stored = db.get_executable(room_id).unwrap().unwrap();
        assert_eq!(stored.next_attempt_at, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_cycle_aborts_tick() {
        let mut db = create_test_database();
        let mut first = NewExecutable::new(ExecutableKind::Compartment { connections: vec![] }, day());
        first.dependencies.push(ExecutableRef::New(1));
        let mut second = NewExecutable::new(ExecutableKind::Compartment { connections: vec![] }, day());
        second.dependencies.push(ExecutableRef::New(0));
        let stored = store(&mut db, vec![first, second], vec![]);

        let err = executor(MockDeviceControlChannel::new())
            .execute(&db, day().start())
            .unwrap_err();
        assert!(matches!(err, crate::Error::DependencyCycle { .. }));
        for id in stored.executables {
            assert_eq!(state(&db, id), (ExecutableState::NotStarted, 0));
        }
    }

    #[test]
    fn test_migration_hands_room_over() {
        let mut db = create_test_database();
        let source = store(&mut db, vec![NewExecutable::new(room(), day())], vec![]);
        let source_id = source.executables[0];
        db.apply_execution_result(&ExecutionResult {
            executables: vec![ExecutableUpdate {
                id: source_id,
                state: ExecutableState::Started,
                attempt_count: 0,
                next_attempt_at: None,
                room_id: Some("r7".to_string()),
                report: None,
            }],
            ..ExecutionResult::default()
        })
        .unwrap();

        let now = day().start() + chrono::Duration::hours(1);
        db.delete_reservation(source.root, now).unwrap();
        let target_id = store(
            &mut db,
            vec![NewExecutable::new(room(), day())],
            vec![NewMigration {
                source: source_id,
                target: 0,
            }],
        )
        .executables[0];

        let mut channel = MockDeviceControlChannel::new();
        channel
            .expect_dispatch()
            .times(1)
            .withf(|_, command| matches!(command, DeviceCommand::ModifyRoom { room_id, .. } if room_id == "r7"))
            .returning(|_, _| answered(CommandResult::Success(None)));

        let result = executor(channel).execute(&db, now).unwrap();
        assert_eq!(result.started(), vec![target_id]);
        assert_eq!(result.stopped(), vec![source_id]);
        assert_eq!(state(&db, source_id).0, ExecutableState::Stopped);
        let target = db.get_executable(target_id).unwrap().unwrap();
        assert_eq!(target.state, ExecutableState::Started);
        assert_eq!(target.room_id.as_deref(), Some("r7"));
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let db = create_test_database();
        let executor = executor(MockDeviceControlChannel::new());
        let (sender, receiver) = mpsc::channel();
        sender.send(()).unwrap();
        assert_eq!(executor.run(&db, &receiver), 0);
    }

    #[test]
    fn test_run_counts_failed_ticks() {
        let mut db = create_test_database();
        let now = Utc::now();
        let current = Slot::new(now - chrono::Duration::hours(1), now + chrono::Duration::hours(1)).unwrap();
        let mut first = NewExecutable::new(ExecutableKind::Compartment { connections: vec![] }, current);
        first.dependencies.push(ExecutableRef::New(1));
        let mut second = NewExecutable::new(ExecutableKind::Compartment { connections: vec![] }, current);
        second.dependencies.push(ExecutableRef::New(0));
        store(&mut db, vec![first, second], vec![]);

        let executor = executor(MockDeviceControlChannel::new());
        let (sender, receiver) = mpsc::channel();
        sender.send(()).unwrap();
        assert_eq!(executor.run(&db, &receiver), 1);
    }
}
