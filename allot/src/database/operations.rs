//! Queries and single-statement updates.
//!
//! Every query reads through the database connection, so when the executor
//! has a tick transaction open they all see (and write) the state of that
//! transaction.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Params, Row};

use crate::error::{Error, Result};
use crate::executable::{
    Executable, ExecutableId, ExecutableKind, ExecutableService, ExecutableState, Migration, ServiceId,
    ServiceKind,
};
use crate::executor::ExecutionResult;
use crate::reservation::{ReservationId, ReservationKind, StoredReservation};
use crate::resource::ResourceCatalog;
use crate::slot::Slot;

use super::connection::Database;
use super::schema::{
    EXECUTABLE_COLUMNS, RESERVATION_COLUMNS, SERVICE_COLUMNS, UPDATE_EXECUTABLE_STATE, UPDATE_SERVICE_STATE,
};

/// Converts an instant to Unix epoch milliseconds for database storage.
pub(super) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Converts Unix epoch milliseconds from the database to an instant.
pub(super) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| Error::Validation {
        field: "timestamp".into(),
        message: format!("instant {millis} is out of range"),
    })
}

fn slot_from_millis(start: i64, end: i64) -> Result<Slot> {
    Ok(Slot::new(from_millis(start)?, from_millis(end)?)?)
}

fn optional_instant(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

/// Raw reservation row; decoded outside of the row callback so that payload
/// errors surface as [`Error`] values.
struct ReservationRow {
    id: i64,
    parent_id: Option<i64>,
    slot_start: i64,
    slot_end: i64,
    kind: String,
    executable: Option<i64>,
}

impl ReservationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            slot_start: row.get(2)?,
            slot_end: row.get(3)?,
            kind: row.get(4)?,
            executable: row.get(5)?,
        })
    }

    fn decode(self) -> Result<StoredReservation> {
        let kind: ReservationKind = serde_json::from_str(&self.kind)?;
        Ok(StoredReservation {
            id: ReservationId(self.id),
            parent: self.parent_id.map(ReservationId),
            slot: slot_from_millis(self.slot_start, self.slot_end)?,
            kind,
            executable: self.executable.map(ExecutableId),
        })
    }
}

struct ExecutableRow {
    id: i64,
    kind: String,
    slot_start: i64,
    slot_end: i64,
    state: String,
    attempt_count: u32,
    next_attempt_at: Option<i64>,
    room_id: Option<String>,
    report: Option<String>,
}

impl ExecutableRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            slot_start: row.get(2)?,
            slot_end: row.get(3)?,
            state: row.get(4)?,
            attempt_count: row.get(5)?,
            next_attempt_at: row.get(6)?,
            room_id: row.get(7)?,
            report: row.get(8)?,
        })
    }

    fn decode(self, dependencies: Vec<ExecutableId>) -> Result<Executable> {
        let kind: ExecutableKind = serde_json::from_str(&self.kind)?;
        Ok(Executable {
            id: ExecutableId(self.id),
            kind,
            slot: slot_from_millis(self.slot_start, self.slot_end)?,
            state: self.state.parse::<ExecutableState>()?,
            attempt_count: self.attempt_count,
            next_attempt_at: optional_instant(self.next_attempt_at)?,
            room_id: self.room_id,
            dependencies,
            report: self.report,
        })
    }
}

struct ServiceRow {
    id: i64,
    executable: i64,
    kind: String,
    slot_start: i64,
    slot_end: i64,
    active: bool,
    attempt_count: u32,
    next_attempt_at: Option<i64>,
    recording_id: Option<String>,
    report: Option<String>,
}

impl ServiceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            executable: row.get(1)?,
            kind: row.get(2)?,
            slot_start: row.get(3)?,
            slot_end: row.get(4)?,
            active: row.get(5)?,
            attempt_count: row.get(6)?,
            next_attempt_at: row.get(7)?,
            recording_id: row.get(8)?,
            report: row.get(9)?,
        })
    }

    fn decode(self) -> Result<ExecutableService> {
        let kind: ServiceKind = serde_json::from_str(&self.kind)?;
        Ok(ExecutableService {
            id: ServiceId(self.id),
            executable: ExecutableId(self.executable),
            kind,
            slot: slot_from_millis(self.slot_start, self.slot_end)?,
            active: self.active,
            attempt_count: self.attempt_count,
            next_attempt_at: optional_instant(self.next_attempt_at)?,
            recording_id: self.recording_id,
            report: self.report,
        })
    }
}

impl Database {
    fn query_reservations(&self, sql: &str, params: impl Params) -> Result<Vec<StoredReservation>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ReservationRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ReservationRow::decode).collect()
    }

    fn query_executables(&self, sql: &str, params: impl Params) -> Result<Vec<Executable>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ExecutableRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| {
                let dependencies = self.executable_dependencies(ExecutableId(row.id))?;
                row.decode(dependencies)
            })
            .collect()
    }

    fn query_services(&self, sql: &str, params: impl Params) -> Result<Vec<ExecutableService>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ServiceRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ServiceRow::decode).collect()
    }

    fn executable_dependencies(&self, id: ExecutableId) -> Result<Vec<ExecutableId>> {
        let mut stmt = self.conn.prepare(
            "SELECT dependency_id FROM executable_dependencies WHERE executable_id = ?1 ORDER BY dependency_id",
        )?;
        let ids = stmt
            .query_map(params![id.0], |row| row.get(0).map(ExecutableId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Gets a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored payload is invalid.
    pub fn get_reservation(&self, id: ReservationId) -> Result<Option<StoredReservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations r WHERE r.id = ?1");
        self.conn
            .query_row(&sql, params![id.0], ReservationRow::read)
            .optional()?
            .map(ReservationRow::decode)
            .transpose()
    }

    /// Lists the direct children of a reservation.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_child_reservations(&self, id: ReservationId) -> Result<Vec<StoredReservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations r WHERE r.parent_id = ?1 ORDER BY r.id");
        self.query_reservations(&sql, params![id.0])
    }

    /// Lists a reservation and all of its descendants, parents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_reservation_tree(&self, root: ReservationId) -> Result<Vec<StoredReservation>> {
        let sql = format!(
            "WITH RECURSIVE subtree(id, depth) AS (
                 SELECT id, 0 FROM reservations WHERE id = ?1
                 UNION ALL
                 SELECT r.id, s.depth + 1 FROM reservations r JOIN subtree s ON r.parent_id = s.id
             )
             SELECT {RESERVATION_COLUMNS} FROM reservations r JOIN subtree t ON r.id = t.id
             ORDER BY t.depth, r.id"
        );
        self.query_reservations(&sql, params![root.0])
    }

    /// Lists every reservation without a parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_root_reservations(&self) -> Result<Vec<StoredReservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations r WHERE r.parent_id IS NULL ORDER BY r.id");
        self.query_reservations(&sql, [])
    }

    /// Re-registers the bookings of every persisted reservation tree in
    /// `catalog`, owned by the tree's root. Returns the number of trees.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails or a stored payload is invalid.
    pub fn restore_catalog(&self, catalog: &mut ResourceCatalog) -> Result<usize> {
        let roots = self.list_root_reservations()?;
        for root in &roots {
            let tree = self.list_reservation_tree(root.id)?;
            catalog.restore(root.id, &tree);
        }
        log::debug!("Restored bookings of {} reservation trees", roots.len());
        Ok(roots.len())
    }

    /// Gets an executable by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored payload is invalid.
    pub fn get_executable(&self, id: ExecutableId) -> Result<Option<Executable>> {
        let sql = format!("SELECT {EXECUTABLE_COLUMNS} FROM executables WHERE id = ?1");
        Ok(self.query_executables(&sql, params![id.0])?.into_iter().next())
    }

    /// Lists executables due for start: never started, or failed to start
    /// with attempts left, and whose slot (widened by `window` at its start)
    /// contains `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_executables_for_start(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        max_attempt_count: u32,
    ) -> Result<Vec<Executable>> {
        let sql = format!(
            "SELECT {EXECUTABLE_COLUMNS} FROM executables
             WHERE (state = 'NOT_STARTED'
                    OR (state = 'STARTING_FAILED' AND attempt_count < ?3
                        AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)))
               AND slot_start <= ?2 AND slot_end > ?1 AND slot_end > slot_start
             ORDER BY slot_start, id"
        );
        self.query_executables(&sql, params![to_millis(now), to_millis(now + window), max_attempt_count])
    }

    /// Lists running executables that were modified and still have update
    /// attempts left.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_executables_for_update(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        max_attempt_count: u32,
    ) -> Result<Vec<Executable>> {
        let sql = format!(
            "SELECT {EXECUTABLE_COLUMNS} FROM executables
             WHERE state = 'MODIFIED' AND attempt_count < ?3
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
               AND slot_start <= ?2 AND slot_end > ?1
             ORDER BY slot_start, id"
        );
        self.query_executables(&sql, params![to_millis(now), to_millis(now + window), max_attempt_count])
    }

    /// Lists running executables whose slot ended at least `window` ago,
    /// plus failed stops with attempts left.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_executables_for_stop(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        max_attempt_count: u32,
    ) -> Result<Vec<Executable>> {
        let sql = format!(
            "SELECT {EXECUTABLE_COLUMNS} FROM executables
             WHERE (state IN ('STARTED', 'MODIFIED')
                    OR (state = 'STOPPING_FAILED' AND attempt_count < ?3
                        AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)))
               AND slot_end <= ?2
             ORDER BY slot_end, id"
        );
        self.query_executables(&sql, params![to_millis(now), to_millis(now - window), max_attempt_count])
    }

    /// Gets a service by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored payload is invalid.
    pub fn get_service(&self, id: ServiceId) -> Result<Option<ExecutableService>> {
        let sql = format!("SELECT {SERVICE_COLUMNS} FROM executable_services WHERE id = ?1");
        Ok(self.query_services(&sql, params![id.0])?.into_iter().next())
    }

    /// Lists the services of an executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_services(&self, executable: ExecutableId) -> Result<Vec<ExecutableService>> {
        let sql = format!("SELECT {SERVICE_COLUMNS} FROM executable_services WHERE executable_id = ?1 ORDER BY id");
        self.query_services(&sql, params![executable.0])
    }

    /// Lists inactive services whose slot (widened by `window` at its
    /// start) contains `now` and that have attempts left.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_services_for_activation(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        max_attempt_count: u32,
    ) -> Result<Vec<ExecutableService>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM executable_services
             WHERE active = 0 AND attempt_count < ?3
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
               AND slot_start <= ?2 AND slot_end > ?1
             ORDER BY slot_start, id"
        );
        self.query_services(&sql, params![to_millis(now), to_millis(now + window), max_attempt_count])
    }

    /// Lists active services whose slot ended at least `window` ago and
    /// that have attempts left.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is invalid.
    pub fn list_services_for_deactivation(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        max_attempt_count: u32,
    ) -> Result<Vec<ExecutableService>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM executable_services
             WHERE active = 1 AND attempt_count < ?3
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
               AND slot_end <= ?2
             ORDER BY slot_end, id"
        );
        self.query_services(&sql, params![to_millis(now), to_millis(now - window), max_attempt_count])
    }

    /// Gets the migration whose target is `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_migration_for_target(&self, target: ExecutableId) -> Result<Option<Migration>> {
        let migration = self
            .conn
            .query_row(
                "SELECT source_id, target_id FROM migrations WHERE target_id = ?1",
                params![target.0],
                |row| {
                    Ok(Migration {
                        source: ExecutableId(row.get(0)?),
                        target: ExecutableId(row.get(1)?),
                    })
                },
            )
            .optional()?;
        Ok(migration)
    }

    /// Replaces the kind of an executable. A running executable becomes
    /// [`ExecutableState::Modified`] so the executor updates it; returns
    /// whether that happened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown executable, or a database
    /// error.
    pub fn mark_modified(&self, id: ExecutableId, kind: &ExecutableKind) -> Result<bool> {
        let kind = serde_json::to_string(kind)?;
        let changed = self
            .conn
            .execute("UPDATE executables SET kind = ?2 WHERE id = ?1", params![id.0, kind])?;
        if changed == 0 {
            return Err(Error::NotFound {
                resource: id.to_string(),
            });
        }
        let modified = self.conn.execute(
            "UPDATE executables
             SET state = 'MODIFIED', attempt_count = 0, next_attempt_at = NULL, report = NULL
             WHERE id = ?1 AND state = 'STARTED'",
            params![id.0],
        )?;
        Ok(modified == 1)
    }

    /// Writes every state transition of one executor tick.
    ///
    /// Called inside the tick transaction; nothing is committed here.
    ///
    /// # Errors
    ///
    /// Returns an error if an update fails.
    pub fn apply_execution_result(&self, result: &ExecutionResult) -> Result<()> {
        let mut update = self.conn.prepare_cached(UPDATE_EXECUTABLE_STATE)?;
        for executable in &result.executables {
            update.execute(params![
                executable.id.0,
                executable.state.as_str(),
                executable.attempt_count,
                executable.next_attempt_at.map(to_millis),
                executable.room_id,
                executable.report,
            ])?;
        }

        let mut update = self.conn.prepare_cached(UPDATE_SERVICE_STATE)?;
        for service in &result.services {
            update.execute(params![
                service.id.0,
                service.active,
                service.attempt_count,
                service.next_attempt_at.map(to_millis),
                service.recording_id,
                service.report,
            ])?;
        }
        log::debug!(
            "Applied {} executable and {} service transitions",
            result.executables.len(),
            result.services.len()
        );
        Ok(())
    }
}
