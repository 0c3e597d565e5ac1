//! Shared test utilities for database unit tests.

use rusqlite::params;
use tempfile::tempdir;

use crate::database::{Database, DatabaseConfig};
use crate::executable::{ExecutableId, ExecutableKind, ExecutableState, NewExecutable};
use crate::reservation::{ReservationKind, ReservationTree};
use crate::scheduler::Allocation;
use crate::slot::Slot;

/// Creates a temporary test database that will be cleaned up automatically.
///
/// # Panics
///
/// Panics if the temporary directory or database cannot be created.
#[must_use]
pub fn create_test_database() -> Database {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let db = Database::open(DatabaseConfig::new(path)).unwrap();

    // Prevent the TempDir from being dropped immediately
    std::mem::forget(dir);

    db
}

/// Parses a `START/END` slot.
///
/// # Panics
///
/// Panics if the slot text is invalid.
#[must_use]
pub fn slot(text: &str) -> Slot {
    text.parse().unwrap()
}

/// Stores a compartment reservation with an empty compartment executable
/// and returns the executable id.
///
/// # Panics
///
/// Panics if the allocation cannot be stored.
pub fn store_compartment(db: &mut Database, slot: Slot) -> ExecutableId {
    let mut reservations = ReservationTree::new();
    let root = reservations.add(slot, ReservationKind::Compartment);
    reservations.set_executable(root, 0).unwrap();
    let allocation = Allocation {
        root,
        reservations,
        executables: vec![NewExecutable::new(
            ExecutableKind::Compartment { connections: vec![] },
            slot,
        )],
        migrations: vec![],
    };
    db.store_allocation(&allocation, None).unwrap().executables[0]
}

/// Forces the state and attempt counter of an executable.
///
/// # Panics
///
/// Panics if the update fails.
pub fn set_state(db: &Database, id: ExecutableId, state: ExecutableState, attempt_count: u32) {
    db.connection()
        .execute(
            "UPDATE executables SET state = ?2, attempt_count = ?3 WHERE id = ?1",
            params![id.0, state.as_str(), attempt_count],
        )
        .unwrap();
}
