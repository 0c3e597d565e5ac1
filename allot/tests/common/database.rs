//! Shared database test utilities.

use allot::database::{Database, DatabaseConfig, StoredAllocation};
use allot::{Allocation, AllocationState, ReservationRequest, ResourceCatalog, Scheduler, SchedulerSettings};

/// Creates a temporary test database that will be cleaned up when dropped.
///
/// The temporary directory is leaked for the lifetime of the test process.
#[allow(dead_code)]
pub fn create_test_database() -> Database {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let config = DatabaseConfig::new(path);
    let db = Database::open(config).unwrap();

    // Prevent the TempDir from being dropped immediately
    std::mem::forget(dir);

    db
}

/// Allocates `request` and panics with the scheduler report on failure.
#[allow(dead_code)]
pub fn allocate(catalog: &ResourceCatalog, request: &ReservationRequest) -> Allocation {
    match Scheduler::new(catalog, SchedulerSettings::default())
        .process(request)
        .unwrap()
    {
        AllocationState::Allocated(allocation) => allocation,
        AllocationState::Failed { report } => panic!("allocation failed:\n{report}"),
    }
}

/// Allocates `request`, stores the result and commits its bookings to
/// `catalog`.
#[allow(dead_code)]
pub fn allocate_and_store(
    db: &mut Database,
    catalog: &mut ResourceCatalog,
    request: &ReservationRequest,
) -> StoredAllocation {
    let allocation = allocate(catalog, request);
    let stored = db.store_allocation(&allocation, request.description.as_deref()).unwrap();
    catalog.commit(stored.root, &allocation);
    stored
}
