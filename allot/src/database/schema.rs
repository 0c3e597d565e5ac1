//! Database schema definitions and SQL constants.
//!
//! Instants are stored as Unix epoch milliseconds so that slot comparisons
//! can be done in SQL. Variant payloads (reservation, executable and service
//! kinds) are stored as JSON text.

/// Current schema version for the database.
///
/// This version is stored in the metadata table and is used to ensure
/// compatibility between the database and the application.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// SQL statement to create the metadata table.
pub const CREATE_METADATA_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )";

/// SQL statement to create the reservations table.
///
/// Reservations form trees through `parent_id`; deleting a reservation
/// deletes its whole subtree.
pub const CREATE_RESERVATIONS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS reservations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES reservations(id) ON DELETE CASCADE,
        slot_start INTEGER NOT NULL,
        slot_end INTEGER NOT NULL,
        kind TEXT NOT NULL,
        description TEXT,
        created_at INTEGER NOT NULL,
        CHECK (slot_start <= slot_end)
    )";

/// SQL statement to create the executables table.
///
/// Executables outlive their reservation so that a running executable can
/// still be stopped after its reservation was deleted.
pub const CREATE_EXECUTABLES_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS executables (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        reservation_id INTEGER REFERENCES reservations(id) ON DELETE SET NULL,
        kind TEXT NOT NULL,
        slot_start INTEGER NOT NULL,
        slot_end INTEGER NOT NULL,
        state TEXT NOT NULL DEFAULT 'NOT_STARTED',
        attempt_count INTEGER NOT NULL DEFAULT 0,
        next_attempt_at INTEGER,
        room_id TEXT,
        report TEXT
    )";

/// SQL statement to create the execution dependency table.
pub const CREATE_DEPENDENCIES_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS executable_dependencies (
        executable_id INTEGER NOT NULL REFERENCES executables(id) ON DELETE CASCADE,
        dependency_id INTEGER NOT NULL REFERENCES executables(id) ON DELETE CASCADE,
        PRIMARY KEY (executable_id, dependency_id)
    )";

/// SQL statement to create the migrations table.
///
/// An executable is the target of at most one migration.
pub const CREATE_MIGRATIONS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS migrations (
        source_id INTEGER NOT NULL REFERENCES executables(id) ON DELETE CASCADE,
        target_id INTEGER NOT NULL UNIQUE REFERENCES executables(id) ON DELETE CASCADE,
        PRIMARY KEY (source_id, target_id)
    )";

/// SQL statement to create the executable services table.
pub const CREATE_SERVICES_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS executable_services (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        executable_id INTEGER NOT NULL REFERENCES executables(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        slot_start INTEGER NOT NULL,
        slot_end INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 0,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        next_attempt_at INTEGER,
        recording_id TEXT,
        report TEXT
    )";

/// Indices supporting tree walks and the due-item queries.
pub const CREATE_INDICES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_reservations_parent ON reservations(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_executables_state ON executables(state, slot_start, slot_end)",
    "CREATE INDEX IF NOT EXISTS idx_executables_reservation ON executables(reservation_id)",
    "CREATE INDEX IF NOT EXISTS idx_services_executable ON executable_services(executable_id)",
];

/// SQL statement to select the schema version from the metadata table.
pub const SELECT_SCHEMA_VERSION: &str = "SELECT value FROM metadata WHERE key = 'schema_version'";

/// SQL statement to insert or update the schema version in the metadata table.
pub const INSERT_SCHEMA_VERSION: &str =
    "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)";

pub const INSERT_RESERVATION: &str = r"
    INSERT INTO reservations (parent_id, slot_start, slot_end, kind, description, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

pub const INSERT_EXECUTABLE: &str = r"
    INSERT INTO executables (reservation_id, kind, slot_start, slot_end)
    VALUES (?1, ?2, ?3, ?4)
";

pub const INSERT_DEPENDENCY: &str = r"
    INSERT OR IGNORE INTO executable_dependencies (executable_id, dependency_id)
    VALUES (?1, ?2)
";

pub const INSERT_MIGRATION: &str = "INSERT INTO migrations (source_id, target_id) VALUES (?1, ?2)";

pub const INSERT_SERVICE: &str = r"
    INSERT INTO executable_services (executable_id, kind, slot_start, slot_end)
    VALUES (?1, ?2, ?3, ?4)
";

/// Columns read by every reservation query, in row order.
pub const RESERVATION_COLUMNS: &str = r"
    r.id, r.parent_id, r.slot_start, r.slot_end, r.kind,
    (SELECT e.id FROM executables e WHERE e.reservation_id = r.id ORDER BY e.id LIMIT 1)
";

/// Columns read by every executable query, in row order.
pub const EXECUTABLE_COLUMNS: &str = r"
    id, kind, slot_start, slot_end, state, attempt_count, next_attempt_at, room_id, report
";

/// Columns read by every service query, in row order.
pub const SERVICE_COLUMNS: &str = r"
    id, executable_id, kind, slot_start, slot_end, active, attempt_count,
    next_attempt_at, recording_id, report
";

/// Ids of a reservation and all of its descendants.
pub const SELECT_SUBTREE_IDS: &str = r"
    WITH RECURSIVE subtree(id) AS (
        SELECT id FROM reservations WHERE id = ?1
        UNION ALL
        SELECT r.id FROM reservations r JOIN subtree s ON r.parent_id = s.id
    )
    SELECT id FROM subtree
";

/// Clamps the slot end of every executable created for a reservation of
/// the subtree to `?2`, never before its start. An executable left with an
/// empty slot is never started.
pub const TRUNCATE_SUBTREE_EXECUTABLES: &str = r"
    WITH RECURSIVE subtree(id) AS (
        SELECT id FROM reservations WHERE id = ?1
        UNION ALL
        SELECT r.id FROM reservations r JOIN subtree s ON r.parent_id = s.id
    )
    UPDATE executables
    SET slot_end = MAX(slot_start, MIN(slot_end, ?2))
    WHERE reservation_id IN (SELECT id FROM subtree)
";

pub const DELETE_RESERVATION: &str = "DELETE FROM reservations WHERE id = ?1";

pub const UPDATE_EXECUTABLE_STATE: &str = r"
    UPDATE executables
    SET state = ?2, attempt_count = ?3, next_attempt_at = ?4,
        room_id = COALESCE(?5, room_id), report = ?6
    WHERE id = ?1
";

pub const UPDATE_SERVICE_STATE: &str = r"
    UPDATE executable_services
    SET active = ?2, attempt_count = ?3, next_attempt_at = ?4, recording_id = ?5, report = ?6
    WHERE id = ?1
";
