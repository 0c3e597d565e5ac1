//! Database layer for persistent storage of reservations and executables.
//!
//! A `SQLite` database holds the reservation trees produced by the
//! scheduler and the executables, dependencies, migrations and services the
//! executor drives. The executor's due-item queries are consistent within
//! the transaction opened by [`Database::begin_tick`].
//!
//! # Examples
//!
//! ```no_run
//! use allot::database::{Database, DatabaseConfig};
//! use allot::executable::ExecutableId;
//!
//! let db = Database::open(DatabaseConfig::new("/tmp/allot.db")).unwrap();
//! let executable = db.get_executable(ExecutableId(1)).unwrap();
//! println!("{executable:?}");
//! ```

mod config;
mod connection;
pub mod migrations;
mod operations;
mod schema;
#[cfg(test)]
pub(crate) mod test_util;
mod transaction;

// Re-export public API
pub use config::{default_data_dir, resolve_database_path, DatabaseConfig, DATABASE_FILE, DATA_DIR_ENV};
pub use connection::Database;
pub use transaction::StoredAllocation;

// Re-export migration functions for advanced use cases
pub use migrations::{check_schema_compatibility, get_schema_version, initialize_schema};
