//! Error types for the allot library.
//!
//! This module provides the error hierarchy shared by the scheduler and the
//! executor, using `thiserror` for ergonomic error handling.
//!
//! Errors fall into two families. Recoverable errors (see
//! [`Error::is_recoverable`]) describe a candidate that could not be used and
//! make the scheduler move on to the next one. Everything else aborts the
//! current scheduler run or executor tick.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::executable::ExecutableId;
use crate::resource::ResourceId;
use crate::scheduler::report::SchedulerReport;
use crate::value::ValueProviderId;

/// Result type alias for operations that may fail with an allot error.
///
/// # Examples
///
/// ```
/// use allot::{Error, Result};
///
/// fn example_operation() -> Result<u32> {
///     Ok(100)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the allot library.
#[derive(Debug, Error)]
pub enum Error {
    /// A slot whose start lies after its end was provided.
    #[error("invalid slot {start}/{end}: {reason}")]
    InvalidSlot {
        /// Start of the rejected slot.
        start: DateTime<Utc>,
        /// End of the rejected slot.
        end: DateTime<Utc>,
        /// The reason the slot is invalid.
        reason: String,
    },

    /// A value pattern could not be parsed.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern source text.
        pattern: String,
        /// The reason the pattern is invalid.
        reason: String,
    },

    /// A specifically requested value cannot be allocated.
    #[error("value '{value}' is not available: {reason}")]
    ValueNotAvailable {
        /// The requested value.
        value: String,
        /// Why the value cannot be used.
        reason: ValueUnavailableReason,
    },

    /// Every candidate value of a provider is already taken.
    #[error("value provider {provider} has no values left")]
    ValuesExhausted {
        /// The provider whose namespace is exhausted.
        provider: ValueProviderId,
    },

    /// Allocation of a specification failed; the report explains every
    /// attempted candidate.
    #[error("allocation failed:\n{0}")]
    Scheduling(SchedulerReport),

    /// A value or resource was consumed twice within one allocation context.
    #[error("{what} already consumed within the allocation context")]
    AlreadyConsumed {
        /// Description of the doubly consumed item.
        what: String,
    },

    /// The execution dependency graph contains a cycle.
    #[error("execution dependency cycle among executables {}", format_ids(.executables))]
    DependencyCycle {
        /// Executables participating in the detected cycle.
        executables: Vec<ExecutableId>,
    },

    /// A remote domain refused or failed a resource allocation.
    #[error("remote domain '{domain}' failed: {reason}")]
    ConnectFailure {
        /// The remote domain that was contacted.
        domain: String,
        /// The failure reported by the connector.
        reason: String,
    },

    /// A resource identifier is not present in the catalog.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    /// The requested record was not found.
    #[error("not found: {resource}")]
    NotFound {
        /// The record that was not found.
        resource: String,
    },

    /// A validation error occurred.
    #[error("validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// A description of the validation failure.
        message: String,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A configuration or catalog file could not be parsed.
    #[error("configuration error: {0}")]
    Configuration(#[from] serde_yaml::Error),

    /// A stored payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unsupported schema version was encountered.
    #[error("unsupported schema version: expected {expected}, found {found}")]
    UnsupportedSchemaVersion {
        /// The expected schema version.
        expected: i32,
        /// The schema version found in the database.
        found: i32,
    },

    /// An invariant of the engine itself was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Reason why a requested value cannot be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUnavailableReason {
    /// The value does not match any pattern of the provider.
    PatternMismatch,
    /// The value is already allocated in the provider's namespace.
    AlreadyAllocated,
}

impl std::fmt::Display for ValueUnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PatternMismatch => write!(f, "does not match provider patterns"),
            Self::AlreadyAllocated => write!(f, "already allocated"),
        }
    }
}

fn format_ids(ids: &[ExecutableId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl From<crate::slot::InvalidSlotError> for Error {
    fn from(err: crate::slot::InvalidSlotError) -> Self {
        Self::InvalidSlot {
            start: err.start,
            end: err.end,
            reason: err.reason,
        }
    }
}

impl Error {
    /// Check if the error only disqualifies the current candidate.
    ///
    /// Recoverable errors are absorbed by the reservation tasks, which revert
    /// to their savepoint and try the next candidate. Any other error aborts
    /// the whole scheduler run.
    ///
    /// # Examples
    ///
    /// ```
    /// use allot::Error;
    ///
    /// let err = Error::AlreadyConsumed { what: "resource 1".into() };
    /// assert!(!err.is_recoverable());
    /// ```
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ValueNotAvailable { .. }
                | Self::ValuesExhausted { .. }
                | Self::Scheduling(_)
                | Self::ConnectFailure { .. }
        )
    }

    /// Returns the scheduler report carried by a scheduling failure.
    #[must_use]
    pub fn report(&self) -> Option<&SchedulerReport> {
        match self {
            Self::Scheduling(report) => Some(report),
            _ => None,
        }
    }
}
