//! Reservation tasks.
//!
//! Each task turns one kind of specification into a reservation node. Tasks
//! that choose among candidates try them in a stable order, each inside a
//! savepoint, and fail with a report naming every candidate they tried.

pub mod alias;
pub mod compartment;
pub mod resource;
pub mod reuse;
pub mod room;
pub mod value;

use crate::error::{Error, Result};
use crate::reservation::{NodeId, ReservationKind};
use crate::resource::Alias;
use crate::scheduler::context::AllocationContext;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::specification::Specification;

pub use alias::AliasReservationTask;
pub use compartment::CompartmentReservationTask;
pub use resource::ResourceReservationTask;
pub use reuse::ReuseReservationTask;
pub use room::RoomReservationTask;
pub use value::ValueReservationTask;

/// A unit of allocation work.
pub trait ReservationTask {
    /// Returns the report describing what the task allocates.
    fn report(&self) -> SchedulerReport;

    /// Allocates the task's reservation within `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a recoverable error when the specification cannot be satisfied
    /// and a fatal error when an invariant is violated.
    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId>;
}

/// Returns the task allocating `specification`.
#[must_use]
pub fn task_for(specification: &Specification) -> Box<dyn ReservationTask + '_> {
    match specification {
        Specification::Value(spec) => Box::new(ValueReservationTask::new(spec.provider, spec.requested.as_deref())),
        Specification::Alias(spec) => Box::new(AliasReservationTask::new(spec)),
        Specification::Resource { resource } => Box::new(ResourceReservationTask::new(*resource)),
        Specification::Room(spec) => Box::new(RoomReservationTask::new(spec)),
        Specification::Compartment { participants } => Box::new(CompartmentReservationTask::new(participants)),
        Specification::Reuse { reservation } => Box::new(ReuseReservationTask::new(*reservation)),
    }
}

/// Allocates `specification` within `ctx`.
///
/// # Errors
///
/// See [`ReservationTask::allocate`].
pub fn allocate(specification: &Specification, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
    task_for(specification).allocate(ctx)
}

/// Builds a scheduling failure with a single report.
pub(crate) fn failure(kind: ReportKind, detail: impl Into<String>) -> Error {
    Error::Scheduling(SchedulerReport::new(kind, detail))
}

/// Converts a recoverable error into a report.
#[must_use]
pub fn report_from_error(err: &Error) -> Option<SchedulerReport> {
    match err {
        Error::Scheduling(report) => Some(report.clone()),
        Error::ValueNotAvailable { value, reason } => Some(SchedulerReport::new(
            ReportKind::ValueNotAvailable,
            format!("{value} ({reason})"),
        )),
        Error::ValuesExhausted { provider } => {
            Some(SchedulerReport::new(ReportKind::ValuesExhausted, provider.to_string()))
        }
        Error::ConnectFailure { domain, reason } => Some(SchedulerReport::new(
            ReportKind::RemoteDomainFailed,
            format!("{domain}: {reason}"),
        )),
        _ => None,
    }
}

/// Wraps a failed child allocation into the parent's report.
pub(crate) fn nest(mut parent: SchedulerReport, err: Error) -> Error {
    match report_from_error(&err) {
        Some(child) => {
            parent.push(child);
            Error::Scheduling(parent)
        }
        None => err,
    }
}

/// Tries one candidate inside a savepoint.
///
/// A recoverable failure is recorded under `report` as a tried candidate and
/// yields `Ok(None)`; a fatal failure is returned as is.
pub(crate) fn try_candidate<'a, T, F>(
    ctx: &mut AllocationContext<'a>,
    report: &mut SchedulerReport,
    candidate: &str,
    attempt: F,
) -> Result<Option<T>>
where
    F: FnOnce(&mut AllocationContext<'a>) -> Result<T>,
{
    log::debug!("Trying {candidate}");
    match ctx.attempt(attempt) {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_recoverable() => {
            let mut tried = SchedulerReport::new(ReportKind::TryingCandidate, candidate);
            if let Some(child) = report_from_error(&err) {
                tried.push(child);
            }
            report.push(tried);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Returns the aliases held by `node`, looking through reuse nodes.
#[must_use]
pub fn aliases_of(ctx: &AllocationContext<'_>, node: NodeId) -> Vec<Alias> {
    let kind = match ctx.reservations().try_get(node).map(|n| &n.kind) {
        Some(ReservationKind::Existing { reused }) => ctx.taken_reservation(*reused).map(|r| &r.kind),
        other => other,
    };
    match kind {
        Some(ReservationKind::Alias { aliases, .. }) => aliases.clone(),
        _ => Vec::new(),
    }
}
