//! The scheduler.
//!
//! [`Scheduler::allocate`] turns a [`ReservationRequest`] into an
//! [`Allocation`]: a tree of reservations plus the executables and migrations
//! the executor will act on. The work is done by the reservation tasks in
//! [`task`], all sharing one [`AllocationContext`].
//!
//! Scheduling runs are expected to be serialized by the caller: the catalog
//! only learns about an allocation once it is committed.

pub mod context;
pub mod federation;
pub mod report;
pub mod specification;
pub mod task;

#[cfg(all(test, feature = "property-tests"))]
mod context_proptests;

use chrono::Duration;

use crate::error::{Error, Result};
use crate::executable::{Executable, ExecutableKind, NewExecutable, NewMigration};
use crate::reservation::{NodeId, Reservation, ReservationId, ReservationTree, StoredReservation};
use crate::resource::ResourceCatalog;
use crate::slot::Slot;

pub use context::{AllocationContext, Savepoint};
pub use federation::DomainConnector;
pub use report::{ReportKind, SchedulerReport};
pub use specification::Specification;

/// Whether an offered reservation may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reusability {
    /// Tasks may reuse the reservation.
    Reusable,
    /// The reservation is offered for inspection only.
    NotReusable,
}

/// A persisted reservation offered to one scheduler run for reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableReservation {
    /// The offered reservation.
    pub reservation: StoredReservation,
    /// Whether it may be reused.
    pub reusability: Reusability,
}

impl AvailableReservation {
    /// Offers a reservation for reuse.
    #[must_use]
    pub const fn reusable(reservation: StoredReservation) -> Self {
        Self {
            reservation,
            reusability: Reusability::Reusable,
        }
    }

    /// Returns true when the reservation may be reused.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.reusability == Reusability::Reusable
    }
}

/// The allocation a request replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousAllocation {
    /// Root of the replaced reservation tree; its bookings are ignored.
    pub reservation: ReservationId,
    /// Executable of the replaced root, if any.
    pub executable: Option<Executable>,
}

/// A request handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    /// When the reservation is needed.
    pub slot: Slot,
    /// What is needed.
    pub specification: Specification,
    /// Free-form description, forwarded to foreign domains.
    pub description: Option<String>,
    /// Persisted reservations that may be reused.
    pub available: Vec<AvailableReservation>,
    /// The allocation this request replaces.
    pub previous: Option<PreviousAllocation>,
}

impl ReservationRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(slot: Slot, specification: Specification) -> Self {
        Self {
            slot,
            specification,
            description: None,
            available: Vec::new(),
            previous: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Offers a reservation for reuse.
    #[must_use]
    pub fn with_available(mut self, available: AvailableReservation) -> Self {
        self.available.push(available);
        self
    }

    /// Marks the request as replacing a previous allocation.
    #[must_use]
    pub fn with_previous(mut self, previous: PreviousAllocation) -> Self {
        self.previous = Some(previous);
        self
    }
}

/// The result of a successful scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// The root reservation.
    pub root: NodeId,
    /// Every reservation created by the run.
    pub reservations: ReservationTree,
    /// Executables to persist.
    pub executables: Vec<NewExecutable>,
    /// Migrations to persist.
    pub migrations: Vec<NewMigration>,
}

impl Allocation {
    /// Returns the root reservation.
    #[must_use]
    pub fn root_reservation(&self) -> &Reservation {
        self.reservations.get(self.root)
    }

    /// Returns the executable created for `node`.
    #[must_use]
    pub fn executable_of(&self, node: NodeId) -> Option<&NewExecutable> {
        self.reservations
            .try_get(node)
            .and_then(|reservation| reservation.executable)
            .and_then(|index| self.executables.get(index))
    }
}

/// Outcome of [`Scheduler::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationState {
    /// The request was allocated.
    Allocated(Allocation),
    /// The request cannot be allocated.
    Failed {
        /// Why allocation failed.
        report: SchedulerReport,
    },
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Whether tasks create executables.
    pub allow_executables: bool,
    /// Longest accepted request slot.
    pub max_slot: Option<Duration>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            allow_executables: true,
            max_slot: None,
        }
    }
}

/// Allocates reservation requests against a catalog.
///
/// # Examples
///
/// ```
/// use allot::resource::ResourceCatalog;
/// use allot::scheduler::{AllocationState, ReportKind, ReservationRequest, Scheduler, SchedulerSettings};
/// use allot::scheduler::specification::{ParticipantSpecification, Specification};
/// use allot::resource::Technology;
///
/// let catalog = ResourceCatalog::new();
/// let scheduler = Scheduler::new(&catalog, SchedulerSettings::default());
/// let request = ReservationRequest::new(
///     "2012-01-01T12:00:00Z/2012-01-01T14:00:00Z".parse().unwrap(),
///     Specification::Compartment {
///         participants: vec![ParticipantSpecification::external(Technology::H323, 2)],
///     },
/// );
/// match scheduler.process(&request).unwrap() {
///     AllocationState::Failed { report } => assert!(report.contains(ReportKind::NoAvailableRoom)),
///     AllocationState::Allocated(_) => unreachable!(),
/// }
/// ```
pub struct Scheduler<'a> {
    catalog: &'a ResourceCatalog,
    connector: Option<&'a dyn DomainConnector>,
    settings: SchedulerSettings,
}

impl<'a> Scheduler<'a> {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(catalog: &'a ResourceCatalog, settings: SchedulerSettings) -> Self {
        Self {
            catalog,
            connector: None,
            settings,
        }
    }

    /// Sets the connector for resources owned by foreign domains.
    #[must_use]
    pub fn with_connector(mut self, connector: &'a dyn DomainConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    fn context(&self, request: &ReservationRequest) -> AllocationContext<'a> {
        let mut ctx = AllocationContext::new(self.catalog, request.slot)
            .with_description(request.description.clone())
            .with_executables_allowed(self.settings.allow_executables)
            .with_available(request.available.clone());
        if let Some(connector) = self.connector {
            ctx = ctx.with_connector(connector);
        }
        if let Some(previous) = &request.previous {
            ctx = ctx.with_superseded(previous.reservation);
        }
        ctx
    }

    /// Allocates a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scheduling`] (or another recoverable error) when the
    /// request cannot be satisfied, and a fatal error when an invariant is
    /// violated.
    pub fn allocate(&self, request: &ReservationRequest) -> Result<Allocation> {
        if let Some(max_slot) = self.settings.max_slot {
            if request.slot.duration() > max_slot {
                return Err(Error::Scheduling(SchedulerReport::new(
                    ReportKind::InvalidRequest,
                    format!("slot {} is longer than {} days", request.slot, max_slot.num_days()),
                )));
            }
        }

        log::debug!("Allocating {:?} for {}", request.specification, request.slot);
        let mut ctx = self.context(request);
        let root = task::allocate(&request.specification, &mut ctx)?;

        if let Some(previous) = &request.previous {
            if migrate_reservation(&mut ctx, previous, root) {
                log::debug!("Migration recorded from {:?}", previous.executable.as_ref().map(|e| e.id));
            }
        }

        if let Some((a, b)) = ctx.reservations().find_resource_conflict() {
            return Err(Error::Internal(format!(
                "reservations {} and {} hold the same resource",
                a.index(),
                b.index()
            )));
        }

        let allocation = ctx.into_allocation(root)?;
        log::debug!(
            "Allocated {} reservations and {} executables",
            allocation.reservations.len(),
            allocation.executables.len()
        );
        Ok(allocation)
    }

    /// Allocates a request, turning scheduling failures into an explicit
    /// [`AllocationState::Failed`].
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal conditions.
    pub fn process(&self, request: &ReservationRequest) -> Result<AllocationState> {
        match self.allocate(request) {
            Ok(allocation) => Ok(AllocationState::Allocated(allocation)),
            Err(err) if err.is_recoverable() => {
                let report = task::report_from_error(&err)
                    .unwrap_or_else(|| SchedulerReport::new(ReportKind::InvalidRequest, err.to_string()));
                log::info!("Allocation failed:\n{report}");
                Ok(AllocationState::Failed { report })
            }
            Err(err) => Err(err),
        }
    }
}

/// Links a started room executable of the replaced allocation to the room
/// executable created for `new_root`, so the executor can hand the running
/// room over instead of stopping and starting it.
///
/// Returns true when a migration was recorded.
pub fn migrate_reservation(
    ctx: &mut AllocationContext<'_>,
    previous: &PreviousAllocation,
    new_root: NodeId,
) -> bool {
    let Some(old) = &previous.executable else {
        return false;
    };
    if !old.state.is_started() || !matches!(old.kind, ExecutableKind::Room(_)) {
        return false;
    }
    let Some(index) = ctx.reservations().try_get(new_root).and_then(|node| node.executable) else {
        return false;
    };
    if !matches!(ctx.executable(index).map(|e| &e.kind), Some(ExecutableKind::Room(_))) {
        return false;
    }
    ctx.add_migration(NewMigration {
        source: old.id,
        target: index,
    });
    true
}
