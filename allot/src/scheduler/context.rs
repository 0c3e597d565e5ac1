//! Allocation context.
//!
//! The context is the scratchpad of one scheduler run. It records everything
//! allocated so far (resources, licenses, values, reservations, executables)
//! so that later tasks see earlier choices, and it supports nested savepoints
//! so a task can try a candidate and undo exactly what that attempt did.

use std::fmt;

use crate::error::{Error, Result};
use crate::executable::{NewExecutable, NewMigration};
use crate::reservation::{NodeId, ReservationId, ReservationKind, ReservationTree, StoredReservation};
use crate::resource::{ResourceCatalog, ResourceId};
use crate::scheduler::federation::DomainConnector;
use crate::scheduler::AvailableReservation;
use crate::slot::Slot;
use crate::value::ValueProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    resources: usize,
    licenses: usize,
    values: usize,
    reservations: usize,
    executables: usize,
    migrations: usize,
    taken: usize,
}

/// Handle of a savepoint created by [`AllocationContext::create_savepoint`].
///
/// Savepoints nest; they must be reverted or destroyed innermost first.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a savepoint must be reverted or destroyed"]
pub struct Savepoint {
    depth: usize,
}

/// Mutable state of one scheduler run.
pub struct AllocationContext<'a> {
    catalog: &'a ResourceCatalog,
    connector: Option<&'a dyn DomainConnector>,
    slot: Slot,
    description: Option<String>,
    executables_allowed: bool,
    superseded: Option<ReservationId>,
    resources: Vec<(ResourceId, Slot, NodeId)>,
    licenses: Vec<(ResourceId, Slot, u32)>,
    values: Vec<(ValueProviderId, String, Slot)>,
    reservations: ReservationTree,
    executables: Vec<NewExecutable>,
    migrations: Vec<NewMigration>,
    available: Vec<AvailableReservation>,
    taken: Vec<(usize, AvailableReservation)>,
    savepoints: Vec<Snapshot>,
}

impl fmt::Debug for AllocationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationContext")
            .field("slot", &self.slot)
            .field("resources", &self.resources)
            .field("licenses", &self.licenses)
            .field("values", &self.values)
            .field("reservations", &self.reservations.len())
            .field("executables", &self.executables.len())
            .field("savepoints", &self.savepoints.len())
            .finish_non_exhaustive()
    }
}

impl<'a> AllocationContext<'a> {
    /// Creates an empty context for a request slot.
    #[must_use]
    pub fn new(catalog: &'a ResourceCatalog, slot: Slot) -> Self {
        Self {
            catalog,
            connector: None,
            slot,
            description: None,
            executables_allowed: true,
            superseded: None,
            resources: Vec::new(),
            licenses: Vec::new(),
            values: Vec::new(),
            reservations: ReservationTree::new(),
            executables: Vec::new(),
            migrations: Vec::new(),
            available: Vec::new(),
            taken: Vec::new(),
            savepoints: Vec::new(),
        }
    }

    /// Sets the connector used for foreign resources.
    #[must_use]
    pub fn with_connector(mut self, connector: &'a dyn DomainConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the request description passed to foreign domains.
    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Sets whether tasks may create executables.
    #[must_use]
    pub fn with_executables_allowed(mut self, allowed: bool) -> Self {
        self.executables_allowed = allowed;
        self
    }

    /// Ignores the committed bookings of a reservation being replaced.
    #[must_use]
    pub fn with_superseded(mut self, reservation: ReservationId) -> Self {
        self.superseded = Some(reservation);
        self
    }

    /// Offers persisted reservations for reuse.
    #[must_use]
    pub fn with_available(mut self, available: Vec<AvailableReservation>) -> Self {
        self.available = available;
        self
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &'a ResourceCatalog {
        self.catalog
    }

    /// Returns the connector for foreign domains.
    #[must_use]
    pub fn connector(&self) -> Option<&'a dyn DomainConnector> {
        self.connector
    }

    /// Returns the request slot.
    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    /// Returns the request description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns whether tasks may create executables.
    #[must_use]
    pub const fn executables_allowed(&self) -> bool {
        self.executables_allowed
    }

    /// Returns the reservation whose bookings are ignored.
    #[must_use]
    pub const fn superseded(&self) -> Option<ReservationId> {
        self.superseded
    }

    /// Returns the number of allocations recorded so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.resources.len()
            + self.licenses.len()
            + self.values.len()
            + self.reservations.len()
            + self.executables.len()
            + self.migrations.len()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            resources: self.resources.len(),
            licenses: self.licenses.len(),
            values: self.values.len(),
            reservations: self.reservations.len(),
            executables: self.executables.len(),
            migrations: self.migrations.len(),
            taken: self.taken.len(),
        }
    }

    /// Opens a savepoint.
    pub fn create_savepoint(&mut self) -> Savepoint {
        self.savepoints.push(self.snapshot());
        Savepoint {
            depth: self.savepoints.len(),
        }
    }

    fn check_innermost(&self, savepoint: &Savepoint) -> Result<Snapshot> {
        if savepoint.depth != self.savepoints.len() {
            return Err(Error::Internal(format!(
                "savepoint {} is not the innermost of {}",
                savepoint.depth,
                self.savepoints.len()
            )));
        }
        self.savepoints
            .last()
            .copied()
            .ok_or_else(|| Error::Internal("no open savepoint".to_string()))
    }

    /// Undoes every allocation made after `savepoint`. The savepoint stays
    /// open and can be reverted again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `savepoint` is not the innermost one.
    pub fn revert(&mut self, savepoint: &Savepoint) -> Result<()> {
        let snapshot = self.check_innermost(savepoint)?;
        self.resources.truncate(snapshot.resources);
        self.licenses.truncate(snapshot.licenses);
        self.values.truncate(snapshot.values);
        self.reservations.truncate(snapshot.reservations);
        self.executables.truncate(snapshot.executables);
        self.reservations.truncate_executables(snapshot.executables);
        self.migrations.truncate(snapshot.migrations);
        while self.taken.len() > snapshot.taken {
            if let Some((position, reservation)) = self.taken.pop() {
                let position = position.min(self.available.len());
                self.available.insert(position, reservation);
            }
        }
        Ok(())
    }

    /// Closes `savepoint`, keeping everything allocated since.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `savepoint` is not the innermost one.
    pub fn destroy(&mut self, savepoint: Savepoint) -> Result<()> {
        self.check_innermost(&savepoint)?;
        self.savepoints.pop();
        Ok(())
    }

    /// Runs `attempt` inside a savepoint, reverting it on failure.
    ///
    /// # Errors
    ///
    /// Returns whatever `attempt` returns.
    pub fn attempt<T, F>(&mut self, attempt: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let savepoint = self.create_savepoint();
        let result = attempt(self);
        if result.is_err() {
            self.revert(&savepoint)?;
        }
        self.destroy(savepoint)?;
        result
    }

    /// Records the exclusive use of a resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConsumed`] if the context already holds the
    /// resource in an overlapping slot.
    pub fn reserve_resource(&mut self, resource: ResourceId, slot: Slot, node: NodeId) -> Result<()> {
        if self.is_resource_reserved(resource, &slot) {
            return Err(Error::AlreadyConsumed {
                what: format!("resource {resource}"),
            });
        }
        self.resources.push((resource, slot, node));
        Ok(())
    }

    /// Returns true when the context holds the resource in an overlapping slot.
    #[must_use]
    pub fn is_resource_reserved(&self, resource: ResourceId, slot: &Slot) -> bool {
        self.resources
            .iter()
            .any(|(r, s, _)| *r == resource && s.overlaps(slot))
    }

    /// Returns the node holding `resource` in an overlapping slot.
    #[must_use]
    pub fn reserved_node(&self, resource: ResourceId, slot: &Slot) -> Option<NodeId> {
        self.resources
            .iter()
            .find(|(r, s, _)| *r == resource && s.overlaps(slot))
            .map(|(_, _, node)| *node)
    }

    /// Records licenses taken on a device.
    pub fn reserve_licenses(&mut self, resource: ResourceId, slot: Slot, count: u32) {
        self.licenses.push((resource, slot, count));
    }

    /// Returns the licenses of `resource` the context holds in `slot`.
    #[must_use]
    pub fn reserved_licenses(&self, resource: ResourceId, slot: &Slot) -> u32 {
        self.licenses
            .iter()
            .filter(|(r, s, _)| *r == resource && s.overlaps(slot))
            .map(|(_, _, count)| count)
            .sum()
    }

    /// Records a consumed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConsumed`] if the value is already consumed in
    /// an overlapping slot.
    pub fn consume_value(&mut self, scope: ValueProviderId, value: &str, slot: Slot) -> Result<()> {
        if self.is_value_consumed(scope, value, &slot) {
            return Err(Error::AlreadyConsumed {
                what: format!("value '{value}' of {scope}"),
            });
        }
        self.values.push((scope, value.to_string(), slot));
        Ok(())
    }

    /// Returns true when the value is consumed in an overlapping slot.
    #[must_use]
    pub fn is_value_consumed(&self, scope: ValueProviderId, value: &str, slot: &Slot) -> bool {
        self.values
            .iter()
            .any(|(s, v, sl)| *s == scope && v == value && sl.overlaps(slot))
    }

    /// Returns the reservations created so far.
    #[must_use]
    pub fn reservations(&self) -> &ReservationTree {
        &self.reservations
    }

    /// Creates a parentless reservation.
    pub fn create_reservation(&mut self, slot: Slot, kind: ReservationKind) -> NodeId {
        self.reservations.add(slot, kind)
    }

    /// Attaches `child` under `parent`.
    ///
    /// # Errors
    ///
    /// See [`ReservationTree::add_child`].
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.reservations.add_child(parent, child)
    }

    /// Adds an executable and links it to `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn add_executable(&mut self, node: NodeId, executable: NewExecutable) -> Result<usize> {
        self.executables.push(executable);
        let index = self.executables.len() - 1;
        self.reservations.set_executable(node, index)?;
        Ok(index)
    }

    /// Returns an executable added by this context.
    #[must_use]
    pub fn executable(&self, index: usize) -> Option<&NewExecutable> {
        self.executables.get(index)
    }

    /// Returns an executable added by this context for modification.
    pub fn executable_mut(&mut self, index: usize) -> Option<&mut NewExecutable> {
        self.executables.get_mut(index)
    }

    /// Records a migration.
    pub fn add_migration(&mut self, migration: NewMigration) {
        self.migrations.push(migration);
    }

    /// Returns the reservations still offered for reuse.
    #[must_use]
    pub fn available_reservations(&self) -> &[AvailableReservation] {
        &self.available
    }

    /// Removes an offered reservation from the pool. Reverting a savepoint
    /// created earlier puts it back.
    pub fn take_available(&mut self, id: ReservationId) -> Option<AvailableReservation> {
        let position = self
            .available
            .iter()
            .position(|available| available.reservation.id == id)?;
        let reservation = self.available.remove(position);
        self.taken.push((position, reservation.clone()));
        Some(reservation)
    }

    /// Returns a reservation taken from the pool by this context.
    #[must_use]
    pub fn taken_reservation(&self, id: ReservationId) -> Option<&StoredReservation> {
        self.taken
            .iter()
            .map(|(_, available)| &available.reservation)
            .find(|reservation| reservation.id == id)
    }

    /// Consumes the context, returning the allocation rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if savepoints are still open.
    pub fn into_allocation(self, root: NodeId) -> Result<crate::scheduler::Allocation> {
        if !self.savepoints.is_empty() {
            return Err(Error::Internal(format!(
                "{} savepoints left open",
                self.savepoints.len()
            )));
        }
        Ok(crate::scheduler::Allocation {
            root,
            reservations: self.reservations,
            executables: self.executables,
            migrations: self.migrations,
        })
    }
}
