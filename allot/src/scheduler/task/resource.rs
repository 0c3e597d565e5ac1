//! Resource allocation task.

use crate::error::Result;
use crate::reservation::{NodeId, ReservationKind};
use crate::resource::ResourceId;
use crate::scheduler::context::AllocationContext;
use crate::scheduler::federation::RequesterInfo;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::task::{failure, nest, ReservationTask};
use crate::slot::Slot;

/// Books a resource exclusively, together with its parent resource.
#[derive(Debug, Clone)]
pub struct ResourceReservationTask {
    resource: ResourceId,
    slot: Option<Slot>,
}

impl ResourceReservationTask {
    /// Creates the task.
    #[must_use]
    pub const fn new(resource: ResourceId) -> Self {
        Self { resource, slot: None }
    }

    /// Allocates for `slot` instead of the request slot.
    #[must_use]
    pub const fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    fn allocate_remote(&self, ctx: &mut AllocationContext<'_>, domain: &str, slot: Slot) -> Result<NodeId> {
        let connector = ctx
            .connector()
            .ok_or_else(|| failure(ReportKind::RemoteDomainFailed, format!("{domain}: no connector")))?;
        let requester = RequesterInfo {
            description: ctx.description().map(ToString::to_string),
        };
        let remote = connector.allocate_remote_resource(domain, &slot, self.resource, &requester)?;
        log::debug!("Domain {} granted {} as '{}'", remote.domain, self.resource, remote.reference);
        Ok(ctx.create_reservation(
            slot,
            ReservationKind::Remote {
                domain: remote.domain,
                reference: remote.reference,
            },
        ))
    }
}

impl ReservationTask for ResourceReservationTask {
    fn report(&self) -> SchedulerReport {
        SchedulerReport::new(ReportKind::AllocatingResource, self.resource.to_string())
    }

    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
        let slot = self.slot.unwrap_or_else(|| ctx.slot());
        let catalog = ctx.catalog();
        let resource = catalog
            .get(self.resource)
            .map_err(|_| nest(self.report(), failure(ReportKind::ResourceNotFound, self.resource.to_string())))?;

        if !resource.allocatable {
            return Err(nest(
                self.report(),
                failure(ReportKind::ResourceNotAllocatable, resource.name.clone()),
            ));
        }
        if let Some(domain) = &resource.domain {
            return self
                .allocate_remote(ctx, domain, slot)
                .map_err(|err| nest(self.report(), err));
        }
        if ctx.is_resource_reserved(resource.id, &slot) {
            return Err(nest(
                self.report(),
                failure(ReportKind::ResourceRequestedMultipleTimes, resource.name.clone()),
            ));
        }
        if !catalog.is_available(resource.id, &slot, ctx) {
            return Err(nest(
                self.report(),
                failure(ReportKind::ResourceNotAvailable, resource.name.clone()),
            ));
        }

        let node = ctx.create_reservation(slot, ReservationKind::Resource { resource: resource.id });
        ctx.reserve_resource(resource.id, slot, node)?;

        if let Some(parent) = resource.parent {
            if ctx.reserved_node(parent, &slot).is_none() {
                let parent_node = Self::new(parent)
                    .with_slot(slot)
                    .allocate(ctx)
                    .map_err(|err| nest(self.report(), err))?;
                ctx.add_child(node, parent_node)?;
            }
        }
        Ok(node)
    }
}
