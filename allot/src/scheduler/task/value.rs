//! Value allocation task.

use crate::error::Result;
use crate::reservation::{NodeId, ReservationKind};
use crate::scheduler::context::AllocationContext;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::task::ReservationTask;
use crate::slot::Slot;
use crate::value::ValueProviderId;

/// Allocates one value from a provider.
#[derive(Debug, Clone)]
pub struct ValueReservationTask<'s> {
    provider: ValueProviderId,
    requested: Option<&'s str>,
    slot: Option<Slot>,
}

impl<'s> ValueReservationTask<'s> {
    /// Creates the task; `requested` asks for a specific value.
    #[must_use]
    pub const fn new(provider: ValueProviderId, requested: Option<&'s str>) -> Self {
        Self {
            provider,
            requested,
            slot: None,
        }
    }

    /// Allocates for `slot` instead of the request slot.
    #[must_use]
    pub const fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }
}

impl ReservationTask for ValueReservationTask<'_> {
    fn report(&self) -> SchedulerReport {
        let detail = match self.requested {
            Some(value) => format!("{} '{value}'", self.provider),
            None => self.provider.to_string(),
        };
        SchedulerReport::new(ReportKind::AllocatingValue, detail)
    }

    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
        let slot = self.slot.unwrap_or_else(|| ctx.slot());
        let catalog = ctx.catalog();
        let allocator = catalog.value_allocator(self.provider)?;
        let scope = allocator.scope();

        let allocated = allocator.allocate(self.requested, |candidate| {
            catalog.is_value_taken(scope, candidate, &slot, ctx)
        })?;

        ctx.consume_value(scope, &allocated.raw, slot)?;
        log::debug!("Allocated value '{}' from {scope}", allocated.value);
        Ok(ctx.create_reservation(
            slot,
            ReservationKind::Value {
                scope,
                raw: allocated.raw,
                value: allocated.value,
            },
        ))
    }
}
