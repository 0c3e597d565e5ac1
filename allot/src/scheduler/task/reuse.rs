//! Explicit reuse of a persisted reservation.

use crate::error::Result;
use crate::executable::{ExecutableKind, ExecutableRef, NewExecutable};
use crate::reservation::{NodeId, ReservationId, ReservationKind};
use crate::scheduler::context::AllocationContext;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::task::{failure, nest, ReservationTask};

/// Reuses one reservation offered to the run.
#[derive(Debug, Clone)]
pub struct ReuseReservationTask {
    reservation: ReservationId,
}

impl ReuseReservationTask {
    /// Creates the task.
    #[must_use]
    pub const fn new(reservation: ReservationId) -> Self {
        Self { reservation }
    }
}

impl ReservationTask for ReuseReservationTask {
    fn report(&self) -> SchedulerReport {
        SchedulerReport::new(ReportKind::ReusingReservation, self.reservation.to_string())
    }

    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
        let slot = ctx.slot();
        let offered = ctx
            .available_reservations()
            .iter()
            .find(|available| available.reservation.id == self.reservation);
        let usable = match offered {
            None => Err("not offered"),
            Some(available) if !available.is_reusable() => Err("not reusable"),
            Some(available) if !available.reservation.slot.contains(&slot) => Err("slot not covered"),
            Some(_) => Ok(()),
        };
        if let Err(reason) = usable {
            return Err(nest(
                self.report(),
                failure(ReportKind::ReservationNotAvailable, reason),
            ));
        }

        let taken = ctx.take_available(self.reservation).ok_or_else(|| {
            nest(
                self.report(),
                failure(ReportKind::ReservationNotAvailable, "already taken"),
            )
        })?;
        let node = ctx.create_reservation(
            slot,
            ReservationKind::Existing {
                reused: self.reservation,
            },
        );

        if let (ReservationKind::Room { license_count, .. }, Some(room)) =
            (&taken.reservation.kind, taken.reservation.executable)
        {
            if ctx.executables_allowed() {
                let mut used = NewExecutable::new(
                    ExecutableKind::UsedRoom {
                        room,
                        license_count: *license_count,
                    },
                    slot,
                );
                used.dependencies.push(ExecutableRef::Stored(room));
                ctx.add_executable(node, used)?;
            }
        }
        Ok(node)
    }
}
