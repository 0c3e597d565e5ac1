//! Alias allocation task.
//!
//! Candidates are the alias provider capabilities of allocatable resources
//! that produce the requested technologies and alias types. When no target
//! resource is given, providers not restricted to their own resource are
//! tried first; otherwise catalog order is kept. For each provider a reusable
//! alias reservation is preferred over allocating a new value.

use crate::error::Result;
use crate::executable::{ExecutableKind, NewExecutable, RoomEndpoint};
use crate::reservation::{NodeId, ReservationKind};
use crate::resource::{format_technologies, AliasProviderCapability, Resource};
use crate::scheduler::context::AllocationContext;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::specification::AliasSpecification;
use crate::scheduler::task::{try_candidate, ReservationTask, ValueReservationTask};
use crate::slot::Slot;

/// Allocates an alias.
#[derive(Debug, Clone)]
pub struct AliasReservationTask<'s> {
    spec: &'s AliasSpecification,
    slot: Option<Slot>,
}

impl<'s> AliasReservationTask<'s> {
    /// Creates the task.
    #[must_use]
    pub const fn new(spec: &'s AliasSpecification) -> Self {
        Self { spec, slot: None }
    }

    /// Allocates for `slot` instead of the request slot.
    #[must_use]
    pub const fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    fn accepts(&self, resource: &Resource, capability: &AliasProviderCapability) -> bool {
        let spec = self.spec;
        if !spec.technologies.is_empty() && !capability.provides_technology(&spec.technologies) {
            return false;
        }
        if !spec.alias_types.is_empty() && !capability.provides_alias_type(&spec.alias_types) {
            return false;
        }
        if capability.restricted_to_resource
            && spec.target_resource.is_some_and(|target| target != resource.id)
        {
            return false;
        }
        !spec.permanent_room || capability.permanent_room
    }

    fn candidates<'c>(&self, ctx: &AllocationContext<'c>) -> Vec<(&'c Resource, &'c AliasProviderCapability)> {
        let mut candidates: Vec<_> = ctx
            .catalog()
            .resources()
            .filter(|resource| resource.allocatable)
            .flat_map(|resource| resource.alias_providers().map(move |capability| (resource, capability)))
            .filter(|(resource, capability)| self.accepts(resource, capability))
            .collect();
        if self.spec.target_resource.is_none() {
            candidates.sort_by_key(|(_, capability)| capability.restricted_to_resource);
        }
        candidates
    }

    fn try_reuse(&self, ctx: &mut AllocationContext<'_>, resource: &Resource, slot: Slot) -> Option<NodeId> {
        let reused = ctx.available_reservations().iter().find_map(|available| {
            let stored = &available.reservation;
            let ReservationKind::Alias {
                resource: owner,
                value,
                aliases,
            } = &stored.kind
            else {
                return None;
            };
            let matches = available.is_reusable()
                && *owner == resource.id
                && stored.slot.contains(&slot)
                && self.spec.value.as_ref().map_or(true, |requested| requested == value)
                && (self.spec.technologies.is_empty()
                    || aliases.iter().any(|a| a.is_compatible_with(&self.spec.technologies)))
                && (self.spec.alias_types.is_empty()
                    || aliases.iter().any(|a| self.spec.alias_types.contains(&a.alias_type)));
            matches.then_some(stored.id)
        })?;
        ctx.take_available(reused)?;
        log::debug!("Reusing alias reservation {reused}");
        Some(ctx.create_reservation(slot, ReservationKind::Existing { reused }))
    }

    fn allocate_from(
        &self,
        ctx: &mut AllocationContext<'_>,
        resource: &Resource,
        capability: &AliasProviderCapability,
        slot: Slot,
    ) -> Result<NodeId> {
        let value_node = ValueReservationTask::new(capability.value_provider, self.spec.value.as_deref())
            .with_slot(slot)
            .allocate(ctx)?;
        let value = match &ctx.reservations().get(value_node).kind {
            ReservationKind::Value { value, .. } => value.clone(),
            _ => String::new(),
        };

        let aliases: Vec<_> = capability.aliases.iter().map(|t| t.render(&value)).collect();
        let alias_node = ctx.create_reservation(
            slot,
            ReservationKind::Alias {
                resource: resource.id,
                value: value.clone(),
                aliases: aliases.clone(),
            },
        );
        ctx.add_child(alias_node, value_node)?;

        // An alias bound to a target resource belongs to that resource's room.
        if capability.permanent_room
            && self.spec.target_resource.is_none()
            && ctx.executables_allowed()
            && resource.room_provider().is_some()
        {
            let room = RoomEndpoint {
                device: resource.id,
                agent: resource.agent.clone(),
                name: value,
                technologies: capability.technologies(),
                license_count: 0,
                aliases,
            };
            ctx.add_executable(alias_node, NewExecutable::new(ExecutableKind::Room(room), slot))?;
        }
        Ok(alias_node)
    }
}

impl ReservationTask for AliasReservationTask<'_> {
    fn report(&self) -> SchedulerReport {
        let mut detail = format_technologies(&self.spec.technologies);
        if !self.spec.alias_types.is_empty() {
            detail.push_str(&format!(" {:?}", self.spec.alias_types));
        }
        if let Some(value) = &self.spec.value {
            detail.push_str(&format!(" value '{value}'"));
        }
        if let Some(target) = self.spec.target_resource {
            detail.push_str(&format!(" for {target}"));
        }
        SchedulerReport::new(ReportKind::AllocatingAlias, detail)
    }

    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
        let slot = self.slot.unwrap_or_else(|| ctx.slot());
        let mut report = self.report();
        let candidates = self.candidates(ctx);

        for (resource, capability) in candidates {
            if let Some(node) = self.try_reuse(ctx, resource, slot) {
                return Ok(node);
            }
            let label = format!("alias provider {} ({})", resource.name, resource.id);
            if let Some(node) = try_candidate(ctx, &mut report, &label, |ctx| {
                self.allocate_from(ctx, resource, capability, slot)
            })? {
                return Ok(node);
            }
        }

        report.push(SchedulerReport::new(ReportKind::NoAvailableAliasProvider, ""));
        Err(crate::Error::Scheduling(report))
    }
}
