//! Virtual room allocation task.
//!
//! Room providers are tried in catalog order. On each device a reusable room
//! reservation is tried first; otherwise the licenses are booked, the aliases
//! the device requires are allocated as children, and a room executable is
//! created (with a recording service when asked for).

use std::collections::BTreeSet;

use crate::error::Result;
use crate::executable::{ExecutableKind, ExecutableRef, NewExecutable, NewService, RoomEndpoint, ServiceKind};
use crate::reservation::{NodeId, ReservationKind};
use crate::resource::{format_technologies, Alias, AliasType, CapabilityKind, Resource, Technology};
use crate::scheduler::context::AllocationContext;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::specification::{AliasSpecification, RoomSpecification};
use crate::scheduler::task::{aliases_of, failure, try_candidate, AliasReservationTask, ReservationTask};
use crate::slot::Slot;

/// Allocates a virtual room.
#[derive(Debug, Clone)]
pub struct RoomReservationTask<'s> {
    technology_sets: Vec<BTreeSet<Technology>>,
    participant_count: u32,
    device: Option<crate::resource::ResourceId>,
    aliases: &'s [AliasSpecification],
    recording: bool,
    name: Option<&'s str>,
    slot: Option<Slot>,
}

impl<'s> RoomReservationTask<'s> {
    /// Creates the task from a room specification. Every technology of the
    /// specification must be served by the device.
    #[must_use]
    pub fn new(spec: &'s RoomSpecification) -> Self {
        Self {
            technology_sets: spec.technologies.iter().map(|t| BTreeSet::from([*t])).collect(),
            participant_count: spec.participant_count,
            device: spec.device,
            aliases: &spec.aliases,
            recording: spec.recording,
            name: spec.name.as_deref(),
            slot: None,
        }
    }

    /// Creates the task for endpoints: the device must intersect every
    /// endpoint's technology set.
    #[must_use]
    pub fn for_endpoints(technology_sets: Vec<BTreeSet<Technology>>, participant_count: u32) -> Self {
        Self {
            technology_sets,
            participant_count,
            device: None,
            aliases: &[],
            recording: false,
            name: None,
            slot: None,
        }
    }

    /// Allocates for `slot` instead of the request slot.
    #[must_use]
    pub const fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    fn technologies(&self) -> BTreeSet<Technology> {
        self.technology_sets.iter().flatten().copied().collect()
    }

    fn candidates<'c>(&self, ctx: &AllocationContext<'c>) -> Vec<&'c Resource> {
        let catalog = ctx.catalog();
        let mut candidates = catalog.find_by_capability(CapabilityKind::RoomProvider, &self.technology_sets);
        if let Some(device) = self.device {
            candidates.retain(|resource| resource.id == device);
        }
        candidates
    }

    fn try_reuse(&self, ctx: &mut AllocationContext<'_>, device: &Resource, slot: Slot) -> Result<Option<NodeId>> {
        let catalog = ctx.catalog();
        let found = ctx.available_reservations().iter().find_map(|available| {
            let stored = &available.reservation;
            match stored.kind {
                ReservationKind::Room {
                    resource,
                    license_count,
                } if available.is_reusable() && resource == device.id && stored.slot.contains(&slot) => {
                    Some((stored.id, license_count, stored.executable))
                }
                _ => None,
            }
        });
        let Some((reused, existing, executable)) = found else {
            return Ok(None);
        };

        let additional = self.participant_count.saturating_sub(existing);
        if additional > catalog.available_licenses(device, &slot, ctx) {
            return Ok(None);
        }
        if ctx.take_available(reused).is_none() {
            return Ok(None);
        }

        let node = ctx.create_reservation(slot, ReservationKind::Existing { reused });
        if additional > 0 {
            let extra = ctx.create_reservation(
                slot,
                ReservationKind::Room {
                    resource: device.id,
                    license_count: additional,
                },
            );
            ctx.reserve_licenses(device.id, slot, additional);
            ctx.add_child(node, extra)?;
        }
        if let (Some(room), true) = (executable, ctx.executables_allowed()) {
            let mut used = NewExecutable::new(
                ExecutableKind::UsedRoom {
                    room,
                    license_count: self.participant_count,
                },
                slot,
            );
            used.dependencies.push(ExecutableRef::Stored(room));
            ctx.add_executable(node, used)?;
        }
        log::debug!("Reusing room reservation {reused} on {}", device.name);
        Ok(Some(node))
    }

    fn allocate_on(&self, ctx: &mut AllocationContext<'_>, device: &Resource, slot: Slot) -> Result<NodeId> {
        let catalog = ctx.catalog();
        let available = catalog.available_licenses(device, &slot, ctx);
        if available < self.participant_count {
            return Err(failure(
                ReportKind::ResourceNotAvailable,
                format!("{available} of {} licenses free", self.participant_count),
            ));
        }

        let node = ctx.create_reservation(
            slot,
            ReservationKind::Room {
                resource: device.id,
                license_count: self.participant_count,
            },
        );
        ctx.reserve_licenses(device.id, slot, self.participant_count);

        let required: Vec<AliasSpecification> = device
            .room_provider()
            .map(|capability| capability.required_alias_types.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|alias_type| AliasSpecification::of_type(*alias_type))
            .chain(self.aliases.iter().cloned())
            .map(|spec| spec.with_target_resource(device.id))
            .collect();

        let mut aliases: Vec<Alias> = Vec::new();
        for spec in &required {
            let child = AliasReservationTask::new(spec).with_slot(slot).allocate(ctx)?;
            ctx.add_child(node, child)?;
            aliases.extend(aliases_of(ctx, child));
        }

        if ctx.executables_allowed() {
            let technologies: BTreeSet<Technology> =
                self.technologies().intersection(&device.technologies).copied().collect();
            let room_name = aliases.iter().find(|a| a.alias_type == AliasType::RoomName);
            let name = match (self.name, room_name) {
                (Some(name), _) => name.to_string(),
                (None, Some(alias)) => alias.value.clone(),
                (None, None) => format!("room-{}", node.index()),
            };
            let mut executable = NewExecutable::new(
                ExecutableKind::Room(RoomEndpoint {
                    device: device.id,
                    agent: device.agent.clone(),
                    name,
                    technologies,
                    license_count: self.participant_count,
                    aliases,
                }),
                slot,
            );
            if self.recording {
                let recorder = catalog
                    .find_by_capability(CapabilityKind::Recording, &[device.technologies.clone()])
                    .into_iter()
                    .next()
                    .ok_or_else(|| failure(ReportKind::NoAvailableRecording, device.name.clone()))?;
                executable.services.push(NewService {
                    kind: ServiceKind::Recording {
                        device: recorder.id,
                        agent: recorder.agent.clone(),
                    },
                    slot,
                });
            }
            ctx.add_executable(node, executable)?;
        }
        Ok(node)
    }
}

impl ReservationTask for RoomReservationTask<'_> {
    fn report(&self) -> SchedulerReport {
        SchedulerReport::new(
            ReportKind::AllocatingRoom,
            format!(
                "{} for {} participants",
                format_technologies(&self.technologies()),
                self.participant_count
            ),
        )
    }

    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
        let slot = self.slot.unwrap_or_else(|| ctx.slot());
        let mut report = self.report();
        if self.participant_count == 0 {
            report.push(SchedulerReport::new(ReportKind::InvalidRequest, "room needs participants"));
            return Err(crate::Error::Scheduling(report));
        }

        for device in self.candidates(ctx) {
            if let Some(node) = self.try_reuse(ctx, device, slot)? {
                return Ok(node);
            }
            let label = format!("room provider {} ({})", device.name, device.id);
            if let Some(node) = try_candidate(ctx, &mut report, &label, |ctx| self.allocate_on(ctx, device, slot))? {
                return Ok(node);
            }
        }

        report.push(SchedulerReport::new(ReportKind::NoAvailableRoom, ""));
        Err(crate::Error::Scheduling(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::ExecutableId;
    use crate::reservation::{ReservationId, StoredReservation};
    use crate::resource::{
        AliasProviderCapability, AliasTemplate, Capability, RecordingCapability, ResourceCatalog, ResourceId,
        RoomProviderCapability,
    };
    use crate::scheduler::AvailableReservation;
    use crate::value::{ValueProvider, ValueProviderId};

    fn day() -> Slot {
        "2012-01-01T00:00:00Z/2012-01-02T00:00:00Z".parse().unwrap()
    }

    fn mcu(id: u64, licenses: u32) -> Resource {
        Resource::new(ResourceId::new(id), format!("mcu{id}"))
            .with_technology(Technology::H323)
            .with_technology(Technology::Sip)
            .with_agent(format!("mcu{id}"))
            .with_capability(Capability::RoomProvider(RoomProviderCapability {
                license_count: licenses,
                required_alias_types: vec![AliasType::H323E164],
            }))
            .with_capability(Capability::AliasProvider(AliasProviderCapability {
                value_provider: ValueProviderId::new(0),
                aliases: vec![AliasTemplate::new(AliasType::H323E164, "95{value}")],
                restricted_to_resource: true,
                permanent_room: false,
            }))
    }

    fn catalog() -> ResourceCatalog {
        let mut catalog = ResourceCatalog::new();
        catalog.add_value_provider(ValueProvider::patterns(["{digit:2}"])).unwrap();
        catalog.add_resource(mcu(1, 5)).unwrap();
        catalog.add_resource(mcu(2, 20)).unwrap();
        catalog
    }

    fn spec(count: u32) -> RoomSpecification {
        RoomSpecification {
            technologies: BTreeSet::from([Technology::H323]),
            participant_count: count,
            ..RoomSpecification::default()
        }
    }

    #[test]
    fn test_room_gets_required_alias() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let spec = spec(3);
        let node = RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap();
        let room = ctx.reservations().get(node);
        assert_eq!(
            room.kind,
            ReservationKind::Room {
                resource: ResourceId::new(1),
                license_count: 3
            }
        );
        assert_eq!(room.children.len(), 1);
        let executable = ctx.executable(room.executable.unwrap()).unwrap();
        let ExecutableKind::Room(endpoint) = &executable.kind else {
            panic!("expected room executable");
        };
        assert_eq!(endpoint.aliases, vec![Alias::new(AliasType::H323E164, "9500")]);
        assert_eq!(endpoint.agent.as_deref(), Some("mcu1"));
    }

    #[test]
    fn test_permanent_room_provider_yields_one_room() {
        let mut catalog = ResourceCatalog::new();
        catalog.add_value_provider(ValueProvider::patterns(["{digit:2}"])).unwrap();
        let mut device = mcu(1, 10);
        device.capabilities = vec![
            Capability::RoomProvider(RoomProviderCapability {
                license_count: 10,
                required_alias_types: vec![AliasType::H323E164],
            }),
            Capability::AliasProvider(AliasProviderCapability {
                value_provider: ValueProviderId::new(0),
                aliases: vec![AliasTemplate::new(AliasType::H323E164, "95{value}")],
                restricted_to_resource: true,
                permanent_room: true,
            }),
        ];
        catalog.add_resource(device).unwrap();

        let mut ctx = AllocationContext::new(&catalog, day());
        let spec = spec(3);
        RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap();

        let licenses: Vec<u32> = (0..)
            .map_while(|index| ctx.executable(index))
            .filter_map(|executable| match &executable.kind {
                ExecutableKind::Room(room) => Some(room.license_count),
                _ => None,
            })
            .collect();
        assert_eq!(licenses, vec![3]);
    }

    #[test]
    fn test_overflow_moves_to_next_device() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let spec = spec(10);
        let node = RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap();
        assert!(matches!(
            ctx.reservations().get(node).kind,
            ReservationKind::Room { resource, .. } if resource == ResourceId::new(2)
        ));
        // The failed attempt on the first device left nothing behind.
        assert_eq!(ctx.reserved_licenses(ResourceId::new(1), &day()), 0);
    }

    #[test]
    fn test_no_room_when_capacity_exhausted() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let spec = spec(30);
        let err = RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap_err();
        let report = err.report().unwrap();
        assert!(report.contains(ReportKind::NoAvailableRoom));
        assert!(report.contains(ReportKind::ResourceNotAvailable));
    }

    #[test]
    fn test_reuse_room_with_extra_licenses() {
        let catalog = catalog();
        let stored = StoredReservation {
            id: ReservationId(9),
            parent: None,
            slot: day(),
            kind: ReservationKind::Room {
                resource: ResourceId::new(1),
                license_count: 2,
            },
            executable: Some(ExecutableId(90)),
        };
        let mut ctx =
            AllocationContext::new(&catalog, day()).with_available(vec![AvailableReservation::reusable(stored)]);
        let spec = spec(4);
        let node = RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap();
        let reservation = ctx.reservations().get(node);
        assert_eq!(reservation.kind, ReservationKind::Existing { reused: ReservationId(9) });
        assert_eq!(reservation.children.len(), 1);
        assert_eq!(ctx.reserved_licenses(ResourceId::new(1), &day()), 2);
        let executable = ctx.executable(reservation.executable.unwrap()).unwrap();
        assert_eq!(executable.dependencies, vec![ExecutableRef::Stored(ExecutableId(90))]);
    }

    #[test]
    fn test_recording_service() {
        let mut catalog = catalog();
        catalog
            .add_resource(
                Resource::new(ResourceId::new(3), "recorder")
                    .with_technology(Technology::H323)
                    .with_capability(Capability::Recording(RecordingCapability::default())),
            )
            .unwrap();
        let mut ctx = AllocationContext::new(&catalog, day());
        let spec = RoomSpecification {
            recording: true,
            ..spec(2)
        };
        let node = RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap();
        let executable = ctx
            .executable(ctx.reservations().get(node).executable.unwrap())
            .unwrap();
        assert_eq!(executable.services.len(), 1);
    }

    #[test]
    fn test_executables_can_be_disabled() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day()).with_executables_allowed(false);
        let spec = spec(2);
        let node = RoomReservationTask::new(&spec).allocate(&mut ctx).unwrap();
        assert!(ctx.reservations().get(node).executable.is_none());
    }
}
