//! Compartment allocation task.
//!
//! A compartment gathers endpoints into one meeting. Two standalone endpoints
//! that share a technology are connected directly; anything else is attached
//! to a single virtual room sized for every endpoint.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::executable::{Connection, ExecutableKind, ExecutableRef, NewExecutable};
use crate::reservation::{NodeId, ReservationKind};
use crate::resource::{format_technologies, Alias, ResourceId, Technology};
use crate::scheduler::context::AllocationContext;
use crate::scheduler::report::{ReportKind, SchedulerReport};
use crate::scheduler::specification::{AliasSpecification, ParticipantSpecification};
use crate::scheduler::task::{
    aliases_of, failure, nest, try_candidate, AliasReservationTask, ReservationTask, ResourceReservationTask,
    RoomReservationTask,
};
use crate::slot::Slot;

/// One endpoint taking part in the compartment.
#[derive(Debug, Clone)]
struct Endpoint {
    label: String,
    resource: Option<ResourceId>,
    technologies: BTreeSet<Technology>,
    agent: Option<String>,
    aliases: Vec<Alias>,
    standalone: bool,
}

impl Endpoint {
    fn alias_for(&self, technologies: &BTreeSet<Technology>) -> Option<&Alias> {
        self.aliases.iter().find(|alias| alias.is_compatible_with(technologies))
    }
}

/// Allocates a compartment of participants.
#[derive(Debug, Clone)]
pub struct CompartmentReservationTask<'s> {
    participants: &'s [ParticipantSpecification],
    slot: Option<Slot>,
}

impl<'s> CompartmentReservationTask<'s> {
    /// Creates the task.
    #[must_use]
    pub const fn new(participants: &'s [ParticipantSpecification]) -> Self {
        Self {
            participants,
            slot: None,
        }
    }

    /// Allocates for `slot` instead of the request slot.
    #[must_use]
    pub const fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    fn endpoint_count(&self) -> u32 {
        self.participants
            .iter()
            .map(|participant| match participant {
                ParticipantSpecification::External { count, .. } => *count,
                ParticipantSpecification::Existing { .. } => 1,
            })
            .sum()
    }

    fn duplicate_resource(&self) -> Option<ResourceId> {
        let mut seen = BTreeSet::new();
        self.participants.iter().find_map(|participant| match participant {
            ParticipantSpecification::Existing { resource } if !seen.insert(*resource) => Some(*resource),
            _ => None,
        })
    }

    /// Books the existing endpoints and describes every endpoint.
    fn endpoints(&self, ctx: &mut AllocationContext<'_>, compartment: NodeId, slot: Slot) -> Result<Vec<Endpoint>> {
        let catalog = ctx.catalog();
        let mut endpoints = Vec::new();
        for participant in self.participants {
            match participant {
                ParticipantSpecification::External {
                    technologies,
                    count,
                    alias,
                } => {
                    for index in 0..*count {
                        endpoints.push(Endpoint {
                            label: format!("external {} #{}", format_technologies(technologies), index + 1),
                            resource: None,
                            technologies: technologies.clone(),
                            agent: None,
                            aliases: alias.iter().cloned().collect(),
                            standalone: false,
                        });
                    }
                }
                ParticipantSpecification::Existing { resource } => {
                    let node = ResourceReservationTask::new(*resource).with_slot(slot).allocate(ctx)?;
                    ctx.add_child(compartment, node)?;
                    let resource = catalog.get(*resource)?;
                    let terminal = resource.terminal();
                    endpoints.push(Endpoint {
                        label: resource.name.clone(),
                        resource: Some(resource.id),
                        technologies: resource.technologies.clone(),
                        agent: resource.agent.clone(),
                        aliases: terminal.map(|t| t.aliases.clone()).unwrap_or_default(),
                        standalone: terminal.is_some() && !resource.is_remote(),
                    });
                }
            }
        }
        Ok(endpoints)
    }

    /// Connects two standalone endpoints without a room.
    fn connect_directly(
        ctx: &mut AllocationContext<'_>,
        compartment: NodeId,
        endpoints: &[Endpoint],
        slot: Slot,
    ) -> Result<Vec<Connection>> {
        let [first, second] = endpoints else {
            return Err(failure(ReportKind::NotEnoughEndpoints, "direct connection needs two endpoints"));
        };
        let shared: BTreeSet<Technology> = first.technologies.intersection(&second.technologies).copied().collect();
        if shared.is_empty() {
            return Err(failure(ReportKind::InvalidRequest, "endpoints share no technology"));
        }
        let (caller, callee) = if first.agent.is_some() {
            (first, second)
        } else {
            (second, first)
        };
        if caller.agent.is_none() {
            return Err(failure(ReportKind::InvalidRequest, "neither endpoint can place a call"));
        }

        let alias = if let Some(alias) = callee.alias_for(&shared) {
            alias.clone()
        } else {
            let mut spec = AliasSpecification {
                technologies: shared.clone(),
                ..AliasSpecification::default()
            };
            spec.target_resource = callee.resource;
            let node = AliasReservationTask::new(&spec).with_slot(slot).allocate(ctx)?;
            ctx.add_child(compartment, node)?;
            aliases_of(ctx, node)
                .into_iter()
                .find(|alias| alias.is_compatible_with(&shared))
                .ok_or_else(|| failure(ReportKind::NoAvailableAliasProvider, format_technologies(&shared)))?
        };

        Ok(vec![Connection {
            from: caller.label.clone(),
            agent: caller.agent.clone(),
            alias,
        }])
    }

    /// Attaches every endpoint to one virtual room. Returns the connections
    /// and the index of the room's executable.
    fn connect_through_room(
        ctx: &mut AllocationContext<'_>,
        compartment: NodeId,
        endpoints: &[Endpoint],
        slot: Slot,
    ) -> Result<(Vec<Connection>, Option<usize>)> {
        let technology_sets: Vec<_> = endpoints.iter().map(|e| e.technologies.clone()).collect();
        let participant_count = u32::try_from(endpoints.len()).unwrap_or(u32::MAX);
        let room = RoomReservationTask::for_endpoints(technology_sets, participant_count)
            .with_slot(slot)
            .allocate(ctx)?;
        ctx.add_child(compartment, room)?;

        let device = room_device(ctx, room);
        let room_executable = ctx.reservations().get(room).executable;
        let (room_name, room_agent) = match room_executable.and_then(|index| ctx.executable(index)).map(|e| &e.kind) {
            Some(ExecutableKind::Room(endpoint)) => (endpoint.name.clone(), endpoint.agent.clone()),
            _ => (format!("room {}", room.index()), None),
        };
        let mut room_aliases: Vec<Alias> = ctx
            .reservations()
            .subtree(room)
            .into_iter()
            .flat_map(|node| aliases_of(ctx, node))
            .collect();

        let mut connections = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            // The room dials endpoints that can be called.
            if let Some(alias) = endpoint.alias_for(&endpoint.technologies) {
                connections.push(Connection {
                    from: room_name.clone(),
                    agent: room_agent.clone(),
                    alias: alias.clone(),
                });
                continue;
            }

            let existing = room_aliases
                .iter()
                .find(|alias| alias.is_compatible_with(&endpoint.technologies))
                .cloned();
            let alias = if let Some(alias) = existing {
                alias
            } else {
                let spec = AliasSpecification {
                    technologies: endpoint.technologies.clone(),
                    target_resource: device,
                    ..AliasSpecification::default()
                };
                let node = AliasReservationTask::new(&spec).with_slot(slot).allocate(ctx)?;
                ctx.add_child(compartment, node)?;
                let allocated = aliases_of(ctx, node);
                if let Some(ExecutableKind::Room(room)) =
                    room_executable.and_then(|index| ctx.executable_mut(index)).map(|e| &mut e.kind)
                {
                    room.aliases.extend(allocated.iter().cloned());
                }
                room_aliases.extend(allocated);
                room_aliases
                    .iter()
                    .find(|alias| alias.is_compatible_with(&endpoint.technologies))
                    .cloned()
                    .ok_or_else(|| {
                        failure(ReportKind::NoAvailableAliasProvider, format_technologies(&endpoint.technologies))
                    })?
            };
            connections.push(Connection {
                from: endpoint.label.clone(),
                agent: endpoint.agent.clone(),
                alias,
            });
        }
        Ok((connections, room_executable))
    }
}

/// Returns the device hosting a room node, looking through reuse nodes.
fn room_device(ctx: &AllocationContext<'_>, room: NodeId) -> Option<ResourceId> {
    let kind = match &ctx.reservations().get(room).kind {
        ReservationKind::Existing { reused } => ctx.taken_reservation(*reused).map(|r| &r.kind),
        other => Some(other),
    };
    match kind {
        Some(ReservationKind::Room { resource, .. }) => Some(*resource),
        _ => None,
    }
}

fn can_connect_directly(endpoints: &[Endpoint]) -> bool {
    match endpoints {
        [first, second] => {
            first.standalone
                && second.standalone
                && (first.agent.is_some() || second.agent.is_some())
                && !first.technologies.is_disjoint(&second.technologies)
        }
        _ => false,
    }
}

impl ReservationTask for CompartmentReservationTask<'_> {
    fn report(&self) -> SchedulerReport {
        SchedulerReport::new(
            ReportKind::AllocatingCompartment,
            format!("{} endpoints", self.endpoint_count()),
        )
    }

    fn allocate(&self, ctx: &mut AllocationContext<'_>) -> Result<NodeId> {
        let slot = self.slot.unwrap_or_else(|| ctx.slot());
        let mut report = self.report();

        if let Some(resource) = self.duplicate_resource() {
            report.push(SchedulerReport::new(
                ReportKind::ResourceRequestedMultipleTimes,
                resource.to_string(),
            ));
            return Err(crate::Error::Scheduling(report));
        }
        let count = self.endpoint_count();
        let has_existing = self
            .participants
            .iter()
            .any(|participant| matches!(participant, ParticipantSpecification::Existing { .. }));
        if count < 2 && !has_existing {
            report.push(SchedulerReport::new(
                ReportKind::NotEnoughEndpoints,
                format!("{count} endpoint(s) requested"),
            ));
            return Err(crate::Error::Scheduling(report));
        }

        let compartment = ctx.create_reservation(slot, ReservationKind::Compartment);
        let endpoints = self
            .endpoints(ctx, compartment, slot)
            .map_err(|err| nest(report.clone(), err))?;

        // A lone existing endpoint is only booked; there is nothing to connect.
        let mut direct = (endpoints.len() < 2).then(Vec::new);
        if direct.is_none() && can_connect_directly(&endpoints) {
            direct = try_candidate(ctx, &mut report, "direct connection", |ctx| {
                Self::connect_directly(ctx, compartment, &endpoints, slot)
            })?;
        }
        let (connections, room_executable) = match direct {
            Some(connections) => (connections, None),
            None => Self::connect_through_room(ctx, compartment, &endpoints, slot)
                .map_err(|err| nest(report.clone(), err))?,
        };
        log::debug!(
            "Compartment of {} endpoints uses {} connection(s)",
            endpoints.len(),
            connections.len()
        );

        if ctx.executables_allowed() {
            let mut executable = NewExecutable::new(ExecutableKind::Compartment { connections }, slot);
            executable.dependencies.extend(room_executable.map(ExecutableRef::New));
            ctx.add_executable(compartment, executable)?;
        }
        Ok(compartment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::resource::{
        AliasProviderCapability, AliasTemplate, AliasType, Capability, Resource, ResourceCatalog,
        RoomProviderCapability, TerminalCapability,
    };
    use crate::value::{ValueProvider, ValueProviderId};

    fn day() -> Slot {
        "2012-01-01T00:00:00Z/2013-01-01T00:00:00Z".parse().unwrap()
    }

    fn mcu() -> Resource {
        Resource::new(ResourceId::new(1), "mcu")
            .with_technology(Technology::H323)
            .with_technology(Technology::Sip)
            .with_agent("mcu")
            .with_capability(Capability::RoomProvider(RoomProviderCapability {
                license_count: 100,
                required_alias_types: vec![],
            }))
            .with_capability(Capability::AliasProvider(AliasProviderCapability {
                value_provider: ValueProviderId::new(0),
                aliases: vec![
                    AliasTemplate::new(AliasType::H323E164, "95{value}"),
                    AliasTemplate::new(AliasType::SipUri, "95{value}@example.org"),
                ],
                restricted_to_resource: true,
                permanent_room: false,
            }))
    }

    fn terminal(id: u64, agent: Option<&str>, aliases: Vec<Alias>) -> Resource {
        let mut resource = Resource::new(ResourceId::new(id), format!("terminal{id}"))
            .with_technology(Technology::H323)
            .with_capability(Capability::StandaloneTerminal(TerminalCapability { aliases }));
        if let Some(agent) = agent {
            resource = resource.with_agent(agent);
        }
        resource
    }

    fn catalog() -> ResourceCatalog {
        let mut catalog = ResourceCatalog::new();
        catalog.add_value_provider(ValueProvider::patterns(["{digit:2}"])).unwrap();
        catalog.add_resource(mcu()).unwrap();
        catalog
            .add_resource(terminal(2, Some("t2"), vec![Alias::new(AliasType::H323E164, "420")]))
            .unwrap();
        catalog.add_resource(terminal(3, Some("t3"), vec![])).unwrap();
        catalog
    }

    fn connections(ctx: &AllocationContext<'_>, node: NodeId) -> Vec<Connection> {
        let index = ctx.reservations().get(node).executable.unwrap();
        match &ctx.executable(index).unwrap().kind {
            ExecutableKind::Compartment { connections } => connections.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_endpoint_rejected() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [ParticipantSpecification::external(Technology::H323, 1)];
        let err = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap_err();
        assert!(err.report().unwrap().contains(ReportKind::NotEnoughEndpoints));
    }

    #[test]
    fn test_single_existing_endpoint_is_booked_without_connections() {
        let mut catalog = ResourceCatalog::new();
        catalog.add_resource(Resource::new(ResourceId::new(10), "boardroom")).unwrap();
        catalog
            .add_resource(terminal(2, Some("t2"), vec![]).with_parent(ResourceId::new(10)))
            .unwrap();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [ParticipantSpecification::existing(ResourceId::new(2))];

        let node = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap();
        let booked: Vec<_> = ctx
            .reservations()
            .subtree(node)
            .into_iter()
            .filter_map(|child| match ctx.reservations().get(child).kind {
                ReservationKind::Resource { resource } => Some(resource),
                _ => None,
            })
            .collect();
        assert_eq!(booked.len(), 2);
        assert!(booked.contains(&ResourceId::new(10)));
        assert!(connections(&ctx, node).is_empty());
    }

    #[test]
    fn test_room_for_external_endpoints() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [
            ParticipantSpecification::external(Technology::H323, 1),
            ParticipantSpecification::external(Technology::Sip, 1),
        ];
        let node = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap();
        let compartment = ctx.reservations().get(node);
        assert_eq!(compartment.kind, ReservationKind::Compartment);
        let rooms: Vec<_> = compartment
            .children
            .iter()
            .filter(|child| matches!(ctx.reservations().get(**child).kind, ReservationKind::Room { .. }))
            .collect();
        assert_eq!(rooms.len(), 1);
        assert_eq!(connections(&ctx, node).len(), 2);

        let index = compartment.executable.unwrap();
        assert_eq!(ctx.executable(index).unwrap().dependencies.len(), 1);
    }

    #[test]
    fn test_direct_connection_uses_callee_alias() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [
            ParticipantSpecification::existing(ResourceId::new(3)),
            ParticipantSpecification::existing(ResourceId::new(2)),
        ];
        let node = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap();
        let connections = connections(&ctx, node);
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].agent.as_deref(), Some("t3"));
        assert_eq!(connections[0].alias.value, "420");
        assert_eq!(ctx.reserved_licenses(ResourceId::new(1), &day()), 0);
    }

    #[test]
    fn test_same_resource_twice_is_rejected() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [
            ParticipantSpecification::existing(ResourceId::new(2)),
            ParticipantSpecification::existing(ResourceId::new(2)),
        ];
        let err = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap_err();
        assert!(matches!(&err, Error::Scheduling(_)));
        assert!(err.report().unwrap().contains(ReportKind::ResourceRequestedMultipleTimes));
        assert_eq!(ctx.size(), 0);
    }

    #[test]
    fn test_terminal_joins_room_with_external_endpoints() {
        let catalog = catalog();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [
            ParticipantSpecification::external(Technology::H323, 3),
            ParticipantSpecification::existing(ResourceId::new(3)),
        ];
        let node = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap();
        assert_eq!(ctx.reserved_licenses(ResourceId::new(1), &day()), 4);
        let connections = connections(&ctx, node);
        assert_eq!(connections.len(), 4);
        assert!(connections.iter().all(|c| c.alias.value == "9500"));
    }

    #[test]
    fn test_no_room_provider() {
        let mut catalog = ResourceCatalog::new();
        catalog.add_resource(terminal(2, None, vec![])).unwrap();
        let mut ctx = AllocationContext::new(&catalog, day());
        let participants = [ParticipantSpecification::external(Technology::H323, 2)];
        let err = CompartmentReservationTask::new(&participants).allocate(&mut ctx).unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.kind, ReportKind::AllocatingCompartment);
        assert!(report.contains(ReportKind::NoAvailableRoom));
    }
}
