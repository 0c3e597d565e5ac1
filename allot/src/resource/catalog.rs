//! The resource catalog.
//!
//! The catalog owns the resource and value provider definitions together with
//! the bookings of every committed allocation. Availability questions asked
//! during scheduling combine those bookings with what the current
//! [`AllocationContext`] has provisionally taken.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::reservation::{ReservationId, ReservationKind, StoredReservation};
use crate::resource::{CapabilityKind, Resource, ResourceId, Technology};
use crate::scheduler::context::AllocationContext;
use crate::scheduler::Allocation;
use crate::slot::Slot;
use crate::value::{ValueAllocator, ValueProvider, ValueProviderId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum BookedItem {
    Resource(ResourceId),
    Licenses { resource: ResourceId, count: u32 },
    Value { scope: ValueProviderId, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Booking {
    owner: ReservationId,
    slot: Slot,
    item: BookedItem,
}

impl Booking {
    fn from_kind(owner: ReservationId, slot: Slot, kind: &ReservationKind) -> Option<Self> {
        let item = match kind {
            ReservationKind::Resource { resource } => BookedItem::Resource(*resource),
            ReservationKind::Room {
                resource,
                license_count,
            } => BookedItem::Licenses {
                resource: *resource,
                count: *license_count,
            },
            ReservationKind::Value { scope, raw, .. } => BookedItem::Value {
                scope: *scope,
                value: raw.clone(),
            },
            _ => return None,
        };
        Some(Self { owner, slot, item })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    value_providers: Vec<ValueProvider>,
    #[serde(default)]
    resources: Vec<Resource>,
}

/// Resources, value providers and committed bookings.
///
/// # Examples
///
/// ```
/// use allot::resource::ResourceCatalog;
///
/// let catalog = ResourceCatalog::from_yaml_str(r"
/// value_providers:
///   - type: pattern
///     patterns: ['95{digit:3}']
/// resources:
///   - id: 1
///     name: mcu
///     technologies: [H323]
///     capabilities:
///       - room_provider:
///           license_count: 10
/// ").unwrap();
/// assert_eq!(catalog.resources().count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    value_providers: Vec<ValueProvider>,
    bookings: Vec<Booking>,
}

impl ResourceCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the definitions are
    /// inconsistent (duplicate ids, dangling references, bad patterns).
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::new();
        for provider in file.value_providers {
            catalog.add_value_provider(provider)?;
        }
        for resource in file.resources {
            catalog.add_resource(resource)?;
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Loads a catalog from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        log::debug!("Loading resource catalog from {}", path.display());
        Self::from_yaml_str(&contents)
    }

    /// Registers a value provider and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is invalid.
    pub fn add_value_provider(&mut self, provider: ValueProvider) -> Result<ValueProviderId> {
        provider.validate()?;
        let id = u32::try_from(self.value_providers.len()).map_err(|_| Error::Validation {
            field: "value_providers".to_string(),
            message: "too many value providers".to_string(),
        })?;
        self.value_providers.push(provider);
        Ok(ValueProviderId::new(id))
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is taken or an alias provider refers to an
    /// unknown value provider.
    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        if self.index.contains_key(&resource.id) {
            return Err(Error::Validation {
                field: "resources".to_string(),
                message: format!("duplicate resource id {}", resource.id),
            });
        }
        for capability in resource.alias_providers() {
            self.value_allocator(capability.value_provider)?;
        }
        self.index.insert(resource.id, self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    /// Checks cross references between resources.
    ///
    /// # Errors
    ///
    /// Returns an error if a parent is unknown or parents form a loop.
    pub fn validate(&self) -> Result<()> {
        for resource in &self.resources {
            let mut seen = BTreeSet::from([resource.id]);
            let mut current = resource.parent;
            while let Some(parent) = current {
                let parent_resource = self.get(parent)?;
                if !seen.insert(parent) {
                    return Err(Error::Validation {
                        field: "parent".to_string(),
                        message: format!("parent loop through {parent}"),
                    });
                }
                current = parent_resource.parent;
            }
        }
        Ok(())
    }

    /// Returns a resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownResource`] if the id is not in the catalog.
    pub fn get(&self, id: ResourceId) -> Result<&Resource> {
        self.index
            .get(&id)
            .map(|&i| &self.resources[i])
            .ok_or(Error::UnknownResource(id))
    }

    /// Iterates over resources in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Resolves a value provider for allocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider or its source does not exist.
    pub fn value_allocator(&self, id: ValueProviderId) -> Result<ValueAllocator> {
        ValueAllocator::resolve(&self.value_providers, id)
    }

    /// Returns allocatable resources with a capability of `kind` supporting
    /// every technology set, in registration order.
    ///
    /// For alias providers the technologies of the produced aliases count as
    /// well as the resource's own.
    #[must_use]
    pub fn find_by_capability(
        &self,
        kind: CapabilityKind,
        technology_sets: &[BTreeSet<Technology>],
    ) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|resource| resource.allocatable && resource.has_capability(kind))
            .filter(|resource| {
                if kind == CapabilityKind::AliasProvider {
                    let mut technologies = resource.technologies.clone();
                    for capability in resource.alias_providers() {
                        technologies.extend(capability.technologies());
                    }
                    technology_sets
                        .iter()
                        .all(|set| set.is_empty() || !set.is_disjoint(&technologies))
                } else {
                    resource.supports_all(technology_sets)
                }
            })
            .collect()
    }

    fn active_bookings<'b>(
        &'b self,
        slot: &'b Slot,
        ctx: &'b AllocationContext<'_>,
    ) -> impl Iterator<Item = &'b Booking> + 'b {
        let superseded = ctx.superseded();
        self.bookings
            .iter()
            .filter(move |booking| Some(booking.owner) != superseded && booking.slot.overlaps(slot))
    }

    /// Returns true when the resource can be exclusively booked for `slot`.
    #[must_use]
    pub fn is_available(&self, resource: ResourceId, slot: &Slot, ctx: &AllocationContext<'_>) -> bool {
        let booked = self
            .active_bookings(slot, ctx)
            .any(|booking| booking.item == BookedItem::Resource(resource));
        !booked && !ctx.is_resource_reserved(resource, slot)
    }

    /// Returns the licenses of `resource` used in `slot`, counting committed
    /// bookings and the context's provisional ones.
    #[must_use]
    pub fn used_licenses(&self, resource: ResourceId, slot: &Slot, ctx: &AllocationContext<'_>) -> u32 {
        let committed: u32 = self
            .active_bookings(slot, ctx)
            .filter_map(|booking| match &booking.item {
                BookedItem::Licenses { resource: r, count } if *r == resource => Some(*count),
                _ => None,
            })
            .sum();
        committed + ctx.reserved_licenses(resource, slot)
    }

    /// Returns the room licenses still free on a room provider in `slot`.
    #[must_use]
    pub fn available_licenses(&self, resource: &Resource, slot: &Slot, ctx: &AllocationContext<'_>) -> u32 {
        resource.room_provider().map_or(0, |capability| {
            capability
                .license_count
                .saturating_sub(self.used_licenses(resource.id, slot, ctx))
        })
    }

    /// Returns true when `value` is taken in the `scope` namespace for `slot`.
    #[must_use]
    pub fn is_value_taken(
        &self,
        scope: ValueProviderId,
        value: &str,
        slot: &Slot,
        ctx: &AllocationContext<'_>,
    ) -> bool {
        let committed = self.active_bookings(slot, ctx).any(|booking| {
            matches!(&booking.item, BookedItem::Value { scope: s, value: v } if *s == scope && v == value)
        });
        committed || ctx.is_value_consumed(scope, value, slot)
    }

    /// Records the bookings of a successful allocation under `owner`.
    pub fn commit(&mut self, owner: ReservationId, allocation: &Allocation) {
        let before = self.bookings.len();
        self.bookings.extend(
            allocation
                .reservations
                .iter()
                .filter_map(|(_, node)| Booking::from_kind(owner, node.slot, &node.kind)),
        );
        log::debug!(
            "Committed {} bookings for {owner}",
            self.bookings.len() - before
        );
    }

    /// Records the bookings of persisted reservations under `owner`, used to
    /// rebuild the catalog state after a restart.
    pub fn restore(&mut self, owner: ReservationId, reservations: &[StoredReservation]) {
        self.bookings.extend(
            reservations
                .iter()
                .filter_map(|stored| Booking::from_kind(owner, stored.slot, &stored.kind)),
        );
    }

    /// Drops every booking of `owner`.
    pub fn release(&mut self, owner: ReservationId) {
        let before = self.bookings.len();
        self.bookings.retain(|booking| booking.owner != owner);
        log::debug!("Released {} bookings of {owner}", before - self.bookings.len());
    }

    /// Returns the number of committed bookings.
    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }
}
