//! What a reservation request asks for.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::reservation::ReservationId;
use crate::resource::{Alias, AliasType, ResourceId, Technology};
use crate::value::ValueProviderId;

/// A request for a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueSpecification {
    /// The provider to allocate from.
    pub provider: ValueProviderId,
    /// A specific value, if the caller wants one.
    #[serde(default)]
    pub requested: Option<String>,
}

/// A request for an alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasSpecification {
    /// Acceptable technologies; any when empty.
    #[serde(default)]
    pub technologies: BTreeSet<Technology>,
    /// Acceptable alias types; any when empty.
    #[serde(default)]
    pub alias_types: BTreeSet<AliasType>,
    /// A specific value, if the caller wants one.
    #[serde(default)]
    pub value: Option<String>,
    /// Resource the alias will be used with.
    #[serde(default)]
    pub target_resource: Option<ResourceId>,
    /// The alias stands for a permanent room.
    #[serde(default)]
    pub permanent_room: bool,
}

impl AliasSpecification {
    /// Creates a specification for an alias of the given type.
    #[must_use]
    pub fn of_type(alias_type: AliasType) -> Self {
        Self {
            alias_types: BTreeSet::from([alias_type]),
            ..Self::default()
        }
    }

    /// Creates a specification for an alias of the given technology.
    #[must_use]
    pub fn of_technology(technology: Technology) -> Self {
        Self {
            technologies: BTreeSet::from([technology]),
            ..Self::default()
        }
    }

    /// Sets the requested value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Sets the target resource.
    #[must_use]
    pub fn with_target_resource(mut self, resource: ResourceId) -> Self {
        self.target_resource = Some(resource);
        self
    }
}

/// A request for a virtual room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomSpecification {
    /// Technologies the room must support; each must be served.
    pub technologies: BTreeSet<Technology>,
    /// Licenses the room needs.
    pub participant_count: u32,
    /// A specific device to host the room.
    #[serde(default)]
    pub device: Option<ResourceId>,
    /// Additional aliases the room should get.
    #[serde(default)]
    pub aliases: Vec<AliasSpecification>,
    /// Record the room.
    #[serde(default)]
    pub recording: bool,
    /// Room name announced to the device.
    #[serde(default)]
    pub name: Option<String>,
}

/// One participant of a compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticipantSpecification {
    /// Endpoints known only by technology.
    External {
        /// Technologies of the endpoints.
        technologies: BTreeSet<Technology>,
        /// Number of such endpoints.
        #[serde(default = "default_count")]
        count: u32,
        /// Alias the endpoint can be called at.
        #[serde(default)]
        alias: Option<Alias>,
    },
    /// A concrete endpoint resource from the catalog.
    Existing {
        /// The endpoint resource.
        resource: ResourceId,
    },
}

fn default_count() -> u32 {
    1
}

impl ParticipantSpecification {
    /// Creates an external participant of one technology.
    #[must_use]
    pub fn external(technology: Technology, count: u32) -> Self {
        Self::External {
            technologies: BTreeSet::from([technology]),
            count,
            alias: None,
        }
    }

    /// Creates a participant backed by a catalog resource.
    #[must_use]
    pub const fn existing(resource: ResourceId) -> Self {
        Self::Existing { resource }
    }
}

/// What a reservation request asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Specification {
    /// A single value.
    Value(ValueSpecification),
    /// An alias.
    Alias(AliasSpecification),
    /// Exclusive use of a resource.
    Resource {
        /// The resource.
        resource: ResourceId,
    },
    /// A virtual room.
    Room(RoomSpecification),
    /// Endpoints connected together.
    Compartment {
        /// The participants.
        participants: Vec<ParticipantSpecification>,
    },
    /// Reuse of a persisted reservation.
    Reuse {
        /// The reservation to reuse.
        reservation: ReservationId,
    },
}
