//! Reservation trees.
//!
//! A successful allocation yields a tree of reservations: a root (the
//! specification the caller asked for) with children for everything it needed
//! (aliases, values, rooms, endpoint resources). Trees are stored in an arena
//! and nodes are addressed by [`NodeId`]. Once persisted, every reservation
//! gets a database [`ReservationId`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executable::ExecutableId;
use crate::resource::{Alias, ResourceId};
use crate::slot::Slot;
use crate::value::ValueProviderId;

/// Database identifier of a persisted reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub i64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsv:{}", self.0)
    }
}

/// Arena index of a reservation within one [`ReservationTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// What a reservation holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReservationKind {
    /// A value from a provider namespace.
    Value {
        /// Namespace in which the value is unique.
        scope: ValueProviderId,
        /// The pattern value booked in the namespace.
        raw: String,
        /// The allocated value after the provider's filters.
        value: String,
    },
    /// Aliases rendered by an alias provider; the value is a child.
    Alias {
        /// Resource owning the alias provider capability.
        resource: ResourceId,
        /// The value the aliases were rendered from.
        value: String,
        /// The rendered aliases.
        aliases: Vec<Alias>,
    },
    /// Exclusive use of a resource.
    Resource {
        /// The booked resource.
        resource: ResourceId,
    },
    /// Licenses on a room provider.
    Room {
        /// The device hosting the room.
        resource: ResourceId,
        /// Licenses taken by the room.
        license_count: u32,
    },
    /// A set of endpoints connected together.
    Compartment,
    /// Reuse of a previously persisted reservation.
    Existing {
        /// The reused reservation.
        reused: ReservationId,
    },
    /// A resource granted by a foreign domain.
    Remote {
        /// The foreign domain.
        domain: String,
        /// Reference returned by the foreign domain.
        reference: String,
    },
}

impl ReservationKind {
    /// Returns a short name of the kind, used in logs and reports.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Value { .. } => "value",
            Self::Alias { .. } => "alias",
            Self::Resource { .. } => "resource",
            Self::Room { .. } => "room",
            Self::Compartment => "compartment",
            Self::Existing { .. } => "existing",
            Self::Remote { .. } => "remote",
        }
    }

    /// Returns the concrete resource exclusively held by the reservation.
    #[must_use]
    pub const fn exclusive_resource(&self) -> Option<ResourceId> {
        match self {
            Self::Resource { resource } => Some(*resource),
            _ => None,
        }
    }
}

/// A node of a [`ReservationTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// The slot the reservation is valid for.
    pub slot: Slot,
    /// What the reservation holds.
    pub kind: ReservationKind,
    /// Parent node, if the reservation is a child.
    pub parent: Option<NodeId>,
    /// Child nodes in insertion order.
    pub children: Vec<NodeId>,
    /// Index of the executable created for this reservation.
    pub executable: Option<usize>,
}

/// Arena of reservations forming a forest.
///
/// # Examples
///
/// ```
/// use allot::reservation::{ReservationKind, ReservationTree};
/// use allot::resource::ResourceId;
/// use allot::slot::Slot;
///
/// let slot: Slot = "2012-01-01T12:00:00Z/2012-01-01T14:00:00Z".parse().unwrap();
/// let mut tree = ReservationTree::new();
/// let root = tree.add(slot, ReservationKind::Compartment);
/// let child = tree.add(slot, ReservationKind::Resource { resource: ResourceId::new(1) });
/// tree.add_child(root, child).unwrap();
/// assert_eq!(tree.get(child).parent, Some(root));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationTree {
    nodes: Vec<Reservation>,
}

impl ReservationTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a parentless node.
    pub fn add(&mut self, slot: Slot, kind: ReservationKind) -> NodeId {
        self.nodes.push(Reservation {
            slot,
            kind,
            parent: None,
            children: Vec::new(),
            executable: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Returns a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree.
    #[must_use]
    pub fn get(&self, id: NodeId) -> &Reservation {
        &self.nodes[id.0]
    }

    /// Returns a node if it exists.
    #[must_use]
    pub fn try_get(&self, id: NodeId) -> Option<&Reservation> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Reservation> {
        self.nodes.get_mut(id.0).ok_or_else(|| Error::Internal(format!("unknown reservation node {}", id.0)))
    }

    /// Links `executable` to a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn set_executable(&mut self, id: NodeId, executable: usize) -> Result<()> {
        self.node_mut(id)?.executable = Some(executable);
        Ok(())
    }

    /// Attaches `child` under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the child already has a parent, if the
    /// link would be a self-loop, or if the child's slot is not contained in
    /// the parent's slot.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if parent == child {
            return Err(Error::Validation {
                field: "reservation".to_string(),
                message: "reservation cannot be its own child".to_string(),
            });
        }
        let parent_slot = self.node_mut(parent)?.slot;
        let child_node = self.node_mut(child)?;
        if child_node.parent.is_some() {
            return Err(Error::Validation {
                field: "reservation".to_string(),
                message: format!("reservation {} already has a parent", child.0),
            });
        }
        if !parent_slot.contains(&child_node.slot) {
            return Err(Error::Validation {
                field: "reservation".to_string(),
                message: format!("child slot {} is outside parent slot {parent_slot}", child_node.slot),
            });
        }
        child_node.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Detaches `child` from `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `child` is not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.try_get(child).and_then(|node| node.parent) != Some(parent) {
            return Err(Error::Validation {
                field: "reservation".to_string(),
                message: format!("reservation {} is not a child of {}", child.0, parent.0),
            });
        }
        self.node_mut(parent)?.children.retain(|c| *c != child);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    /// Iterates over all nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Reservation)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Returns the nodes without a parent.
    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// Returns `id` and all of its descendants in pre-order.
    #[must_use]
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.try_get(current) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Drops every node with an index `>= len` and every link pointing to a
    /// dropped node.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
        for node in &mut self.nodes {
            if node.parent.is_some_and(|p| p.0 >= len) {
                node.parent = None;
            }
            node.children.retain(|c| c.0 < len);
        }
    }

    /// Drops the executable link of every node pointing at an executable
    /// index `>= len`.
    pub(crate) fn truncate_executables(&mut self, len: usize) {
        for node in &mut self.nodes {
            if node.executable.is_some_and(|e| e >= len) {
                node.executable = None;
            }
        }
    }

    /// Finds two nodes exclusively holding the same resource in overlapping
    /// slots.
    #[must_use]
    pub fn find_resource_conflict(&self) -> Option<(NodeId, NodeId)> {
        let held: Vec<(NodeId, ResourceId, Slot)> = self
            .iter()
            .filter_map(|(id, node)| node.kind.exclusive_resource().map(|r| (id, r, node.slot)))
            .collect();
        for (i, (a, resource_a, slot_a)) in held.iter().enumerate() {
            for (b, resource_b, slot_b) in &held[i + 1..] {
                if resource_a == resource_b && slot_a.overlaps(slot_b) {
                    return Some((*a, *b));
                }
            }
        }
        None
    }
}

/// A reservation loaded from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReservation {
    /// Database identifier.
    pub id: ReservationId,
    /// Parent reservation, if any.
    pub parent: Option<ReservationId>,
    /// Validity slot.
    pub slot: Slot,
    /// What the reservation holds.
    pub kind: ReservationKind,
    /// Executable created for the reservation.
    pub executable: Option<ExecutableId>,
}
