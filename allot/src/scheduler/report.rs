//! Scheduler reports.
//!
//! Every reservation task describes what it tried in a tree of reports, so a
//! failed allocation explains each candidate that was rejected and why.

use std::fmt;

use serde::Serialize;

/// What a report node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Allocating a value from a provider.
    AllocatingValue,
    /// Allocating an alias.
    AllocatingAlias,
    /// Allocating a concrete resource.
    AllocatingResource,
    /// Allocating a virtual room.
    AllocatingRoom,
    /// Allocating a compartment.
    AllocatingCompartment,
    /// Allocating a recording service.
    AllocatingRecording,
    /// Reusing an existing reservation.
    ReusingReservation,
    /// A candidate was tried.
    TryingCandidate,
    /// The resource is not in the catalog.
    ResourceNotFound,
    /// The resource is marked as not allocatable.
    ResourceNotAllocatable,
    /// The resource is already booked in the slot.
    ResourceNotAvailable,
    /// A resource appears twice in one compartment.
    ResourceRequestedMultipleTimes,
    /// The resource lacks a required capability.
    ResourceMissingCapability,
    /// A requested value cannot be allocated.
    ValueNotAvailable,
    /// A provider ran out of values.
    ValuesExhausted,
    /// No alias provider can satisfy the request.
    NoAvailableAliasProvider,
    /// No room provider can host the room.
    NoAvailableRoom,
    /// No device can record the room.
    NoAvailableRecording,
    /// A compartment needs at least two endpoints.
    NotEnoughEndpoints,
    /// The reservation to reuse is not available.
    ReservationNotAvailable,
    /// A foreign domain failed the request.
    RemoteDomainFailed,
    /// The request itself is malformed.
    InvalidRequest,
}

impl ReportKind {
    /// Returns true for kinds that describe a failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(
            self,
            Self::AllocatingValue
                | Self::AllocatingAlias
                | Self::AllocatingResource
                | Self::AllocatingRoom
                | Self::AllocatingCompartment
                | Self::AllocatingRecording
                | Self::ReusingReservation
                | Self::TryingCandidate
        )
    }

    const fn label(self) -> &'static str {
        match self {
            Self::AllocatingValue => "Allocating value",
            Self::AllocatingAlias => "Allocating alias",
            Self::AllocatingResource => "Allocating resource",
            Self::AllocatingRoom => "Allocating room",
            Self::AllocatingCompartment => "Allocating compartment",
            Self::AllocatingRecording => "Allocating recording",
            Self::ReusingReservation => "Reusing reservation",
            Self::TryingCandidate => "Trying",
            Self::ResourceNotFound => "Resource not found",
            Self::ResourceNotAllocatable => "Resource is not allocatable",
            Self::ResourceNotAvailable => "Resource is not available",
            Self::ResourceRequestedMultipleTimes => "Resource is requested multiple times",
            Self::ResourceMissingCapability => "Resource lacks capability",
            Self::ValueNotAvailable => "Value is not available",
            Self::ValuesExhausted => "No value is available",
            Self::NoAvailableAliasProvider => "No alias provider is available",
            Self::NoAvailableRoom => "No room provider is available",
            Self::NoAvailableRecording => "No recording device is available",
            Self::NotEnoughEndpoints => "Not enough endpoints",
            Self::ReservationNotAvailable => "Reservation is not available",
            Self::RemoteDomainFailed => "Foreign domain failed",
            Self::InvalidRequest => "Invalid request",
        }
    }
}

/// A node of the report tree.
///
/// # Examples
///
/// ```
/// use allot::scheduler::report::{ReportKind, SchedulerReport};
///
/// let mut report = SchedulerReport::new(ReportKind::AllocatingRoom, "technologies [H323]");
/// report.push(SchedulerReport::new(ReportKind::NoAvailableRoom, ""));
/// assert!(report.contains(ReportKind::NoAvailableRoom));
/// assert!(report.to_string().contains("No room provider"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    /// What the node describes.
    pub kind: ReportKind,
    /// Free-form detail (resource names, values, technologies).
    pub detail: String,
    /// Nested reports in the order they were produced.
    pub children: Vec<SchedulerReport>,
}

impl SchedulerReport {
    /// Creates a report without children.
    #[must_use]
    pub fn new(kind: ReportKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            children: Vec::new(),
        }
    }

    /// Adds a child report.
    pub fn push(&mut self, child: SchedulerReport) {
        self.children.push(child);
    }

    /// Returns the report with a child appended.
    #[must_use]
    pub fn with_child(mut self, child: SchedulerReport) -> Self {
        self.push(child);
        self
    }

    /// Returns true when the report or any descendant has `kind`.
    #[must_use]
    pub fn contains(&self, kind: ReportKind) -> bool {
        self.find(kind).is_some()
    }

    /// Finds the first report of `kind` in pre-order.
    #[must_use]
    pub fn find(&self, kind: ReportKind) -> Option<&SchedulerReport> {
        if self.kind == kind {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(kind))
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}- {}", "", self.kind.label(), indent = depth * 2)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        for child in &self.children {
            writeln!(f)?;
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for SchedulerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
