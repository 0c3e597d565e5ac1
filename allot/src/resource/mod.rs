//! Resources, technologies, aliases and capabilities.
//!
//! A [`Resource`] is a bookable thing: an MCU, a terminal, a recording box, a
//! number range. What it can do is described by its [`Capability`] list.

pub mod catalog;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::ValueProviderId;

pub use catalog::ResourceCatalog;

/// Identifier of a resource in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Creates a resource identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric identifier.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res:{}", self.0)
    }
}

/// A communication technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Technology {
    /// ITU-T H.323 videoconferencing.
    H323,
    /// Session Initiation Protocol.
    Sip,
    /// Adobe Connect web conferencing.
    AdobeConnect,
    /// Real-Time Messaging Protocol streaming.
    Rtmp,
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::H323 => "H323",
            Self::Sip => "SIP",
            Self::AdobeConnect => "ADOBE_CONNECT",
            Self::Rtmp => "RTMP",
        };
        f.write_str(name)
    }
}

/// Formats a technology set as `[H323, SIP]`.
#[must_use]
pub fn format_technologies(technologies: &BTreeSet<Technology>) -> String {
    let names: Vec<String> = technologies.iter().map(ToString::to_string).collect();
    format!("[{}]", names.join(", "))
}

/// Kind of a dialable alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AliasType {
    /// E.164 number reachable over H.323.
    H323E164,
    /// H.323 URI.
    H323Uri,
    /// H.323 IP address.
    H323Ip,
    /// SIP URI.
    SipUri,
    /// SIP IP address.
    SipIp,
    /// Adobe Connect meeting URL.
    AdobeConnectUri,
    /// Technology-neutral room name.
    RoomName,
}

impl AliasType {
    /// Returns the technology the alias type belongs to.
    ///
    /// `RoomName` is technology neutral and returns `None`.
    #[must_use]
    pub const fn technology(self) -> Option<Technology> {
        match self {
            Self::H323E164 | Self::H323Uri | Self::H323Ip => Some(Technology::H323),
            Self::SipUri | Self::SipIp => Some(Technology::Sip),
            Self::AdobeConnectUri => Some(Technology::AdobeConnect),
            Self::RoomName => None,
        }
    }
}

/// A concrete dialable identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias {
    /// The alias type.
    #[serde(rename = "type")]
    pub alias_type: AliasType,
    /// The alias value (number, URI, name).
    pub value: String,
}

impl Alias {
    /// Creates an alias.
    #[must_use]
    pub fn new(alias_type: AliasType, value: impl Into<String>) -> Self {
        Self {
            alias_type,
            value: value.into(),
        }
    }

    /// Returns the technology of the alias, if it has one.
    #[must_use]
    pub const fn technology(&self) -> Option<Technology> {
        self.alias_type.technology()
    }

    /// Returns true when the alias can be dialed with one of `technologies`.
    #[must_use]
    pub fn is_compatible_with(&self, technologies: &BTreeSet<Technology>) -> bool {
        self.technology()
            .is_some_and(|technology| technologies.contains(&technology))
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.alias_type, self.value)
    }
}

/// Template of an alias produced by an alias provider.
///
/// The literal `{value}` inside `value` is replaced by the allocated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTemplate {
    /// Type of the produced alias.
    #[serde(rename = "type")]
    pub alias_type: AliasType,
    /// Template text containing `{value}`.
    pub value: String,
}

impl AliasTemplate {
    /// Creates an alias template.
    #[must_use]
    pub fn new(alias_type: AliasType, value: impl Into<String>) -> Self {
        Self {
            alias_type,
            value: value.into(),
        }
    }

    /// Renders the template with an allocated value.
    ///
    /// # Examples
    ///
    /// ```
    /// use allot::resource::{AliasTemplate, AliasType};
    ///
    /// let template = AliasTemplate::new(AliasType::H323E164, "9{value}");
    /// assert_eq!(template.render("51").value, "951");
    /// ```
    #[must_use]
    pub fn render(&self, value: &str) -> Alias {
        Alias::new(self.alias_type, self.value.replace("{value}", value))
    }
}

/// Discriminant of a [`Capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// Can host virtual rooms.
    RoomProvider,
    /// Hands out aliases.
    AliasProvider,
    /// Is a standalone endpoint.
    StandaloneTerminal,
    /// Can record rooms.
    Recording,
}

/// Hosts virtual rooms up to a license limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomProviderCapability {
    /// Maximum number of concurrently used licenses.
    pub license_count: u32,
    /// Alias types every room hosted here must get.
    #[serde(default)]
    pub required_alias_types: Vec<AliasType>,
}

/// Hands out aliases whose values come from a value provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasProviderCapability {
    /// Provider of the underlying values.
    pub value_provider: ValueProviderId,
    /// Aliases produced for every allocated value.
    pub aliases: Vec<AliasTemplate>,
    /// Aliases can only be used for rooms on the owning resource.
    #[serde(default)]
    pub restricted_to_resource: bool,
    /// Allocated aliases stand for a permanent room on the owning resource.
    #[serde(default)]
    pub permanent_room: bool,
}

impl AliasProviderCapability {
    /// Returns the technologies of the produced aliases.
    #[must_use]
    pub fn technologies(&self) -> BTreeSet<Technology> {
        self.aliases
            .iter()
            .filter_map(|alias| alias.alias_type.technology())
            .collect()
    }

    /// Returns true when one of the produced aliases has one of the
    /// given technologies.
    #[must_use]
    pub fn provides_technology(&self, technologies: &BTreeSet<Technology>) -> bool {
        self.aliases.iter().any(|alias| {
            alias
                .alias_type
                .technology()
                .is_some_and(|technology| technologies.contains(&technology))
        })
    }

    /// Returns true when one of the produced aliases has one of the given types.
    #[must_use]
    pub fn provides_alias_type(&self, alias_types: &BTreeSet<AliasType>) -> bool {
        self.aliases
            .iter()
            .any(|alias| alias_types.contains(&alias.alias_type))
    }
}

/// A standalone endpoint with fixed aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalCapability {
    /// Aliases the terminal can be reached at.
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

/// Records rooms hosted on devices speaking one of the resource's
/// technologies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingCapability {}

/// A capability of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// See [`RoomProviderCapability`].
    RoomProvider(RoomProviderCapability),
    /// See [`AliasProviderCapability`].
    AliasProvider(AliasProviderCapability),
    /// See [`TerminalCapability`].
    StandaloneTerminal(TerminalCapability),
    /// See [`RecordingCapability`].
    Recording(RecordingCapability),
}

impl Capability {
    /// Returns the capability discriminant.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        match self {
            Self::RoomProvider(_) => CapabilityKind::RoomProvider,
            Self::AliasProvider(_) => CapabilityKind::AliasProvider,
            Self::StandaloneTerminal(_) => CapabilityKind::StandaloneTerminal,
            Self::Recording(_) => CapabilityKind::Recording,
        }
    }
}

/// A bookable resource.
///
/// # Examples
///
/// ```
/// use allot::resource::{Capability, Resource, ResourceId, RoomProviderCapability, Technology};
///
/// let mcu = Resource::new(ResourceId::new(1), "mcu")
///     .with_technology(Technology::H323)
///     .with_capability(Capability::RoomProvider(RoomProviderCapability {
///         license_count: 10,
///         required_alias_types: vec![],
///     }));
/// assert_eq!(mcu.room_provider().map(|c| c.license_count), Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    /// Catalog identifier.
    pub id: ResourceId,
    /// Human-readable name.
    pub name: String,
    /// Technologies the resource speaks.
    #[serde(default)]
    pub technologies: BTreeSet<Technology>,
    /// Whether the scheduler may allocate the resource.
    #[serde(default = "default_allocatable")]
    pub allocatable: bool,
    /// Resource that must be reserved together with this one.
    #[serde(default)]
    pub parent: Option<ResourceId>,
    /// Control agent the executor addresses device commands to.
    #[serde(default)]
    pub agent: Option<String>,
    /// Foreign domain owning the resource; local when absent.
    #[serde(default)]
    pub domain: Option<String>,
    /// What the resource can do. Written in YAML as single-key maps
    /// (`- room_provider: {...}`).
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub capabilities: Vec<Capability>,
}

fn default_allocatable() -> bool {
    true
}

impl Resource {
    /// Creates an allocatable local resource without capabilities.
    #[must_use]
    pub fn new(id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            technologies: BTreeSet::new(),
            allocatable: true,
            parent: None,
            agent: None,
            domain: None,
            capabilities: Vec::new(),
        }
    }

    /// Adds a technology.
    #[must_use]
    pub fn with_technology(mut self, technology: Technology) -> Self {
        self.technologies.insert(technology);
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Sets the parent resource.
    #[must_use]
    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the control agent.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Marks the resource as owned by a foreign domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets whether the scheduler may allocate the resource.
    #[must_use]
    pub fn with_allocatable(mut self, allocatable: bool) -> Self {
        self.allocatable = allocatable;
        self
    }

    /// Returns true if the resource has a capability of the given kind.
    #[must_use]
    pub fn has_capability(&self, kind: CapabilityKind) -> bool {
        self.capabilities.iter().any(|c| c.kind() == kind)
    }

    /// Returns the room provider capability, if any.
    #[must_use]
    pub fn room_provider(&self) -> Option<&RoomProviderCapability> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::RoomProvider(capability) => Some(capability),
            _ => None,
        })
    }

    /// Returns the standalone terminal capability, if any.
    #[must_use]
    pub fn terminal(&self) -> Option<&TerminalCapability> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::StandaloneTerminal(capability) => Some(capability),
            _ => None,
        })
    }

    /// Returns the recording capability, if any.
    #[must_use]
    pub fn recording(&self) -> Option<&RecordingCapability> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::Recording(capability) => Some(capability),
            _ => None,
        })
    }

    /// Returns all alias provider capabilities in declaration order.
    pub fn alias_providers(&self) -> impl Iterator<Item = &AliasProviderCapability> {
        self.capabilities.iter().filter_map(|c| match c {
            Capability::AliasProvider(capability) => Some(capability),
            _ => None,
        })
    }

    /// Returns true when the resource is owned by a foreign domain.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.domain.is_some()
    }

    /// Returns true when the resource supports every technology set, that is
    /// it intersects each of them.
    #[must_use]
    pub fn supports_all(&self, technology_sets: &[BTreeSet<Technology>]) -> bool {
        technology_sets
            .iter()
            .all(|set| set.is_empty() || !set.is_disjoint(&self.technologies))
    }
}
