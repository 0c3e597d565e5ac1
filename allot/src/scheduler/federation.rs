//! Inter-domain resource allocation.
//!
//! Resources owned by a foreign domain are not booked locally; the scheduler
//! asks the owning domain through a [`DomainConnector`].

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::ResourceId;
use crate::slot::Slot;

/// Who is asking a foreign domain for a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterInfo {
    /// Description of the reservation request, if any.
    pub description: Option<String>,
}

/// A reservation granted by a foreign domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReservation {
    /// The granting domain.
    pub domain: String,
    /// The domain's reference for the reservation.
    pub reference: String,
}

/// Connection to foreign domains.
#[cfg_attr(test, mockall::automock)]
pub trait DomainConnector: Send + Sync {
    /// Asks `domain` to allocate `resource` for `slot`.
    ///
    /// # Errors
    ///
    /// Implementations return [`crate::Error::ConnectFailure`] when the domain
    /// cannot be reached or refuses the request.
    fn allocate_remote_resource(
        &self,
        domain: &str,
        slot: &Slot,
        resource: ResourceId,
        requester: &RequesterInfo,
    ) -> Result<RemoteReservation>;
}
