//! Unique value generation.
//!
//! Value providers hand out strings (numbers, room names, URLs) that are
//! unique within the provider's namespace for any overlapping slot.

pub mod allocator;
pub mod pattern;
pub mod provider;

#[cfg(test)]
mod pattern_proptests;

pub use allocator::{AllocatedValue, ValueAllocator};
pub use pattern::Pattern;
pub use provider::{ValueFilter, ValueProvider, ValueProviderId};
