//! Value allocation.
//!
//! A [`ValueAllocator`] is a value provider resolved against its catalog: the
//! chain of filtered providers is followed down to a pattern provider, whose
//! id becomes the namespace (scope) in which uniqueness is tracked.

use crate::error::{Error, Result, ValueUnavailableReason};
use crate::value::pattern::Pattern;
use crate::value::provider::{ValueFilter, ValueProvider, ValueProviderId};

/// A value handed out by a [`ValueAllocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedValue {
    /// The pattern value; uniqueness is tracked on it.
    pub raw: String,
    /// The value after the provider's filters.
    pub value: String,
}

/// A provider resolved for allocation.
#[derive(Debug, Clone)]
pub struct ValueAllocator {
    scope: ValueProviderId,
    patterns: Vec<Pattern>,
    allow_any_requested_value: bool,
    filters: Vec<ValueFilter>,
}

impl ValueAllocator {
    /// Resolves `id` against the provider table.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced provider does not exist, if filtered
    /// providers form a loop, or if a pattern is invalid.
    pub fn resolve(providers: &[ValueProvider], id: ValueProviderId) -> Result<Self> {
        let mut filters = Vec::new();
        let mut current = id;
        let mut visited = Vec::new();

        loop {
            if visited.contains(&current) {
                return Err(Error::Validation {
                    field: "value_provider".to_string(),
                    message: format!("filtered provider loop through {current}"),
                });
            }
            visited.push(current);

            let provider = usize::try_from(current.value())
                .ok()
                .and_then(|index| providers.get(index))
                .ok_or_else(|| Error::NotFound {
                    resource: format!("value provider {current}"),
                })?;

            match provider {
                ValueProvider::Filtered { source, filter } => {
                    filters.push(*filter);
                    current = *source;
                }
                ValueProvider::Pattern {
                    patterns,
                    allow_any_requested_value,
                } => {
                    let patterns = patterns
                        .iter()
                        .map(|p| Pattern::parse(p))
                        .collect::<Result<Vec<_>>>()?;
                    // Innermost filter runs first.
                    filters.reverse();
                    return Ok(Self {
                        scope: current,
                        patterns,
                        allow_any_requested_value: *allow_any_requested_value,
                        filters,
                    });
                }
            }
        }
    }

    /// Returns the namespace in which values of this provider are unique.
    #[must_use]
    pub const fn scope(&self) -> ValueProviderId {
        self.scope
    }

    /// Applies the provider's filters to a raw value.
    #[must_use]
    pub fn filter(&self, raw: &str) -> String {
        self.filters
            .iter()
            .fold(raw.to_string(), |value, filter| filter.apply(&value))
    }

    /// Allocates a value.
    ///
    /// With a requested value, the value must match one of the patterns
    /// (unless any value is allowed) and must not be taken. Without one, the
    /// first untaken candidate in pattern order is returned. `is_taken`
    /// receives the raw value, so filtered and unfiltered providers sharing
    /// a scope never hand out the same underlying value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueNotAvailable`] when a requested value cannot be
    /// used and [`Error::ValuesExhausted`] when every candidate is taken.
    ///
    /// # Examples
    ///
    /// ```
    /// use allot::value::{ValueAllocator, ValueProvider, ValueProviderId};
    ///
    /// let providers = vec![ValueProvider::patterns(["95{digit:1}"])];
    /// let allocator = ValueAllocator::resolve(&providers, ValueProviderId::new(0)).unwrap();
    /// let allocated = allocator.allocate(None, |v| v == "950").unwrap();
    /// assert_eq!(allocated.value, "951");
    /// ```
    pub fn allocate<F>(&self, requested: Option<&str>, is_taken: F) -> Result<AllocatedValue>
    where
        F: Fn(&str) -> bool,
    {
        if let Some(requested) = requested {
            if !self.allow_any_requested_value && !self.patterns.iter().any(|p| p.matches(requested)) {
                return Err(Error::ValueNotAvailable {
                    value: requested.to_string(),
                    reason: ValueUnavailableReason::PatternMismatch,
                });
            }
            if is_taken(requested) {
                return Err(Error::ValueNotAvailable {
                    value: requested.to_string(),
                    reason: ValueUnavailableReason::AlreadyAllocated,
                });
            }
            return Ok(self.allocated(requested.to_string()));
        }

        self.patterns
            .iter()
            .flat_map(Pattern::values)
            .find(|raw| !is_taken(raw))
            .map(|raw| self.allocated(raw))
            .ok_or(Error::ValuesExhausted {
                provider: self.scope,
            })
    }

    fn allocated(&self, raw: String) -> AllocatedValue {
        AllocatedValue {
            value: self.filter(&raw),
            raw,
        }
    }
}
