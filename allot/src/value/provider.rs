//! Value provider definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::pattern::Pattern;

/// Identifier of a value provider within the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueProviderId(u32);

impl ValueProviderId {
    /// Creates a provider identifier.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ValueProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vp:{}", self.0)
    }
}

/// Transformation applied by a filtered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFilter {
    /// Lowercases the value and replaces anything outside `[a-z0-9-_.]`
    /// with `-`, producing a URL path segment.
    ConvertToUrl,
}

impl ValueFilter {
    /// Applies the filter.
    ///
    /// # Examples
    ///
    /// ```
    /// use allot::value::provider::ValueFilter;
    ///
    /// assert_eq!(ValueFilter::ConvertToUrl.apply("My Room #1"), "my-room--1");
    /// ```
    #[must_use]
    pub fn apply(self, value: &str) -> String {
        match self {
            Self::ConvertToUrl => value
                .chars()
                .map(|c| {
                    let c = c.to_ascii_lowercase();
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                        c
                    } else {
                        '-'
                    }
                })
                .collect(),
        }
    }
}

/// A source of unique string values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueProvider {
    /// Values generated from patterns, tried in order.
    Pattern {
        /// Pattern sources; see [`Pattern`].
        patterns: Vec<String>,
        /// Accept any requested value, not only pattern matches.
        #[serde(default)]
        allow_any_requested_value: bool,
    },
    /// Values of another provider passed through a filter.
    ///
    /// Uniqueness is tracked in the namespace of the source provider.
    Filtered {
        /// The provider supplying raw values.
        source: ValueProviderId,
        /// The transformation applied to each value.
        filter: ValueFilter,
    },
}

impl ValueProvider {
    /// Creates a pattern provider.
    #[must_use]
    pub fn patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Pattern {
            patterns: patterns.into_iter().map(Into::into).collect(),
            allow_any_requested_value: false,
        }
    }

    /// Checks that every pattern of the provider parses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for the first bad pattern and
    /// [`Error::Validation`] for a pattern provider without patterns.
    pub fn validate(&self) -> Result<()> {
        if let Self::Pattern { patterns, .. } = self {
            if patterns.is_empty() {
                return Err(Error::Validation {
                    field: "patterns".to_string(),
                    message: "pattern provider needs at least one pattern".to_string(),
                });
            }
            for pattern in patterns {
                Pattern::parse(pattern)?;
            }
        }
        Ok(())
    }
}
