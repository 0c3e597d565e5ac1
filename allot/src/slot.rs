//! Time slots.
//!
//! A [`Slot`] is a half-open interval `[start, end)` of UTC instants. Every
//! reservation and executable lives inside one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Error returned when constructing an invalid slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSlotError {
    /// The rejected start instant.
    pub start: DateTime<Utc>,
    /// The rejected end instant.
    pub end: DateTime<Utc>,
    /// Why the slot was rejected.
    pub reason: String,
}

impl fmt::Display for InvalidSlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid slot {}/{}: {}", self.start, self.end, self.reason)
    }
}

impl std::error::Error for InvalidSlotError {}

/// A half-open time interval `[start, end)`.
///
/// # Examples
///
/// ```
/// use allot::slot::Slot;
///
/// let slot: Slot = "2012-01-01T12:00:00Z/2012-01-01T14:00:00Z".parse().unwrap();
/// let inner: Slot = "2012-01-01T12:30:00Z/2012-01-01T13:00:00Z".parse().unwrap();
/// assert!(slot.contains(&inner));
/// assert!(slot.overlaps(&inner));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSlot", into = "RawSlot")]
pub struct Slot {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RawSlot {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawSlot> for Slot {
    type Error = InvalidSlotError;

    fn try_from(raw: RawSlot) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl From<Slot> for RawSlot {
    fn from(slot: Slot) -> Self {
        Self {
            start: slot.start,
            end: slot.end,
        }
    }
}

impl Slot {
    /// Creates a new slot.
    ///
    /// # Errors
    ///
    /// Returns an error if `start` lies after `end`. Empty slots
    /// (`start == end`) are accepted.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidSlotError> {
        if start > end {
            return Err(InvalidSlotError {
                start,
                end,
                reason: "start must not be after end".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a slot starting at `start` and lasting `duration`.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration is negative or overflows.
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Result<Self, InvalidSlotError> {
        let end = start
            .checked_add_signed(duration)
            .ok_or_else(|| InvalidSlotError {
                start,
                end: start,
                reason: "duration overflows".to_string(),
            })?;
        Self::new(start, end)
    }

    /// Returns the inclusive start instant.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the exclusive end instant.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns the length of the slot.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns true when the slot has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns true when `other` lies entirely within this slot.
    #[must_use]
    pub fn contains(&self, other: &Slot) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns true when `instant` lies within `[start, end)`.
    #[must_use]
    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Returns true when the two slots share at least one instant.
    ///
    /// Touching slots (`a.end == b.start`) do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns a copy of the slot ending at `end`, clamped to never end
    /// before it starts.
    #[must_use]
    pub fn truncated_at(&self, end: DateTime<Utc>) -> Self {
        let end = end.clamp(self.start, self.end);
        Self {
            start: self.start,
            end,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

impl FromStr for Slot {
    type Err = crate::Error;

    /// Parses `START/END` with both instants in RFC 3339.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s.split_once('/').ok_or_else(|| crate::Error::Validation {
            field: "slot".to_string(),
            message: format!("expected START/END, got '{s}'"),
        })?;
        let parse = |text: &str| {
            DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| crate::Error::Validation {
                    field: "slot".to_string(),
                    message: format!("invalid instant '{text}': {e}"),
                })
        };
        Ok(Self::new(parse(start)?, parse(end)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(s: &str) -> Slot {
        s.parse().unwrap()
    }

    #[test]
    fn test_slot_rejects_reversed_bounds() {
        let start = Utc::now();
        let result = Slot::new(start, start - Duration::hours(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_slot_allowed() {
        let now = Utc::now();
        let slot = Slot::new(now, now).unwrap();
        assert!(slot.is_empty());
        assert!(!slot.contains_instant(now));
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = slot("2012-01-01T12:00:00Z/2012-01-01T14:00:00Z");
        let b = slot("2012-01-01T14:00:00Z/2012-01-01T16:00:00Z");
        let c = slot("2012-01-01T13:59:00Z/2012-01-01T16:00:00Z");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_contains() {
        let outer = slot("2012-01-01T00:00:00Z/2012-12-31T00:00:00Z");
        let inner = slot("2012-06-01T00:00:00Z/2012-06-02T00:00:00Z");
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn test_truncated_at_clamps() {
        let s = slot("2012-01-01T12:00:00Z/2012-01-01T14:00:00Z");
        let cut = s.truncated_at(slot("2012-01-01T13:00:00Z/2012-01-01T13:00:00Z").start());
        assert_eq!(cut.duration(), Duration::hours(1));
        let early = s.truncated_at(s.start() - Duration::hours(5));
        assert!(early.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-slot".parse::<Slot>().is_err());
        assert!("2012-01-01T14:00:00Z/2012-01-01T12:00:00Z"
            .parse::<Slot>()
            .is_err());
    }

    #[test]
    fn test_serde_validates_bounds() {
        let json = r#"{"start":"2012-01-01T14:00:00Z","end":"2012-01-01T12:00:00Z"}"#;
        assert!(serde_json::from_str::<Slot>(json).is_err());

        let s = slot("2012-01-01T12:00:00Z/2012-01-01T14:00:00Z");
        let back: Slot = serde_json::from_str(&serde_json::to_string(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
