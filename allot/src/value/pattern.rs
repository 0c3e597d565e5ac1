//! Value patterns.
//!
//! A pattern is literal text interleaved with placeholders:
//!
//! - `{digit:N}` expands to `N` decimal digits,
//! - `{hash:N}` expands to `N` characters of `[0-9a-z]` (`N` defaults to 8).
//!
//! Candidate values are enumerated lazily, in a fixed odometer order with the
//! rightmost position varying fastest. The enumeration never depends on what
//! is currently allocated, which keeps allocation deterministic.

use crate::error::{Error, Result};

const DIGITS: &[u8] = b"0123456789";
const HASH: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const DEFAULT_HASH_WIDTH: usize = 8;
const MAX_WIDTH: usize = 16;

/// Kind of placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// Decimal digits.
    Digit,
    /// Base-36 lowercase characters.
    Hash,
}

impl PlaceholderKind {
    const fn alphabet(self) -> &'static [u8] {
        match self {
            Self::Digit => DIGITS,
            Self::Hash => HASH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { kind: PlaceholderKind, width: usize },
}

/// A parsed value pattern.
///
/// # Examples
///
/// ```
/// use allot::value::pattern::Pattern;
///
/// let pattern = Pattern::parse("95{digit:2}").unwrap();
/// let first: Vec<String> = pattern.values().take(3).collect();
/// assert_eq!(first, vec!["9500", "9501", "9502"]);
/// assert!(pattern.matches("9542"));
/// assert!(!pattern.matches("954"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for unbalanced braces, unknown
    /// placeholder kinds and widths that are zero, too large or not numbers.
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidPattern {
            pattern: source.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner == '{' {
                            return Err(invalid("nested '{'".to_string()));
                        }
                        body.push(inner);
                    }
                    if !closed {
                        return Err(invalid("unclosed '{'".to_string()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_placeholder(&body).map_err(invalid)?);
                }
                '}' => return Err(invalid("unmatched '}'".to_string())),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Returns the pattern source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the number of candidate values, or `None` if it overflows.
    #[must_use]
    pub fn candidate_count(&self) -> Option<u128> {
        self.segments.iter().try_fold(1u128, |acc, segment| match segment {
            Segment::Literal(_) => Some(acc),
            Segment::Placeholder { kind, width } => {
                let base = kind.alphabet().len() as u128;
                let width = u32::try_from(*width).ok()?;
                acc.checked_mul(base.checked_pow(width)?)
            }
        })
    }

    /// Returns true when `value` could have been produced by the pattern.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let mut rest = value;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => match rest.strip_prefix(text.as_str()) {
                    Some(tail) => rest = tail,
                    None => return false,
                },
                Segment::Placeholder { kind, width } => {
                    let alphabet = kind.alphabet();
                    let bytes = rest.as_bytes();
                    if bytes.len() < *width || !bytes[..*width].iter().all(|b| alphabet.contains(b)) {
                        return false;
                    }
                    rest = &rest[*width..];
                }
            }
        }
        rest.is_empty()
    }

    /// Returns the lazy, deterministic sequence of candidate values.
    #[must_use]
    pub fn values(&self) -> PatternValues<'_> {
        let positions = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(_) => 0,
                Segment::Placeholder { width, .. } => *width,
            })
            .sum();
        PatternValues {
            pattern: self,
            counters: vec![0; positions],
            done: false,
        }
    }
}

fn parse_placeholder(body: &str) -> std::result::Result<Segment, String> {
    let (name, width) = match body.split_once(':') {
        Some((name, width)) => (name.trim(), Some(width.trim())),
        None => (body.trim(), None),
    };
    let kind = match name {
        "digit" => PlaceholderKind::Digit,
        "hash" => PlaceholderKind::Hash,
        other => return Err(format!("unknown placeholder '{other}'")),
    };
    let width = match (kind, width) {
        (_, Some(text)) => text
            .parse::<usize>()
            .map_err(|_| format!("invalid width '{text}'"))?,
        (PlaceholderKind::Hash, None) => DEFAULT_HASH_WIDTH,
        (PlaceholderKind::Digit, None) => return Err("digit placeholder needs a width".to_string()),
    };
    if width == 0 || width > MAX_WIDTH {
        return Err(format!("width must be between 1 and {MAX_WIDTH}"));
    }
    Ok(Segment::Placeholder { kind, width })
}

/// Iterator over the candidate values of a [`Pattern`].
#[derive(Debug, Clone)]
pub struct PatternValues<'a> {
    pattern: &'a Pattern,
    counters: Vec<usize>,
    done: bool,
}

impl PatternValues<'_> {
    fn render(&self) -> String {
        let mut out = String::with_capacity(self.pattern.source.len());
        let mut position = 0;
        for segment in &self.pattern.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { kind, width } => {
                    let alphabet = kind.alphabet();
                    for counter in &self.counters[position..position + width] {
                        out.push(char::from(alphabet[*counter]));
                    }
                    position += width;
                }
            }
        }
        out
    }

    fn alphabet_at(&self, index: usize) -> &'static [u8] {
        let mut position = 0;
        for segment in &self.pattern.segments {
            if let Segment::Placeholder { kind, width } = segment {
                if index < position + width {
                    return kind.alphabet();
                }
                position += width;
            }
        }
        DIGITS
    }

    /// Advances the odometer; returns false once it wraps around.
    fn advance(&mut self) -> bool {
        for index in (0..self.counters.len()).rev() {
            let base = self.alphabet_at(index).len();
            self.counters[index] += 1;
            if self.counters[index] < base {
                return true;
            }
            self.counters[index] = 0;
        }
        false
    }
}

impl Iterator for PatternValues<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let value = self.render();
        if !self.advance() {
            self.done = true;
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_yields_once() {
        let pattern = Pattern::parse("room").unwrap();
        let values: Vec<_> = pattern.values().collect();
        assert_eq!(values, vec!["room"]);
        assert_eq!(pattern.candidate_count(), Some(1));
    }

    #[test]
    fn test_digit_pattern_enumerates_in_order() {
        let pattern = Pattern::parse("9{digit:1}").unwrap();
        let values: Vec<_> = pattern.values().collect();
        assert_eq!(values.len(), 10);
        assert_eq!(values.first().map(String::as_str), Some("90"));
        assert_eq!(values.last().map(String::as_str), Some("99"));
    }

    #[test]
    fn test_mixed_placeholders() {
        let pattern = Pattern::parse("{digit:1}-{hash:1}").unwrap();
        let values: Vec<_> = pattern.values().take(37).collect();
        assert_eq!(values[0], "0-0");
        assert_eq!(values[10], "0-a");
        assert_eq!(values[35], "0-z");
        assert_eq!(values[36], "1-0");
        assert_eq!(pattern.candidate_count(), Some(360));
    }

    #[test]
    fn test_hash_default_width() {
        let pattern = Pattern::parse("{hash}").unwrap();
        let first = pattern.values().next().unwrap();
        assert_eq!(first, "00000000");
    }

    #[test]
    fn test_matches() {
        let pattern = Pattern::parse("sip:{digit:3}@example.org").unwrap();
        assert!(pattern.matches("sip:123@example.org"));
        assert!(!pattern.matches("sip:12a@example.org"));
        assert!(!pattern.matches("sip:1234@example.org"));
        assert!(!pattern.matches("sip:123@example.com"));
    }

    #[test]
    fn test_invalid_patterns() {
        for source in ["{digit:0}", "{digit}", "{nope:2}", "{digit:2", "a}b", "{digit:x}", "{{digit:1}}"] {
            let result = Pattern::parse(source);
            assert!(
                matches!(result, Err(Error::InvalidPattern { .. })),
                "pattern {source} should be invalid"
            );
        }
    }

    #[test]
    fn test_width_upper_bound() {
        assert!(Pattern::parse("{digit:16}").is_ok());
        assert!(Pattern::parse("{digit:17}").is_err());
    }
}
