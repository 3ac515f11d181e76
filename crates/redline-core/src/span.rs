//! Half-open intervals over UTF-16 code units.
//!
//! Every offset that crosses a crate boundary is a UTF-16 code-unit offset,
//! because that is what the model is told to emit and what the rendering
//! layer indexes by. [`Utf16Text`] is the one place that converts between
//! Rust strings and those offsets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanError {
    #[error("span start {start} is after end {end}")]
    Inverted { start: usize, end: usize },
}

/// A half-open interval `[start, end)`.
///
/// Construction guarantees `start <= end`; bounds against a particular text
/// are checked separately with [`Span::fits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct Span {
    start: usize,
    end: usize,
}

#[derive(Deserialize)]
struct RawSpan {
    start: usize,
    end: usize,
}

impl TryFrom<RawSpan> for Span {
    type Error = SpanError;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        Span::new(raw.start, raw.end)
    }
}

impl Span {
    pub fn new(start: usize, end: usize) -> Result<Self, SpanError> {
        if start > end {
            return Err(SpanError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// A zero-width span at `at`, the shape of every insertion.
    pub fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Two spans overlap iff each starts before the other ends.
    ///
    /// A zero-width span overlaps a span that strictly contains its
    /// position, but not one it merely touches at either edge, and never
    /// another zero-width span.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `offset` falls inside the span.
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Whether the span lies within a text of `len` code units.
    pub fn fits(&self, len: usize) -> bool {
        self.end <= len
    }

    /// Move the span right by `offset`, used to lift chunk-local spans into
    /// document coordinates.
    pub fn shift(&self, offset: usize) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A string viewed as a sequence of UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf16Text {
    units: Vec<u16>,
}

impl Utf16Text {
    pub fn new(text: &str) -> Self {
        Self {
            units: text.encode_utf16().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[u16] {
        &self.units
    }

    /// The text covered by `span`, or `None` if it runs past the end.
    ///
    /// A span whose edge splits a surrogate pair yields U+FFFD for the
    /// orphaned half rather than failing.
    pub fn slice(&self, span: Span) -> Option<String> {
        if !span.fits(self.len()) {
            return None;
        }
        Some(String::from_utf16_lossy(&self.units[span.start..span.end]))
    }

    /// Whether `offset` sits between the two halves of a surrogate pair.
    pub fn splits_surrogate(&self, offset: usize) -> bool {
        if offset == 0 || offset >= self.units.len() {
            return false;
        }
        is_low_surrogate(self.units[offset]) && is_high_surrogate(self.units[offset - 1])
    }

    /// Position of the last occurrence of the ASCII byte `needle` in
    /// `[from, to)`.
    pub fn rfind_ascii(&self, from: usize, to: usize, needle: u8) -> Option<usize> {
        let to = to.min(self.units.len());
        if from >= to {
            return None;
        }
        self.units[from..to]
            .iter()
            .rposition(|&u| u == needle as u16)
            .map(|i| from + i)
    }
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..0xDC00).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
    (0xDC00..0xE000).contains(&unit)
}
