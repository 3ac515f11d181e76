//! Splitting long documents into overlapping windows and merging the
//! per-window findings back into document coordinates.
//!
//! All sizes and offsets are UTF-16 code units. A chunk boundary never falls
//! between the two halves of a surrogate pair.

use redline_core::{Annotation, Utf16Text};

use crate::dedup::dedupe;

/// One window of a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Start of this chunk in the original document.
    pub offset: usize,
    /// Length of this chunk in UTF-16 code units.
    pub len: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Split `text` into chunks of at most `max_chunk_size` units, consecutive
/// chunks sharing `overlap` units.
///
/// A chunk ends just after the last `.` in its window when that falls past
/// the window's midpoint, otherwise just after the last space past the
/// midpoint, otherwise at the size limit.
pub fn split(text: &Utf16Text, max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let len = text.len();
    let max = max_chunk_size.max(1);
    if len <= max {
        return vec![make_chunk(text, 0, len)];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = chunk_end(text, start, max);
        chunks.push(make_chunk(text, start, end));
        if end >= len {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        if text.splits_surrogate(next) {
            next += 1;
        }
        start = next;
    }
    chunks
}

fn chunk_end(text: &Utf16Text, start: usize, max: usize) -> usize {
    let len = text.len();
    let limit = (start + max).min(len);
    if limit == len {
        return len;
    }

    let midpoint = start + max / 2;
    let boundary = [b'.', b' ']
        .into_iter()
        .find_map(|needle| text.rfind_ascii(start, limit, needle).filter(|&p| p > midpoint));

    let mut end = match boundary {
        Some(p) => p + 1,
        None => limit,
    };
    if text.splits_surrogate(end) {
        end = if end - 1 > start { end - 1 } else { end + 1 };
    }
    end
}

fn make_chunk(text: &Utf16Text, start: usize, end: usize) -> Chunk {
    Chunk {
        text: String::from_utf16_lossy(&text.units()[start..end]),
        offset: start,
        len: end - start,
    }
}

/// Lift each chunk's annotations into document coordinates and collapse the
/// duplicates found twice in overlap regions.
///
/// The order of `per_chunk` does not matter.
pub fn merge<I>(per_chunk: I) -> Vec<Annotation>
where
    I: IntoIterator<Item = (usize, Vec<Annotation>)>,
{
    let global: Vec<Annotation> = per_chunk
        .into_iter()
        .flat_map(|(offset, annotations)| annotations.into_iter().map(move |a| a.shifted(offset)))
        .collect();
    dedupe(global)
}
