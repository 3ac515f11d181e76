//! Sort and de-overlap annotations.
//!
//! The output satisfies `kept[i].end <= kept[j].start` for all `i < j`, which
//! every span renderer downstream relies on.

use redline_core::Annotation;
use tracing::debug;

/// Stable-sort by start, then keep each annotation that begins at or after
/// the end of the last one kept.
///
/// Ties go to whichever candidate came first after sorting, i.e. the one that
/// appeared first in the input among those sharing a start offset. Running
/// this on its own output is a no-op.
pub fn dedupe(mut annotations: Vec<Annotation>) -> Vec<Annotation> {
    annotations.sort_by_key(Annotation::start);

    let before = annotations.len();
    let mut kept: Vec<Annotation> = Vec::with_capacity(before);
    for annotation in annotations {
        match kept.last() {
            Some(last) if annotation.start() < last.end() => {}
            _ => kept.push(annotation),
        }
    }

    if kept.len() < before {
        debug!(
            dropped = before - kept.len(),
            kept = kept.len(),
            "removed overlapping annotations"
        );
    }
    kept
}

/// Whether `annotations` is sorted by start and free of overlaps.
pub fn is_disjoint(annotations: &[Annotation]) -> bool {
    annotations
        .windows(2)
        .all(|pair| pair[0].end() <= pair[1].start())
}
