//! Validator: checks candidates against the text they claim to describe.
//!
//! Offsets are trusted over transcriptions. When a `replace` or `delete`
//! claims an `original` that does not match the text at its span, the entry
//! is kept and `original` is overwritten with what is actually there.

use redline_core::{Annotation, Candidate, Operation, Span, Utf16Text, Warning};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validated {
    pub annotations: Vec<Annotation>,
    pub warnings: Vec<Warning>,
}

/// Validate and repair `candidates` against `text`.
///
/// Every emitted annotation satisfies `start <= end <= text.len()`; every
/// insert is zero-width with an empty `original`; every delete has an empty
/// `suggestion`.
pub fn validate(candidates: Vec<Candidate>, text: &Utf16Text) -> Validated {
    let mut validated = Validated::default();
    let total = candidates.len();

    for candidate in candidates {
        match validate_one(candidate, text, &mut validated.warnings) {
            Ok(annotation) => validated.annotations.push(annotation),
            Err(warning) => {
                debug!(%warning, "dropped candidate");
                validated.warnings.push(warning);
            }
        }
    }

    debug!(
        total,
        kept = validated.annotations.len(),
        "validated candidates"
    );
    validated
}

fn validate_one(
    candidate: Candidate,
    text: &Utf16Text,
    repairs: &mut Vec<Warning>,
) -> Result<Annotation, Warning> {
    let span = checked_span(candidate.start, candidate.end, text.len())?;

    let Candidate {
        kind,
        operation,
        mut original,
        mut suggestion,
        severity,
        explanation,
        alternatives,
        confidence,
        ..
    } = candidate;

    match operation {
        Operation::Insert => {
            if !span.is_empty() {
                return Err(Warning::InsertWithExtent {
                    start: span.start(),
                    end: span.end(),
                });
            }
            original.clear();
        }
        Operation::Delete => {
            suggestion.clear();
            original = reconcile(span, original, text, repairs)?;
        }
        Operation::Replace => {
            original = reconcile(span, original, text, repairs)?;
        }
    }

    Ok(Annotation {
        kind,
        operation,
        span,
        original,
        suggestion,
        severity,
        explanation,
        alternatives,
        confidence,
    })
}

fn checked_span(start: i64, end: i64, len: usize) -> Result<Span, Warning> {
    let out_of_bounds = || Warning::OutOfBounds { start, end, len };
    let s = usize::try_from(start).map_err(|_| out_of_bounds())?;
    let e = usize::try_from(end).map_err(|_| out_of_bounds())?;
    let span = Span::new(s, e).map_err(|_| out_of_bounds())?;
    if !span.fits(len) {
        return Err(out_of_bounds());
    }
    Ok(span)
}

/// The text actually at `span`. A non-empty `claimed` that differs other
/// than by case is reported; an empty one was simply not supplied.
fn reconcile(
    span: Span,
    claimed: String,
    text: &Utf16Text,
    repairs: &mut Vec<Warning>,
) -> Result<String, Warning> {
    let actual = text.slice(span).ok_or(Warning::OutOfBounds {
        start: span.start() as i64,
        end: span.end() as i64,
        len: text.len(),
    })?;
    if !claimed.is_empty() && claimed.to_lowercase() != actual.to_lowercase() {
        repairs.push(Warning::OriginalMismatch {
            start: span.start(),
            end: span.end(),
            claimed,
            actual: actual.clone(),
        });
    }
    Ok(actual)
}
