//! Non-fatal conditions collected while producing an [`AnalysisResult`].
//!
//! Nothing in the pipeline throws for data-quality reasons. Every entry that
//! was dropped or repaired, and every call that failed, leaves one of these
//! behind so callers and tests can tell *why*.
//!
//! [`AnalysisResult`]: crate::AnalysisResult

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annotation::Tier;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    // ── Decode ──
    #[error("malformed payload: {detail}")]
    MalformedPayload { detail: String },

    #[error("model reported error {code}: {message}")]
    ModelError { code: String, message: String },

    #[error("unrecognized payload shape: {detail}")]
    UnrecognizedShape { detail: String },

    #[error("entry {index}: not an object")]
    NotAnObject { index: usize },

    #[error("entry {index}: unknown kind {kind:?}")]
    UnknownKind { index: usize, kind: String },

    #[error("entry {index}: missing field {field:?}")]
    MissingField { index: usize, field: String },

    #[error("entry {index}: invalid {field:?}: {detail}")]
    InvalidField {
        index: usize,
        field: String,
        detail: String,
    },

    // ── Validation ──
    #[error("span [{start}, {end}) out of bounds for text of length {len}")]
    OutOfBounds { start: i64, end: i64, len: usize },

    #[error("insert at [{start}, {end}) must be zero-width")]
    InsertWithExtent { start: usize, end: usize },

    #[error("original at [{start}, {end}) claimed {claimed:?} but text is {actual:?}")]
    OriginalMismatch {
        start: usize,
        end: usize,
        claimed: String,
        actual: String,
    },

    // ── I/O ──
    #[error("{tier} requester failed: {detail}")]
    RequesterFailed { tier: Tier, detail: String },

    #[error("analysis cancelled")]
    Cancelled,

    #[error("chunk at offset {offset}: {warning}")]
    InChunk {
        offset: usize,
        warning: Box<Warning>,
    },
}

impl Warning {
    /// Whether this warning came from decoding or validating a response, as
    /// opposed to the request itself failing.
    pub fn is_parse(&self) -> bool {
        match self {
            Self::RequesterFailed { .. } | Self::Cancelled => false,
            Self::InChunk { warning, .. } => warning.is_parse(),
            _ => true,
        }
    }

    /// Wrap a chunk-local warning so its offsets can be read in document
    /// coordinates.
    pub fn in_chunk(self, offset: usize) -> Self {
        Self::InChunk {
            offset,
            warning: Box::new(self),
        }
    }
}
