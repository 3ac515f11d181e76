//! Annotation types shared by every pipeline stage.
//!
//! A model response is decoded into [`Candidate`]s, which carry raw signed
//! offsets exactly as the model wrote them. The validator turns the survivors
//! into [`Annotation`]s, whose [`Span`] is known to fit the analysed text.

use serde::{Deserialize, Serialize};

use crate::span::Span;
use crate::warning::Warning;

/// What an annotation is about.
///
/// The grammar and style families share one enum; [`AnalysisFamily`] decides
/// which subset a given analysis accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Grammar,
    Spelling,
    Punctuation,
    Contextual,
    Style,
    Clarity,
    Conciseness,
    Readability,
    Tone,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grammar => "grammar",
            Self::Spelling => "spelling",
            Self::Punctuation => "punctuation",
            Self::Contextual => "contextual",
            Self::Style => "style",
            Self::Clarity => "clarity",
            Self::Conciseness => "conciseness",
            Self::Readability => "readability",
            Self::Tone => "tone",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "grammar" => Self::Grammar,
            "spelling" => Self::Spelling,
            "punctuation" => Self::Punctuation,
            "contextual" => Self::Contextual,
            "style" => Self::Style,
            "clarity" => Self::Clarity,
            "conciseness" => Self::Conciseness,
            "readability" => Self::Readability,
            "tone" => Self::Tone,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The product feature an analysis runs for. Each family has its own closed
/// set of annotation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisFamily {
    #[default]
    Grammar,
    Style,
}

impl AnalysisFamily {
    pub fn kinds(&self) -> &'static [AnnotationKind] {
        match self {
            Self::Grammar => &[
                AnnotationKind::Grammar,
                AnnotationKind::Spelling,
                AnnotationKind::Punctuation,
                AnnotationKind::Contextual,
            ],
            Self::Style => &[
                AnnotationKind::Style,
                AnnotationKind::Clarity,
                AnnotationKind::Conciseness,
                AnnotationKind::Readability,
                AnnotationKind::Tone,
            ],
        }
    }

    pub fn accepts(&self, kind: AnnotationKind) -> bool {
        self.kinds().contains(&kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grammar => "grammar",
            Self::Style => "style",
        }
    }
}

/// The edit an annotation proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    #[default]
    Replace,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }

    /// Accepts both verb and noun forms (`insert` / `insertion`).
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "insert" | "insertion" => Self::Insert,
            "replace" | "replacement" => Self::Replace,
            "delete" | "deletion" => Self::Delete,
            _ => return None,
        };
        Some(op)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgent an annotation is. Ordered so that `Error` is the greatest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let severity = match s.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" | "warn" => Self::Warning,
            "info" | "suggestion" => Self::Info,
            _ => return None,
        };
        Some(severity)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost/quality level of the underlying model call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Fast,
    Thorough,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Thorough => "thorough",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded but unvalidated finding.
///
/// Offsets are signed because the model can and does emit negative numbers;
/// rejecting them is the validator's job, not the decoder's.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub kind: AnnotationKind,
    pub operation: Operation,
    pub start: i64,
    pub end: i64,
    pub original: String,
    pub suggestion: String,
    pub severity: Severity,
    pub explanation: String,
    pub alternatives: Vec<String>,
    /// Model-reported confidence in `[0, 1]`, when present.
    pub confidence: Option<f64>,
}

/// A validated finding whose span fits the text it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub operation: Operation,
    pub span: Span,
    pub original: String,
    pub suggestion: String,
    pub severity: Severity,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Annotation {
    pub fn start(&self) -> usize {
        self.span.start()
    }

    pub fn end(&self) -> usize {
        self.span.end()
    }

    /// The same annotation lifted by `offset` code units.
    pub fn shifted(mut self, offset: usize) -> Self {
        self.span = self.span.shift(offset);
        self
    }
}

/// Why a fast-tier analysis was re-run on the thorough tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The fast response needed repair and the input was not trivial.
    ParseWarnings,
    /// The fast tier found nothing in a text long enough to be suspicious.
    NoFindings,
    /// The fast-tier call itself failed.
    FastTierFailed,
}

/// Output of one analysis request: ordered, non-overlapping annotations plus
/// metadata about how they were obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub annotations: Vec<Annotation>,
    pub processing_time_ms: u64,
    pub tier: Tier,
    pub cache_hit: bool,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,
    #[serde(default)]
    pub cancelled: bool,
    /// Number of chunks the text was split into; 1 for unchunked analyses.
    #[serde(default = "one")]
    pub chunks: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

fn one() -> usize {
    1
}

impl AnalysisResult {
    pub fn empty(tier: Tier) -> Self {
        Self {
            annotations: Vec::new(),
            processing_time_ms: 0,
            tier,
            cache_hit: false,
            escalated: false,
            escalation_reason: None,
            cancelled: false,
            chunks: 1,
            warnings: Vec::new(),
        }
    }

    /// An empty result carrying a single warning, the shape every failure
    /// takes.
    pub fn failed(tier: Tier, warning: Warning) -> Self {
        let mut result = Self::empty(tier);
        result.warnings.push(warning);
        result
    }

    /// Only clean, complete results are worth remembering.
    pub fn is_cacheable(&self) -> bool {
        !self.cancelled && self.warnings.is_empty()
    }

    pub fn has_parse_warnings(&self) -> bool {
        self.warnings.iter().any(Warning::is_parse)
    }
}
