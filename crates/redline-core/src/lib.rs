pub mod annotation;
pub mod span;
pub mod warning;

pub use annotation::{
    AnalysisFamily, AnalysisResult, Annotation, AnnotationKind, Candidate, EscalationReason,
    Operation, Severity, Tier,
};
pub use span::{Span, SpanError, Utf16Text};
pub use warning::Warning;
