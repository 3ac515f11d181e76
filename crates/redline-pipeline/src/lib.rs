//! Text-annotation pipeline.
//!
//! Turns free-form, occasionally malformed model output into a validated,
//! deduplicated, cached set of span annotations over a document of any
//! length:
//!
//! ```text
//! text → Annotator (cache → Requester) → decoder → validator → dedup
//!      → (chunk remap + cross-chunk dedup) → cache write → caller
//! ```
//!
//! [`Annotator`] is the entry point. It never returns an error: the worst
//! outcome is an [`AnalysisResult`](redline_core::AnalysisResult) with no
//! annotations and one or more warnings.

pub mod annotator;
pub mod cache;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod decoder;
pub mod dedup;
pub mod prompt;
pub mod requester;
pub mod scorer;
pub mod validator;

pub use annotator::{AnalyzeOptions, Annotator, process_response};
pub use cache::{CacheStats, Clock, ManualClock, ResultCache, SystemClock};
pub use cancel::CancelToken;
pub use config::{ConfigError, PipelineConfig};
pub use prompt::PromptContext;
pub use requester::{CompletionRequest, PromptMessage, Requester, RequesterError, Role};
