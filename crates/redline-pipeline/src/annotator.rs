//! The analysis entry point: tier selection, escalation, chunking, caching.
//!
//! One [`Annotator`] is built at startup and shared by reference. It owns the
//! [`ResultCache`], the only state touched by more than one request; every
//! other stage runs synchronously on data owned by the request.
//!
//! Per request:
//!
//! 1. Texts longer than `chunking.max_chunk_size` are split and each chunk is
//!    analysed as below, with bounded concurrency. Results are remapped to
//!    document offsets and deduplicated.
//! 2. The tier is `thorough` for long inputs (or when forced), else `fast`.
//! 3. A `fast` result is re-run once on `thorough` when it needed repair on a
//!    non-trivial input, found nothing in a long input, or the call failed.
//! 4. Clean results (no warnings, not cancelled) are cached.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use redline_core::{AnalysisResult, EscalationReason, Tier, Utf16Text, Warning};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, fingerprint};
use crate::cancel::CancelToken;
use crate::chunker;
use crate::config::PipelineConfig;
use crate::decoder::Decoder;
use crate::dedup::dedupe;
use crate::prompt::{PromptContext, build_messages};
use crate::requester::{CompletionRequest, Requester, RequesterError};
use crate::validator::validate;

/// Fragments buffered between a streaming requester and the accumulator.
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeOptions {
    pub force_thorough: bool,
    pub use_cache: bool,
    pub context: PromptContext,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            force_thorough: false,
            use_cache: true,
            context: PromptContext::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Complete,
    Streaming,
}

/// Outcome of a single model call.
enum Attempt {
    Done(AnalysisResult),
    Failed(Warning),
    Cancelled,
}

pub struct Annotator {
    config: PipelineConfig,
    requester: Arc<dyn Requester>,
    decoder: Decoder,
    cache: ResultCache,
}

impl Annotator {
    pub fn new(config: PipelineConfig, requester: Arc<dyn Requester>) -> Self {
        let cache = ResultCache::new(config.cache.clone());
        Self::with_cache(config, requester, cache)
    }

    pub fn with_cache(
        config: PipelineConfig,
        requester: Arc<dyn Requester>,
        cache: ResultCache,
    ) -> Self {
        Self {
            decoder: Decoder::new(config.family),
            config,
            requester,
            cache,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Drop all cached results.
    pub fn reset(&self) {
        self.cache.clear();
    }

    pub async fn analyze(&self, text: &str, options: &AnalyzeOptions) -> AnalysisResult {
        self.run(text, options, &CancelToken::new(), Mode::Complete)
            .await
    }

    /// Like [`analyze`](Self::analyze), abandoning the request as soon as
    /// `cancel` fires. A cancelled analysis returns no annotations and
    /// writes nothing to the cache.
    pub async fn analyze_with_cancel(
        &self,
        text: &str,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
    ) -> AnalysisResult {
        self.run(text, options, cancel, Mode::Complete).await
    }

    /// Analyse via [`Requester::stream`], accumulating fragments until the
    /// producer finishes and then running the same decode/validate/dedupe
    /// path as [`analyze`](Self::analyze).
    pub async fn analyze_streaming(
        &self,
        text: &str,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
    ) -> AnalysisResult {
        self.run(text, options, cancel, Mode::Streaming).await
    }

    async fn run(
        &self,
        text: &str,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
        mode: Mode,
    ) -> AnalysisResult {
        let started = Instant::now();
        let utf16 = Utf16Text::new(text);

        let mut result = if text.trim().is_empty() {
            AnalysisResult::empty(Tier::Fast)
        } else if utf16.len() > self.config.chunking.max_chunk_size {
            self.analyze_chunked(text, &utf16, options, cancel, mode)
                .await
        } else {
            self.analyze_single(text, &utf16, options, cancel, mode)
                .await
        };

        result.processing_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            len = utf16.len(),
            tier = %result.tier,
            annotations = result.annotations.len(),
            warnings = result.warnings.len(),
            cache_hit = result.cache_hit,
            elapsed_ms = result.processing_time_ms,
            "analysis complete"
        );
        result
    }

    pub fn select_tier(&self, len: usize, force_thorough: bool) -> Tier {
        if force_thorough || len > self.config.tiers.thorough_threshold {
            Tier::Thorough
        } else {
            Tier::Fast
        }
    }

    fn cache_key(&self, text: &str, options: &AnalyzeOptions, tier: Tier) -> Option<String> {
        options.use_cache.then(|| {
            fingerprint(
                text,
                &options.context,
                tier,
                &self.config.prompt_version,
                self.config.tiers.temperature,
            )
        })
    }

    fn cached(&self, key: Option<&str>) -> Option<AnalysisResult> {
        let mut hit = self.cache.get(key?)?;
        hit.cache_hit = true;
        debug!("cache hit");
        Some(hit)
    }

    fn escalation_reason(&self, result: &AnalysisResult, len: usize) -> Option<EscalationReason> {
        let tiers = &self.config.tiers;
        if result.has_parse_warnings() && len >= tiers.escalate_on_warnings_min_len {
            Some(EscalationReason::ParseWarnings)
        } else if result.annotations.is_empty() && len >= tiers.escalate_on_empty_min_len {
            Some(EscalationReason::NoFindings)
        } else {
            None
        }
    }

    /// Analyse a text that fits in one request and cache the outcome.
    async fn analyze_single(
        &self,
        text: &str,
        utf16: &Utf16Text,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
        mode: Mode,
    ) -> AnalysisResult {
        let pending = self
            .analyze_unstored(text, utf16, options, cancel, mode)
            .await;
        pending.commit(&self.cache)
    }

    /// Everything [`analyze_single`](Self::analyze_single) does except the
    /// cache write, which is left to the caller.
    async fn analyze_unstored(
        &self,
        text: &str,
        utf16: &Utf16Text,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
        mode: Mode,
    ) -> Pending {
        let tier = self.select_tier(utf16.len(), options.force_thorough);
        let key = self.cache_key(text, options, tier);
        if let Some(hit) = self.cached(key.as_deref()) {
            return Pending::hit(hit);
        }
        let result = self
            .run_tiers(text, utf16, tier, options, cancel, mode)
            .await;
        Pending { key, result }
    }

    /// The first attempt on `tier`, plus at most one escalation to thorough.
    async fn run_tiers(
        &self,
        text: &str,
        utf16: &Utf16Text,
        tier: Tier,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
        mode: Mode,
    ) -> AnalysisResult {
        let first = self.attempt(text, utf16, tier, options, cancel, mode).await;
        let (reason, fallback, fast_failure) = match (tier, first) {
            (_, Attempt::Cancelled) => return cancelled(tier),
            (Tier::Thorough, Attempt::Failed(warning)) => {
                return AnalysisResult::failed(tier, warning);
            }
            (Tier::Thorough, Attempt::Done(result)) => return result,
            (Tier::Fast, Attempt::Failed(warning)) => {
                (EscalationReason::FastTierFailed, None, Some(warning))
            }
            (Tier::Fast, Attempt::Done(result)) => {
                match self.escalation_reason(&result, utf16.len()) {
                    None => return result,
                    Some(reason) => (reason, Some(result), None),
                }
            }
        };

        info!(?reason, len = utf16.len(), "escalating to thorough tier");
        let second = self
            .attempt(text, utf16, Tier::Thorough, options, cancel, mode)
            .await;
        match second {
            Attempt::Cancelled => cancelled(Tier::Thorough),
            Attempt::Done(mut result) => {
                result.escalated = true;
                result.escalation_reason = Some(reason);
                result
            }
            Attempt::Failed(warning) => match fallback {
                Some(mut fast) => {
                    fast.warnings.push(warning);
                    fast
                }
                None => {
                    let mut failed = AnalysisResult::failed(Tier::Thorough, warning);
                    if let Some(first) = fast_failure {
                        failed.warnings.insert(0, first);
                    }
                    failed.escalated = true;
                    failed.escalation_reason = Some(reason);
                    failed
                }
            },
        }
    }

    /// Split, analyse each chunk, and merge in document coordinates.
    ///
    /// Nothing is cached until every chunk is back; if any chunk was
    /// cancelled the finished ones are discarded too.
    async fn analyze_chunked(
        &self,
        text: &str,
        utf16: &Utf16Text,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
        mode: Mode,
    ) -> AnalysisResult {
        let tier = self.select_tier(utf16.len(), options.force_thorough);
        let key = self.cache_key(text, options, tier);
        if let Some(hit) = self.cached(key.as_deref()) {
            return hit;
        }

        let chunking = &self.config.chunking;
        let chunks = chunker::split(utf16, chunking.max_chunk_size, chunking.chunk_overlap);
        let count = chunks.len();
        debug!(chunks = count, len = utf16.len(), "analysing in chunks");

        let mut outcomes: Vec<(usize, Pending)> = stream::iter(chunks)
            .map(|chunk| async move {
                let chunk_utf16 = Utf16Text::new(&chunk.text);
                let pending = self
                    .analyze_unstored(&chunk.text, &chunk_utf16, options, cancel, mode)
                    .await;
                (chunk.offset, pending)
            })
            .buffer_unordered(chunking.concurrency.max(1))
            .collect()
            .await;

        if outcomes.iter().any(|(_, p)| p.result.cancelled) {
            debug!(chunks = count, "chunked analysis cancelled, discarding chunk results");
            return cancelled(tier);
        }
        outcomes.sort_by_key(|(offset, _)| *offset);

        let mut merged = AnalysisResult::empty(Tier::Fast);
        merged.chunks = count;
        let mut per_chunk = Vec::with_capacity(count);
        for (offset, pending) in outcomes {
            let result = pending.commit(&self.cache);
            merged.tier = merged.tier.max(result.tier);
            if result.escalated && !merged.escalated {
                merged.escalated = true;
                merged.escalation_reason = result.escalation_reason;
            }
            merged
                .warnings
                .extend(result.warnings.into_iter().map(|w| w.in_chunk(offset)));
            per_chunk.push((offset, result.annotations));
        }
        merged.annotations = chunker::merge(per_chunk);

        Pending { key, result: merged }.commit(&self.cache)
    }

    /// One model call on `tier`, decoded, validated and deduplicated.
    async fn attempt(
        &self,
        text: &str,
        utf16: &Utf16Text,
        tier: Tier,
        options: &AnalyzeOptions,
        cancel: &CancelToken,
        mode: Mode,
    ) -> Attempt {
        let tiers = &self.config.tiers;
        let request = CompletionRequest {
            messages: build_messages(text, self.config.family, &options.context),
            tier,
            max_tokens: match tier {
                Tier::Fast => tiers.fast_max_tokens,
                Tier::Thorough => tiers.thorough_max_tokens,
            },
            temperature: tiers.temperature,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%tier, "analysis cancelled");
                return Attempt::Cancelled;
            }
            response = self.fetch(&request, mode) => response,
        };

        match response {
            Ok(raw) => Attempt::Done(process_response(&self.decoder, &raw, utf16, tier)),
            Err(e) => {
                warn!(%tier, error = %e, "requester call failed");
                Attempt::Failed(Warning::RequesterFailed {
                    tier,
                    detail: e.to_string(),
                })
            }
        }
    }

    async fn fetch(
        &self,
        request: &CompletionRequest,
        mode: Mode,
    ) -> Result<String, RequesterError> {
        match mode {
            Mode::Complete => self.requester.send(request).await,
            Mode::Streaming => {
                let (tx, mut rx) = mpsc::channel::<String>(STREAM_BUFFER);
                let producer = self.requester.stream(request, tx);
                let consumer = async move {
                    let mut buffer = String::new();
                    while let Some(fragment) = rx.recv().await {
                        buffer.push_str(&fragment);
                    }
                    buffer
                };
                let (status, buffer) = tokio::join!(producer, consumer);
                status.map(|()| buffer)
            }
        }
    }
}

/// A finished analysis whose cache write has not happened yet.
struct Pending {
    /// `None` for cache hits and when caching is off.
    key: Option<String>,
    result: AnalysisResult,
}

impl Pending {
    fn hit(result: AnalysisResult) -> Self {
        Self { key: None, result }
    }

    /// Write the result if it is clean, and hand it back.
    fn commit(self, cache: &ResultCache) -> AnalysisResult {
        if let Some(key) = &self.key
            && self.result.is_cacheable()
        {
            cache.set(key, &self.result);
        }
        self.result
    }
}

/// Decode → validate → dedupe one raw model response against `text`.
///
/// Purely synchronous; shared by the annotator and offline decoding.
pub fn process_response(
    decoder: &Decoder,
    raw: &str,
    text: &Utf16Text,
    tier: Tier,
) -> AnalysisResult {
    let decoded = decoder.decode(raw);
    let validated = validate(decoded.candidates, text);

    let mut result = AnalysisResult::empty(tier);
    result.annotations = dedupe(validated.annotations);
    result.warnings = decoded.warnings;
    result.warnings.extend(validated.warnings);
    result
}

fn cancelled(tier: Tier) -> AnalysisResult {
    let mut result = AnalysisResult::failed(tier, Warning::Cancelled);
    result.cancelled = true;
    result
}
