//! End-to-end runs of the annotator against scripted requesters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redline_core::{AnalysisResult, Tier, Utf16Text, Warning};
use redline_pipeline::chunker;
use redline_pipeline::dedup::is_disjoint;
use redline_pipeline::{
    AnalyzeOptions, Annotator, CancelToken, CompletionRequest, ManualClock, PipelineConfig,
    Requester, RequesterError, ResultCache,
};
use serde_json::json;
use tokio::sync::mpsc;

/// Reports every occurrence of each misspelling in the submitted text, the
/// way a well-behaved model would, with UTF-16 offsets.
struct Finder {
    typos: Vec<(&'static str, &'static str)>,
    /// Any prompt containing this marker fails on every tier.
    poison: Option<&'static str>,
    calls: AtomicUsize,
}

impl Finder {
    fn new(typos: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            typos,
            poison: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn poisoned(typos: Vec<(&'static str, &'static str)>, marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            typos,
            poison: Some(marker),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, text: &str) -> Result<String, RequesterError> {
        if let Some(marker) = self.poison
            && text.contains(marker)
        {
            return Err(RequesterError::Server {
                status: 529,
                body: "overloaded".into(),
            });
        }
        let mut findings = Vec::new();
        for (typo, fix) in &self.typos {
            for (byte, _) in text.match_indices(typo) {
                let start = text[..byte].encode_utf16().count();
                let end = start + typo.encode_utf16().count();
                findings.push(json!({
                    "kind": "spelling",
                    "operation": "replace",
                    "original": typo,
                    "suggestion": fix,
                    "start": start,
                    "end": end,
                }));
            }
        }
        Ok(format!("```json\n{}\n```", serde_json::Value::Array(findings)))
    }
}

#[async_trait]
impl Requester for Finder {
    async fn send(&self, request: &CompletionRequest) -> Result<String, RequesterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.respond(request.user_prompt().unwrap_or_default())
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<(), RequesterError> {
        let full = self.send(request).await?;
        let chars: Vec<char> = full.chars().collect();
        for piece in chars.chunks(5) {
            tx.send(piece.iter().collect())
                .await
                .map_err(|_| RequesterError::StreamClosed)?;
        }
        Ok(())
    }
}

/// Returns the same body for every request.
struct Fixed(String);

#[async_trait]
impl Requester for Fixed {
    async fn send(&self, _: &CompletionRequest) -> Result<String, RequesterError> {
        Ok(self.0.clone())
    }
}

fn chunked_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chunking.max_chunk_size = 2000;
    config.chunking.chunk_overlap = 200;
    config
}

fn whole_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chunking.max_chunk_size = 100_000;
    config
}

fn uncached() -> AnalyzeOptions {
    AnalyzeOptions {
        use_cache: false,
        ..Default::default()
    }
}

fn spans(result: &AnalysisResult) -> Vec<(usize, usize)> {
    result
        .annotations
        .iter()
        .map(|a| (a.start(), a.end()))
        .collect()
}

/// Roughly 5000 UTF-16 units of prose with a typo in every sentence and
/// the occasional non-BMP character.
fn long_document() -> String {
    let mut doc = String::new();
    let mut i = 0;
    while doc.encode_utf16().count() < 5000 {
        if i % 9 == 0 {
            doc.push_str("The café 🎉 opened teh doors. ");
        } else {
            doc.push_str("We recieved a note about teh plan. ");
        }
        i += 1;
    }
    doc
}

#[tokio::test]
async fn two_findings_are_kept_in_order() {
    let requester = Finder::new(vec![("dont", "doesn't"), ("teh", "the")]);
    let annotator = Annotator::new(PipelineConfig::default(), requester);
    let result = annotator
        .analyze("He dont like teh weather.", &AnalyzeOptions::default())
        .await;

    assert_eq!(spans(&result), vec![(3, 7), (13, 16)]);
    assert_eq!(result.annotations[0].suggestion, "doesn't");
    assert_eq!(result.annotations[1].original, "teh");
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn overlapping_findings_keep_the_earliest() {
    let body = json!([
        {"kind": "grammar", "start": 5, "end": 15, "suggestion": "x"},
        {"kind": "grammar", "start": 0, "end": 10, "suggestion": "y"},
    ])
    .to_string();
    let annotator = Annotator::new(PipelineConfig::default(), Arc::new(Fixed(body)));
    let result = annotator
        .analyze("0123456789abcdefghij", &uncached())
        .await;

    assert_eq!(spans(&result), vec![(0, 10)]);
    assert_eq!(result.annotations[0].suggestion, "y");
}

#[tokio::test]
async fn mismatched_original_is_corrected_with_warning() {
    let body = json!([
        {"kind": "spelling", "original": "foo", "suggestion": "baz", "start": 0, "end": 3},
    ])
    .to_string();
    let annotator = Annotator::new(PipelineConfig::default(), Arc::new(Fixed(body)));
    let result = annotator.analyze("bar is open.", &uncached()).await;

    assert_eq!(result.annotations.len(), 1);
    assert_eq!(result.annotations[0].original, "bar");
    assert_eq!(
        result.warnings,
        vec![Warning::OriginalMismatch {
            start: 0,
            end: 3,
            claimed: "foo".into(),
            actual: "bar".into(),
        }]
    );
}

#[tokio::test]
async fn chunked_document_matches_single_pass() {
    let doc = long_document();
    let typos = vec![("teh", "the"), ("recieved", "received")];

    let chunked = Annotator::new(chunked_config(), Finder::new(typos.clone()))
        .analyze(&doc, &uncached())
        .await;
    let whole = Annotator::new(whole_config(), Finder::new(typos))
        .analyze(&doc, &uncached())
        .await;

    assert!(chunked.chunks >= 3, "expected several chunks, got {}", chunked.chunks);
    assert_eq!(whole.chunks, 1);
    assert!(chunked.warnings.is_empty(), "{:?}", chunked.warnings);
    assert!(is_disjoint(&chunked.annotations));
    assert_eq!(chunked.annotations, whole.annotations);
}

#[tokio::test]
async fn chunk_offsets_are_remapped_to_document() {
    let doc = long_document();
    let result = Annotator::new(chunked_config(), Finder::new(vec![("teh", "the")]))
        .analyze(&doc, &uncached())
        .await;

    let units: Vec<u16> = doc.encode_utf16().collect();
    for annotation in &result.annotations {
        let actual = String::from_utf16_lossy(&units[annotation.start()..annotation.end()]);
        assert_eq!(actual, "teh");
    }
}

#[tokio::test]
async fn failed_chunk_keeps_the_others() {
    let doc = format!("BROKEN {}", long_document());
    let requester = Finder::poisoned(vec![("teh", "the")], "BROKEN");
    let result = Annotator::new(chunked_config(), requester)
        .analyze(&doc, &uncached())
        .await;
    let chunks = chunker::split(&Utf16Text::new(&doc), 2000, 200);
    let second = chunks[1].offset;

    assert!(!result.annotations.is_empty());
    assert!(result.annotations.iter().all(|a| a.start() >= second));
    let failed_first_chunk = |w: &Warning| match w {
        Warning::InChunk { offset: 0, warning } => {
            matches!(**warning, Warning::RequesterFailed { .. })
        }
        _ => false,
    };
    assert!(result.warnings.iter().any(failed_first_chunk));
    assert!(!result.is_cacheable());
}

#[tokio::test]
async fn chunked_result_is_cached_whole() {
    let doc = long_document();
    let requester = Finder::new(vec![("teh", "the")]);
    let annotator = Annotator::new(chunked_config(), requester.clone());

    let first = annotator.analyze(&doc, &AnalyzeOptions::default()).await;
    let calls = requester.calls();
    let second = annotator.analyze(&doc, &AnalyzeOptions::default()).await;

    assert!(second.cache_hit);
    assert_eq!(requester.calls(), calls);
    assert_eq!(first.annotations, second.annotations);
}

#[tokio::test]
async fn cache_entry_expires_after_ttl() {
    let config = PipelineConfig::default();
    let clock = Arc::new(ManualClock::default());
    let cache = ResultCache::with_clock(config.cache.clone(), clock.clone());
    let requester = Finder::new(vec![("teh", "the")]);
    let annotator = Annotator::with_cache(config.clone(), requester.clone(), cache);
    let text = "Mind teh gap.";

    annotator.analyze(text, &AnalyzeOptions::default()).await;
    clock.advance(config.cache.ttl() - Duration::from_secs(1));
    assert!(annotator.analyze(text, &AnalyzeOptions::default()).await.cache_hit);

    clock.advance(Duration::from_secs(2));
    assert!(!annotator.analyze(text, &AnalyzeOptions::default()).await.cache_hit);
    assert_eq!(requester.calls(), 2);
}

#[tokio::test]
async fn context_is_part_of_cache_key() {
    let requester = Finder::new(vec![("teh", "the")]);
    let annotator = Annotator::new(PipelineConfig::default(), requester.clone());
    let text = "Mind teh gap.";

    annotator.analyze(text, &AnalyzeOptions::default()).await;
    let mut options = AnalyzeOptions::default();
    options.context.audience = Some("children".into());
    let result = annotator.analyze(text, &options).await;

    assert!(!result.cache_hit);
    assert_eq!(requester.calls(), 2);
}

#[tokio::test]
async fn forced_thorough_is_cached_separately() {
    let requester = Finder::new(vec![("teh", "the")]);
    let annotator = Annotator::new(PipelineConfig::default(), requester.clone());
    let text = "Mind teh gap.";

    let fast = annotator.analyze(text, &AnalyzeOptions::default()).await;
    let thorough = annotator
        .analyze(
            text,
            &AnalyzeOptions {
                force_thorough: true,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(fast.tier, Tier::Fast);
    assert_eq!(thorough.tier, Tier::Thorough);
    assert!(!thorough.cache_hit);
    assert_eq!(annotator.cache().len(), 2);
}

#[tokio::test]
async fn streaming_matches_complete_on_chunked_input() {
    let doc = long_document();
    let annotator = Annotator::new(chunked_config(), Finder::new(vec![("teh", "the")]));

    let streamed = annotator
        .analyze_streaming(&doc, &uncached(), &CancelToken::new())
        .await;
    let complete = annotator.analyze(&doc, &uncached()).await;

    assert_eq!(streamed.annotations, complete.annotations);
    assert_eq!(streamed.warnings, complete.warnings);
}

#[tokio::test]
async fn pre_cancelled_request_is_not_cached() {
    let requester = Finder::new(vec![("teh", "the")]);
    let annotator = Annotator::new(PipelineConfig::default(), requester.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = annotator
        .analyze_with_cancel("Mind teh gap.", &AnalyzeOptions::default(), &cancel)
        .await;

    assert!(result.cancelled);
    assert!(result.annotations.is_empty());
    assert_eq!(requester.calls(), 0);
    assert!(annotator.cache().is_empty());
}

#[tokio::test]
async fn concurrent_requests_share_the_cache() {
    let requester = Finder::new(vec![("teh", "the")]);
    let annotator = Arc::new(Annotator::new(PipelineConfig::default(), requester));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let annotator = annotator.clone();
            tokio::spawn(async move {
                let text = format!("Sentence {} has teh typo.", i % 4);
                annotator.analyze(&text, &AnalyzeOptions::default()).await
            })
        })
        .collect();
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.annotations.len(), 1);
    }

    let stats = annotator.cache().stats();
    assert_eq!(stats.entries, 4);
    assert!(stats.bytes > 0);
}
