//! Plain-text rendering of analysis results for the terminal.
//!
//! Each annotation is printed as a short card: its span and labels, the
//! edit itself, then any explanation and alternatives. Warnings and run
//! metadata follow in their own sections.

use std::fmt::Write;

use redline_core::{AnalysisResult, Annotation, Operation, Span, Utf16Text};
use redline_pipeline::chunker::Chunk;
use redline_pipeline::scorer::ScoredCorrection;

const EXCERPT_WIDTH: usize = 60;

// ── Public API ──

pub fn print_result(result: &AnalysisResult, text: &Utf16Text) {
    print!("{}", render_result(result, text));
}

pub fn print_chunks(chunks: &[Chunk]) {
    print!("{}", render_chunks(chunks));
}

pub fn print_ranking(ranked: &[ScoredCorrection], auto_apply: bool) {
    print!("{}", render_ranking(ranked, auto_apply));
}

// ── Rendering ──

pub fn render_result(result: &AnalysisResult, text: &Utf16Text) -> String {
    let mut out = String::new();

    if result.annotations.is_empty() {
        out.push_str("No issues found.\n");
    }
    for (i, annotation) in result.annotations.iter().enumerate() {
        render_annotation(&mut out, i + 1, annotation, text);
    }

    if !result.warnings.is_empty() {
        out.push_str("\nWarnings\n");
        for warning in &result.warnings {
            let _ = writeln!(out, "  - {warning}");
        }
    }

    out.push('\n');
    let _ = write!(
        out,
        "{} issue(s) · tier {} · {} ms",
        result.annotations.len(),
        result.tier,
        result.processing_time_ms
    );
    if result.chunks > 1 {
        let _ = write!(out, " · {} chunks", result.chunks);
    }
    if let Some(reason) = result.escalation_reason {
        let _ = write!(out, " · escalated ({reason:?})");
    }
    if result.cache_hit {
        out.push_str(" · cached");
    }
    if result.cancelled {
        out.push_str(" · cancelled");
    }
    out.push('\n');
    out
}

fn render_annotation(out: &mut String, n: usize, a: &Annotation, text: &Utf16Text) {
    let _ = writeln!(
        out,
        "{n:>3}. {}  {} · {} · {}",
        a.span,
        a.kind,
        a.operation.as_str(),
        a.severity.as_str()
    );
    let edit = match a.operation {
        Operation::Insert => format!(
            "insert \"{}\" after \"{}\"",
            a.suggestion,
            before(text, a.start())
        ),
        Operation::Delete => format!("delete \"{}\"", a.original),
        Operation::Replace => format!("\"{}\" → \"{}\"", a.original, a.suggestion),
    };
    let _ = writeln!(out, "     {edit}");
    if !a.explanation.is_empty() {
        let _ = writeln!(out, "     {}", a.explanation);
    }
    if !a.alternatives.is_empty() {
        let _ = writeln!(out, "     or: {}", a.alternatives.join(" | "));
    }
}

/// Up to a few words preceding `offset`, for locating insertion points.
fn before(text: &Utf16Text, offset: usize) -> String {
    let from = offset.saturating_sub(12);
    let span = Span::new(from, offset).unwrap_or_else(|_| Span::point(offset));
    text.slice(span).unwrap_or_default().trim_start().to_string()
}

pub fn render_chunks(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>5}  {:>8}  {:>8}  {:>6}  excerpt", "#", "start", "end", "len");
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>5}  {:>8}  {:>8}  {:>6}  {}",
            i,
            chunk.offset,
            chunk.end(),
            chunk.len,
            excerpt(&chunk.text)
        );
    }
    out
}

fn excerpt(s: &str) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_WIDTH {
        return flat.to_string();
    }
    let head: String = flat.chars().take(EXCERPT_WIDTH - 1).collect();
    format!("{head}…")
}

pub fn render_ranking(ranked: &[ScoredCorrection], auto_apply: bool) -> String {
    let mut out = String::from("\nRanking\n");
    for scored in ranked {
        let c = &scored.candidate;
        let _ = writeln!(
            out,
            "  {:.2}  {:<12} \"{}\" → \"{}\"",
            scored.score,
            c.kind.as_str(),
            c.original,
            c.suggestion
        );
    }
    if auto_apply {
        out.push_str("  top suggestion qualifies for auto-apply\n");
    }
    out
}
