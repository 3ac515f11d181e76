//! Confidence scoring and ranking of candidate corrections.
//!
//! Consumers that must pick one "best" suggestion score each candidate,
//! rank them, and optionally auto-apply the winner. A score starts at the
//! candidate's intrinsic confidence and collects additive adjustments; it is
//! clamped to `[0, 1]` once, at the very end.

use std::collections::HashMap;

use redline_core::{Annotation, AnnotationKind, Operation};
use serde::{Deserialize, Serialize};

/// Confidence assumed when the model did not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionCandidate {
    pub kind: AnnotationKind,
    pub operation: Operation,
    pub original: String,
    pub suggestion: String,
    pub confidence: f64,
    /// Whether the suggestion keeps the author's meaning, if known.
    pub preserves_intent: Option<bool>,
}

impl From<&Annotation> for CorrectionCandidate {
    fn from(a: &Annotation) -> Self {
        Self {
            kind: a.kind,
            operation: a.operation,
            original: a.original.clone(),
            suggestion: a.suggestion.clone(),
            confidence: a.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            preserves_intent: None,
        }
    }
}

/// How often findings similar to this one were accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub accepted: u32,
    pub shown: u32,
}

impl HistorySummary {
    pub fn acceptance_rate(&self) -> Option<f64> {
        (self.shown > 0).then(|| f64::from(self.accepted) / f64::from(self.shown))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub accepted: u32,
    pub rejected: u32,
}

impl CategoryStats {
    fn total(&self) -> u32 {
        self.accepted + self.rejected
    }

    fn accept_rate(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| f64::from(self.accepted) / f64::from(total))
    }
}

/// A user's per-category accept/reject record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceProfile {
    pub categories: HashMap<AnnotationKind, CategoryStats>,
}

impl PreferenceProfile {
    pub fn record(&mut self, kind: AnnotationKind, accepted: bool) {
        let stats = self.categories.entry(kind).or_default();
        if accepted {
            stats.accepted += 1;
        } else {
            stats.rejected += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringContext<'a> {
    pub history: Option<&'a HistorySummary>,
    pub profile: Option<&'a PreferenceProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub history_high: f64,
    pub history_bonus: f64,
    pub history_low: f64,
    pub history_penalty: f64,
    /// Below this many samples, a low acceptance rate is not penalised.
    pub min_history_samples: u32,
    pub short_suggestion_bonus: f64,
    pub category_high: f64,
    pub category_bonus: f64,
    pub category_low: f64,
    pub category_penalty: f64,
    pub min_category_samples: u32,
    pub auto_apply_threshold: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            history_high: 0.8,
            history_bonus: 0.1,
            history_low: 0.3,
            history_penalty: 0.15,
            min_history_samples: 5,
            short_suggestion_bonus: 0.03,
            category_high: 0.7,
            category_bonus: 0.05,
            category_low: 0.3,
            category_penalty: 0.1,
            min_category_samples: 5,
            auto_apply_threshold: 0.9,
        }
    }
}

/// How reliable each (kind, operation) pairing tends to be. Spelling fixes
/// are mechanical; contextual rewrites are opinion.
fn alignment(kind: AnnotationKind, operation: Operation) -> f64 {
    use AnnotationKind as K;
    use Operation as O;
    match (kind, operation) {
        (K::Spelling, O::Replace) => 0.10,
        (K::Punctuation, _) => 0.05,
        (K::Grammar, O::Replace) => 0.02,
        (K::Grammar, O::Insert | O::Delete) => 0.0,
        (K::Spelling, _) => -0.05,
        (K::Contextual, _) => -0.05,
        (K::Conciseness, O::Delete) => 0.03,
        _ => 0.0,
    }
}

fn length_similarity(original: &str, suggestion: &str) -> f64 {
    let a = original.chars().count();
    let b = suggestion.chars().count();
    if a == 0 || b == 0 {
        return 0.0;
    }
    let ratio = a.min(b) as f64 / a.max(b) as f64;
    if ratio >= 0.7 {
        0.05
    } else if ratio < 0.3 {
        -0.1
    } else {
        0.0
    }
}

/// Score a candidate in `[0, 1]`.
pub fn score_correction(
    candidate: &CorrectionCandidate,
    context: &ScoringContext<'_>,
    config: &ScorerConfig,
) -> f64 {
    let mut score = if candidate.confidence.is_finite() {
        candidate.confidence
    } else {
        0.0
    };

    score += alignment(candidate.kind, candidate.operation);
    score += length_similarity(&candidate.original, &candidate.suggestion);

    score += match candidate.preserves_intent {
        Some(true) => 0.05,
        Some(false) => -0.2,
        None => 0.0,
    };

    if let Some(history) = context.history
        && let Some(rate) = history.acceptance_rate()
    {
        if rate >= config.history_high {
            score += config.history_bonus;
        } else if rate < config.history_low && history.shown >= config.min_history_samples {
            score -= config.history_penalty;
        }
    }

    let words = candidate.suggestion.split_whitespace().count();
    if (1..=3).contains(&words) {
        score += config.short_suggestion_bonus;
    }

    if let Some(profile) = context.profile
        && let Some(stats) = profile.categories.get(&candidate.kind)
        && stats.total() >= config.min_category_samples
        && let Some(rate) = stats.accept_rate()
    {
        if rate >= config.category_high {
            score += config.category_bonus;
        } else if rate <= config.category_low {
            score -= config.category_penalty;
        }
    }

    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCorrection {
    pub candidate: CorrectionCandidate,
    pub score: f64,
}

/// Score and sort descending. Equal scores keep their input order.
pub fn rank(
    candidates: Vec<CorrectionCandidate>,
    context: &ScoringContext<'_>,
    config: &ScorerConfig,
) -> Vec<ScoredCorrection> {
    let mut scored: Vec<ScoredCorrection> = candidates
        .into_iter()
        .map(|candidate| {
            let score = score_correction(&candidate, context, config);
            ScoredCorrection { candidate, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Whether `top` may be applied without asking the user.
pub fn should_auto_apply(top: &ScoredCorrection, threshold: f64) -> bool {
    top.score >= threshold
        && matches!(top.candidate.operation, Operation::Replace | Operation::Insert)
        && top.candidate.preserves_intent != Some(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        kind: AnnotationKind,
        op: Operation,
        original: &str,
        suggestion: &str,
        confidence: f64,
    ) -> CorrectionCandidate {
        CorrectionCandidate {
            kind,
            operation: op,
            original: original.into(),
            suggestion: suggestion.into(),
            confidence,
            preserves_intent: None,
        }
    }

    fn score(c: &CorrectionCandidate) -> f64 {
        score_correction(c, &ScoringContext::default(), &ScorerConfig::default())
    }

    #[test]
    fn spelling_replace_beats_grammar_replace() {
        let spelling = candidate(AnnotationKind::Spelling, Operation::Replace, "teh", "the", 0.6);
        let grammar = candidate(AnnotationKind::Grammar, Operation::Replace, "teh", "the", 0.6);
        assert!(score(&spelling) > score(&grammar));
    }

    #[test]
    fn intent_flag_moves_score() {
        let mut c = candidate(
            AnnotationKind::Grammar,
            Operation::Replace,
            "dont",
            "doesn't",
            0.6,
        );
        let neutral = score(&c);
        c.preserves_intent = Some(true);
        assert!(score(&c) > neutral);
        c.preserves_intent = Some(false);
        assert!(score(&c) < neutral);
    }

    #[test]
    fn dissimilar_lengths_penalised() {
        let similar = candidate(
            AnnotationKind::Grammar,
            Operation::Replace,
            "dont",
            "doesn't",
            0.6,
        );
        let wild = candidate(
            AnnotationKind::Grammar,
            Operation::Replace,
            "a",
            "an entirely different phrase",
            0.6,
        );
        assert!(score(&similar) > score(&wild));
    }

    #[test]
    fn low_history_needs_minimum_samples() {
        let c = candidate(AnnotationKind::Grammar, Operation::Replace, "dont", "doesn't", 0.6);
        let config = ScorerConfig::default();
        let base = score(&c);

        let thin = HistorySummary {
            accepted: 0,
            shown: 2,
        };
        let ctx = ScoringContext {
            history: Some(&thin),
            profile: None,
        };
        assert_eq!(score_correction(&c, &ctx, &config), base);

        let thick = HistorySummary {
            accepted: 1,
            shown: 20,
        };
        let ctx = ScoringContext {
            history: Some(&thick),
            profile: None,
        };
        assert!(score_correction(&c, &ctx, &config) < base);

        let good = HistorySummary {
            accepted: 9,
            shown: 10,
        };
        let ctx = ScoringContext {
            history: Some(&good),
            profile: None,
        };
        assert!(score_correction(&c, &ctx, &config) > base);
    }

    #[test]
    fn user_category_history() {
        let c = candidate(AnnotationKind::Punctuation, Operation::Insert, "", ",", 0.6);
        let config = ScorerConfig::default();
        let base = score(&c);

        let mut profile = PreferenceProfile::default();
        for _ in 0..6 {
            profile.record(AnnotationKind::Punctuation, false);
        }
        let ctx = ScoringContext {
            history: None,
            profile: Some(&profile),
        };
        assert!(score_correction(&c, &ctx, &config) < base);

        let mut fan = PreferenceProfile::default();
        for _ in 0..6 {
            fan.record(AnnotationKind::Punctuation, true);
        }
        let ctx = ScoringContext {
            history: None,
            profile: Some(&fan),
        };
        assert!(score_correction(&c, &ctx, &config) > base);
    }

    #[test]
    fn score_always_clamped() {
        let config = ScorerConfig::default();
        let great = HistorySummary {
            accepted: 10,
            shown: 10,
        };
        let awful = HistorySummary {
            accepted: 0,
            shown: 10,
        };
        for confidence in [-5.0, 0.0, 0.5, 1.0, 7.0, f64::NAN, f64::INFINITY] {
            for intent in [None, Some(true), Some(false)] {
                for history in [None, Some(&great), Some(&awful)] {
                    let mut c = candidate(
                        AnnotationKind::Spelling,
                        Operation::Replace,
                        "teh",
                        "the",
                        confidence,
                    );
                    c.preserves_intent = intent;
                    let ctx = ScoringContext {
                        history,
                        profile: None,
                    };
                    let s = score_correction(&c, &ctx, &config);
                    assert!((0.0..=1.0).contains(&s), "{s} for confidence {confidence}");
                }
            }
        }
    }

    #[test]
    fn rank_is_descending_and_stable() {
        let a = candidate(AnnotationKind::Grammar, Operation::Replace, "x", "y", 0.5);
        let mut b = a.clone();
        b.suggestion = "z".into();
        let top = candidate(AnnotationKind::Spelling, Operation::Replace, "teh", "the", 0.8);

        let ranked = rank(vec![a, b, top], &ScoringContext::default(), &ScorerConfig::default());
        assert_eq!(ranked[0].candidate.suggestion, "the");
        assert_eq!(ranked[1].candidate.suggestion, "y");
        assert_eq!(ranked[2].candidate.suggestion, "z");
        assert_eq!(ranked[1].score, ranked[2].score);
    }

    #[test]
    fn auto_apply_policy() {
        let scored = |op, intent, score| ScoredCorrection {
            candidate: CorrectionCandidate {
                preserves_intent: intent,
                ..candidate(AnnotationKind::Spelling, op, "teh", "the", 0.9)
            },
            score,
        };
        assert!(should_auto_apply(&scored(Operation::Replace, None, 0.95), 0.9));
        assert!(should_auto_apply(&scored(Operation::Insert, Some(true), 0.9), 0.9));
        assert!(!should_auto_apply(&scored(Operation::Delete, None, 0.99), 0.9));
        assert!(!should_auto_apply(&scored(Operation::Replace, Some(false), 0.99), 0.9));
        assert!(!should_auto_apply(&scored(Operation::Replace, None, 0.89), 0.9));
    }

    #[test]
    fn from_annotation_defaults_confidence() {
        let a = Annotation {
            kind: AnnotationKind::Spelling,
            operation: Operation::Replace,
            span: redline_core::Span::new(0, 3).unwrap(),
            original: "teh".into(),
            suggestion: "the".into(),
            severity: redline_core::Severity::Error,
            explanation: String::new(),
            alternatives: Vec::new(),
            confidence: None,
        };
        assert_eq!(CorrectionCandidate::from(&a).confidence, DEFAULT_CONFIDENCE);
    }
}
