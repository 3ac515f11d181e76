//! Prompt construction.
//!
//! The wording is deliberately generic; per-language prompt text belongs to
//! the calling feature. What matters here is that the model is told the wire
//! format the decoder expects.

use redline_core::{AnalysisFamily, AnnotationKind};
use serde::{Deserialize, Serialize};

use crate::requester::PromptMessage;

/// Caller-supplied context that shapes the prompt.
///
/// Part of the cache fingerprint: two requests with different context never
/// share a cached result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptContext {
    /// BCP 47 tag of the text's language, e.g. `en-GB`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Free-form extra instructions from the calling feature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

const WIRE_FORMAT: &str = "\
Respond with a single fenced ```json block and nothing after it. The block holds an array of objects:
{
  \"kind\": one of {kinds},
  \"operation\": \"insert\" | \"replace\" | \"delete\",
  \"original\": \"the exact text being changed (empty for insert)\",
  \"suggestion\": \"the replacement text (empty for delete)\",
  \"start\": UTF-16 code-unit offset where the change begins,
  \"end\": UTF-16 code-unit offset where it ends (exclusive; equal to start for insert),
  \"severity\": \"error\" | \"warning\" | \"info\",
  \"explanation\": \"one sentence\",
  \"alternatives\": \"other suggestions separated by |\" (optional)
}
Sort entries by start and never let two entries overlap.
If you cannot analyse the text, respond instead with {\"code\": \"...\", \"message\": \"...\"}.";

fn role_line(family: AnalysisFamily) -> &'static str {
    match family {
        AnalysisFamily::Grammar => {
            "You are a meticulous proofreader. Find grammar, spelling, punctuation, and \
             context errors in the user's text. Do not comment on style."
        }
        AnalysisFamily::Style => {
            "You are an experienced editor. Find passages whose style, clarity, concision, \
             readability, or tone could be improved. Do not report plain typos."
        }
    }
}

fn kind_list(kinds: &[AnnotationKind]) -> String {
    kinds
        .iter()
        .map(|k| format!("\"{k}\""))
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn system_prompt(family: AnalysisFamily, context: &PromptContext) -> String {
    let mut prompt = format!(
        "{}\n\n{}",
        role_line(family),
        WIRE_FORMAT.replace("{kinds}", &kind_list(family.kinds()))
    );
    if let Some(language) = &context.language {
        prompt.push_str(&format!("\n\nThe text is written in {language}."));
    }
    if let Some(audience) = &context.audience {
        prompt.push_str(&format!("\nIts intended audience: {audience}."));
    }
    if let Some(instructions) = &context.instructions {
        prompt.push_str("\n\n");
        prompt.push_str(instructions);
    }
    prompt
}

/// Build the system and user messages for analysing `text`.
///
/// The user message is the text itself, verbatim, so that offsets the model
/// reports are offsets into exactly what the caller passed.
pub fn build_messages(
    text: &str,
    family: AnalysisFamily,
    context: &PromptContext,
) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(system_prompt(family, context)),
        PromptMessage::user(text),
    ]
}
