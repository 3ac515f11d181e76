//! Response decoder: raw model text → typed, unvalidated candidates.
//!
//! Model output is untrusted. Nothing in here panics or returns an error;
//! every problem becomes a [`Warning`] and, at worst, the decode yields zero
//! candidates.
//!
//! Decoding happens in three steps:
//!
//! 1. [`extract_payload`] pulls the structured block out of surrounding prose.
//!    Models sometimes think out loud before answering, so when several fenced
//!    blocks are present the **last** one wins.
//! 2. The payload is parsed into a `serde_json::Value` and classified into a
//!    [`Payload`]: a list of entries, an explicit error record, or an
//!    unrecognised shape.
//! 3. Each entry is read field by field with typed accessors. An entry with an
//!    unknown kind or non-numeric offsets is dropped; missing `operation` and
//!    `severity` default to `replace` and `error`.

use redline_core::{AnalysisFamily, AnnotationKind, Candidate, Operation, Severity, Warning};
use serde_json::{Map, Value};
use tracing::debug;

const FENCE: &str = "```";

/// Keys under which an object-shaped payload may carry its entry list.
const ENTRY_KEYS: &[&str] = &["annotations", "issues", "corrections", "suggestions"];

/// Decoder output: surviving candidates and everything that went wrong.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<Warning>,
}

impl Decoded {
    fn failed(warning: Warning) -> Self {
        Self {
            candidates: Vec::new(),
            warnings: vec![warning],
        }
    }
}

/// The classified shape of a parsed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Entries(Vec<Value>),
    Error { code: String, message: String },
    Unknown(Value),
}

impl Payload {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Entries(items),
            Value::Object(mut map) => {
                if let Some(Value::Object(err)) = map.get("error") {
                    return error_record(err);
                }
                for key in ENTRY_KEYS {
                    if matches!(map.get(*key), Some(Value::Array(_)))
                        && let Some(Value::Array(items)) = map.remove(*key)
                    {
                        return Self::Entries(items);
                    }
                }
                if map.contains_key("code") && map.contains_key("message") {
                    return error_record(&map);
                }
                Self::Unknown(Value::Object(map))
            }
            other => Self::Unknown(other),
        }
    }
}

fn error_record(map: &Map<String, Value>) -> Payload {
    Payload::Error {
        code: map.get("code").map(scalar_to_string).unwrap_or_default(),
        message: map.get("message").map(scalar_to_string).unwrap_or_default(),
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extract the structured payload from a model response.
///
/// Returns the content of the last closed fenced block, with any language
/// tag (`json`) removed. An unterminated trailing fence is used only when no
/// closed block exists. Without any fence the whole response is the payload.
pub fn extract_payload(response: &str) -> &str {
    let parts: Vec<&str> = response.split(FENCE).collect();
    if parts.len() < 2 {
        return response.trim();
    }

    // Odd-indexed parts sit between fences. With an even part count the
    // last fence was never closed.
    let closed = if parts.len() % 2 == 0 {
        parts.len() - 1
    } else {
        parts.len()
    };
    let last_closed = (1..closed).step_by(2).last();
    let block = match last_closed {
        Some(i) => parts[i],
        None => parts[parts.len() - 1],
    };
    strip_language_tag(block).trim()
}

fn strip_language_tag(block: &str) -> &str {
    match block.split_once('\n') {
        Some((first, rest))
            if first
                .trim()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            rest
        }
        _ => block,
    }
}

/// Parse `payload` as JSON, falling back to the outermost bracketed region
/// when the model wrapped bare JSON in prose.
fn parse_json(payload: &str) -> Result<Value, serde_json::Error> {
    match serde_json::from_str(payload) {
        Ok(v) => Ok(v),
        Err(e) => {
            let open = payload.find(['[', '{']);
            let close = payload.rfind([']', '}']);
            match (open, close) {
                (Some(o), Some(c)) if o < c && (o > 0 || c + 1 < payload.len()) => {
                    serde_json::from_str(&payload[o..=c]).map_err(|_| e)
                }
                _ => Err(e),
            }
        }
    }
}

/// Decodes model responses for one analysis family.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    family: AnalysisFamily,
}

impl Decoder {
    pub fn new(family: AnalysisFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> AnalysisFamily {
        self.family
    }

    pub fn decode(&self, response: &str) -> Decoded {
        let payload = extract_payload(response);
        if payload.is_empty() {
            return Decoded::failed(Warning::MalformedPayload {
                detail: "empty response".to_string(),
            });
        }

        let value = match parse_json(payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "response payload is not JSON");
                return Decoded::failed(Warning::MalformedPayload {
                    detail: e.to_string(),
                });
            }
        };

        let entries = match Payload::classify(value) {
            Payload::Entries(entries) => entries,
            Payload::Error { code, message } => {
                debug!(%code, %message, "model returned an error record");
                return Decoded::failed(Warning::ModelError { code, message });
            }
            Payload::Unknown(value) => {
                return Decoded::failed(Warning::UnrecognizedShape {
                    detail: describe(&value),
                });
            }
        };

        let mut decoded = Decoded::default();
        let total = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            match self.decode_entry(index, entry, &mut decoded.warnings) {
                Ok(candidate) => decoded.candidates.push(candidate),
                Err(warning) => decoded.warnings.push(warning),
            }
        }

        debug!(
            total,
            kept = decoded.candidates.len(),
            warnings = decoded.warnings.len(),
            "decoded response"
        );
        decoded
    }

    /// Decode one entry. Hard failures drop the entry via `Err`; soft
    /// problems (a defaulted severity, unusable alternatives) are pushed to
    /// `soft` and the entry survives.
    fn decode_entry(
        &self,
        index: usize,
        entry: &Value,
        soft: &mut Vec<Warning>,
    ) -> Result<Candidate, Warning> {
        let Value::Object(map) = entry else {
            return Err(Warning::NotAnObject { index });
        };
        let fields = Fields { index, map };

        let kind_name = fields
            .text(&["kind", "type", "category"])?
            .ok_or_else(|| fields.missing("kind"))?;
        let kind = AnnotationKind::parse(&kind_name)
            .filter(|k| self.family.accepts(*k))
            .ok_or(Warning::UnknownKind {
                index,
                kind: kind_name,
            })?;

        let start = fields.offset("start")?;
        let end = fields.offset("end")?;

        let operation = match fields.text(&["operation", "op"])? {
            None => Operation::default(),
            Some(name) => Operation::parse(&name).ok_or_else(|| {
                fields.invalid("operation", format!("unknown operation {name:?}"))
            })?,
        };

        let severity = match fields.text(&["severity"])? {
            None => Severity::default(),
            Some(name) => Severity::parse(&name).unwrap_or_else(|| {
                soft.push(fields.invalid(
                    "severity",
                    format!("unknown severity {name:?}, defaulted to error"),
                ));
                Severity::default()
            }),
        };

        let original = fields.text(&["original"])?.unwrap_or_default();
        let suggestion = fields
            .text(&["suggestion", "replacement"])?
            .unwrap_or_default();
        let explanation = fields
            .text(&["explanation", "message"])?
            .unwrap_or_default();

        let alternatives = fields.alternatives().unwrap_or_else(|w| {
            soft.push(w);
            Vec::new()
        });
        let confidence = fields.confidence().unwrap_or_else(|w| {
            soft.push(w);
            None
        });

        Ok(Candidate {
            kind,
            operation,
            start,
            end,
            original,
            suggestion,
            severity,
            explanation,
            alternatives,
            confidence,
        })
    }
}

/// Typed accessors over one raw entry.
struct Fields<'a> {
    index: usize,
    map: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn missing(&self, field: &str) -> Warning {
        Warning::MissingField {
            index: self.index,
            field: field.to_string(),
        }
    }

    fn invalid(&self, field: &str, detail: impl Into<String>) -> Warning {
        Warning::InvalidField {
            index: self.index,
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// First present, non-null value among `names`.
    fn lookup<'n>(&self, names: &[&'n str]) -> Option<(&'n str, &Value)> {
        names.iter().find_map(|name| match self.map.get(*name) {
            None | Some(Value::Null) => None,
            Some(v) => Some((*name, v)),
        })
    }

    /// A text field. Numbers and booleans are stringified, since a model
    /// suggesting `"2"` for `"two"` occasionally emits a bare number.
    fn text(&self, names: &[&str]) -> Result<Option<String>, Warning> {
        match self.lookup(names) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.clone())),
            Some((_, v @ (Value::Number(_) | Value::Bool(_)))) => Ok(Some(v.to_string())),
            Some((name, v)) => Err(self.invalid(
                name,
                format!("expected text, got {}", describe(v)),
            )),
        }
    }

    /// An integral offset. Negative values pass through for the validator to
    /// reject with the offending range.
    fn offset(&self, name: &str) -> Result<i64, Warning> {
        let Some((_, value)) = self.lookup(&[name]) else {
            return Err(self.missing(name));
        };
        let Value::Number(n) = value else {
            return Err(self.invalid(name, format!("expected a number, got {}", describe(value))));
        };
        if let Some(i) = n.as_i64() {
            return Ok(i);
        }
        match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(f as i64)
            }
            _ => Err(self.invalid(name, format!("{n} is not an integer offset"))),
        }
    }

    /// Pipe-delimited string (`"a|b"`) or an array of strings.
    fn alternatives(&self) -> Result<Vec<String>, Warning> {
        match self.lookup(&["alternatives"]) {
            None => Ok(Vec::new()),
            Some((_, Value::String(s))) => Ok(split_alternatives(s)),
            Some((_, Value::Array(items))) => Ok(items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()),
            Some((name, v)) => Err(self.invalid(
                name,
                format!("expected text or list, got {}; ignored", describe(v)),
            )),
        }
    }

    fn confidence(&self) -> Result<Option<f64>, Warning> {
        match self.lookup(&["confidence"]) {
            None => Ok(None),
            Some((_, Value::Number(n))) => match n.as_f64() {
                Some(c) if (0.0..=1.0).contains(&c) => Ok(Some(c)),
                _ => Err(self.invalid("confidence", format!("{n} is outside [0, 1]; ignored"))),
            },
            Some((name, v)) => Err(self.invalid(
                name,
                format!("expected a number, got {}; ignored", describe(v)),
            )),
        }
    }
}

pub fn split_alternatives(s: &str) -> Vec<String> {
    s.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn describe(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(items) => format!("an array of {}", items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).take(5).collect();
            format!("an object with keys [{}]", keys.join(", "))
        }
    }
}
