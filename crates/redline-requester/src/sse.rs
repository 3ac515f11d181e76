//! Incremental decoder for the messages API server-sent event stream.
//!
//! Bytes arrive in arbitrary network-sized pieces. [`SseDecoder::push`]
//! buffers until a complete line is available, tracks the current `event:`
//! name, and turns each `data:` payload into an [`SseEvent`]. Only text
//! deltas, errors and the end-of-message marker matter here; everything else
//! (pings, usage, block start/stop) is skipped.

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A fragment of the model's answer.
    Text(String),
    /// The provider reported an error mid-stream.
    Error { kind: String, message: String },
    /// `message_stop`: nothing more will follow.
    Stop,
}

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "type", default)]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) message: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final unterminated line, if any.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        self.push(b"\n")
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            self.event = None;
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(SseEvent::Stop);
        }

        let frame: Frame = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(event = ?self.event, error = %e, "skipping undecodable SSE frame");
                return None;
            }
        };
        match frame.kind.as_str() {
            "content_block_delta" => match frame.delta {
                Some(delta) if delta.kind == "text_delta" && !delta.text.is_empty() => {
                    Some(SseEvent::Text(delta.text))
                }
                _ => None,
            },
            "error" => {
                let body = frame.error.unwrap_or(ErrorBody {
                    kind: "error".into(),
                    message: String::new(),
                });
                Some(SseEvent::Error {
                    kind: body.kind,
                    message: body.message,
                })
            }
            "message_stop" => Some(SseEvent::Stop),
            _ => None,
        }
    }
}
