//! Messages-API requester over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redline_core::Tier;
use redline_pipeline::{CompletionRequest, Requester, RequesterError, Role};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::sse::{ErrorBody, SseDecoder, SseEvent};

const API_VERSION: &str = "2023-06-01";

/// Connection settings for [`HttpRequester`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Like `https://api.anthropic.com` (a trailing slash is tolerated).
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub fast_model: String,
    pub thorough_model: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".into(),
            api_key: String::new(),
            fast_model: "claude-haiku-4-5".into(),
            thorough_model: "claude-sonnet-4-5".into(),
            timeout_secs: 60,
        }
    }
}

impl HttpConfig {
    pub fn model(&self, tier: Tier) -> &str {
        match tier {
            Tier::Fast => &self.fast_model,
            Tier::Thorough => &self.thorough_model,
        }
    }
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// A [`Requester`] backed by the messages endpoint. The fast and thorough
/// tiers map to two configured model names.
pub struct HttpRequester {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpRequester {
    pub fn new(mut config: HttpConfig) -> Result<Self, RequesterError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(map_reqwest)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    async fn post(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, RequesterError> {
        let body = body(&self.config, request, stream);
        info!(
            url = %self.url(),
            model = body.model,
            tier = %request.tier,
            stream,
            "sending completion request"
        );
        let resp = self
            .client
            .post(self.url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(RequesterError::Server {
                status: status.as_u16(),
                body: error_message(&raw),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn send(&self, request: &CompletionRequest) -> Result<String, RequesterError> {
        let resp = self.post(request, false).await?;
        let raw = resp.text().await.map_err(map_reqwest)?;
        let text = response_text(&raw)?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<(), RequesterError> {
        let resp = self.post(request, true).await?;
        let mut bytes = resp.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(piece) = bytes.next().await {
            let piece = piece.map_err(map_reqwest)?;
            for event in decoder.push(&piece) {
                if forward(event, &tx).await? {
                    return Ok(());
                }
            }
        }
        for event in decoder.finish() {
            if forward(event, &tx).await? {
                return Ok(());
            }
        }
        debug!("event stream ended without message_stop");
        Ok(())
    }
}

/// Push one event to the consumer. `Ok(true)` means the message is complete.
async fn forward(event: SseEvent, tx: &mpsc::Sender<String>) -> Result<bool, RequesterError> {
    match event {
        SseEvent::Text(text) => {
            tx.send(text)
                .await
                .map_err(|_| RequesterError::StreamClosed)?;
            Ok(false)
        }
        SseEvent::Error { kind, message } => {
            Err(RequesterError::Other(format!("{kind}: {message}")))
        }
        SseEvent::Stop => Ok(true),
    }
}

fn body<'a>(
    config: &'a HttpConfig,
    request: &'a CompletionRequest,
    stream: bool,
) -> MessagesBody<'a> {
    MessagesBody {
        model: config.model(request.tier),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system: request.system_prompt(),
        messages: request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| WireMessage {
                role: "user",
                content: &m.content,
            })
            .collect(),
        stream,
    }
}

/// Concatenated text blocks of a non-streaming response.
fn response_text(raw: &str) -> Result<String, RequesterError> {
    let resp: MessagesResponse =
        serde_json::from_str(raw).map_err(|e| RequesterError::Decode(e.to_string()))?;
    let text: String = resp
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(RequesterError::Decode("response has no text content".into()));
    }
    Ok(text)
}

/// The provider's error message if the body is a structured error, else the
/// body itself.
fn error_message(raw: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(raw) {
        Ok(resp) => format!("{}: {}", resp.error.kind, resp.error.message),
        Err(_) => raw.to_string(),
    }
}

fn map_reqwest(e: reqwest::Error) -> RequesterError {
    if e.is_timeout() {
        RequesterError::Timeout
    } else if e.is_decode() {
        RequesterError::Decode(e.to_string())
    } else {
        RequesterError::Http(e.to_string())
    }
}
