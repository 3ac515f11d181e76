//! The requester capability: send a prompt to a model, get text back.
//!
//! Concrete providers live outside this crate. The pipeline only needs
//! [`Requester`], and treats every [`RequesterError`] (timeouts included) the
//! same way: as a failed call that yields an empty result plus a warning.

use async_trait::async_trait;
use redline_core::Tier;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum RequesterError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("stream consumer went away")]
    StreamClosed,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One model call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub tier: Tier,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[async_trait]
pub trait Requester: Send + Sync {
    /// Send the request and return the full response text.
    async fn send(&self, request: &CompletionRequest) -> Result<String, RequesterError>;

    /// Stream the response as text fragments into `tx`.
    ///
    /// The concatenation of everything sent must equal what [`send`] would
    /// have returned. Returns once the response is complete; a closed `tx`
    /// means the consumer has given up and the producer should stop.
    ///
    /// [`send`]: Requester::send
    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<(), RequesterError> {
        let text = self.send(request).await?;
        tx.send(text)
            .await
            .map_err(|_| RequesterError::StreamClosed)
    }
}
