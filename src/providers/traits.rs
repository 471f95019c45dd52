use crate::error::RelayError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Speaker of a prompt turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message in a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: Role,
    pub content: String,
}

impl PromptTurn {
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Raw response body of a streaming completion, not yet decoded.
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

/// A chat completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// One-shot completion; returns the first choice's message content.
    async fn complete(&self, prompt: &[PromptTurn]) -> Result<String, RelayError>;

    /// Streaming completion. The body is handed back unconsumed; decoding the
    /// event stream is up to the caller.
    async fn complete_stream(&self, prompt: &[PromptTurn]) -> Result<ByteStream, RelayError>;
}
