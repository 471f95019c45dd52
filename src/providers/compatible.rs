//! OpenAI-compatible chat completions client.
//! Works against any backend exposing `/chat/completions` with bearer auth.

use crate::providers::traits::{ByteStream, PromptTurn, Provider};
use crate::error::RelayError;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct CompletionClient {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Build the full URL for chat completions, accepting either a base URL
/// (`https://api.openai.com/v1`) or a complete endpoint.
fn chat_completions_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    let has_full_endpoint = reqwest::Url::parse(trimmed)
        .map(|url| url.path().trim_end_matches('/').ends_with("/chat/completions"))
        .unwrap_or_else(|_| trimmed.ends_with("/chat/completions"));

    if has_full_endpoint {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

impl CompletionClient {
    pub fn new(
        http: Client,
        api_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: chat_completions_url(api_url),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &crate::config::CompletionConfig) -> Self {
        // No total timeout on the client: it would also cut off long streams.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!("Failed to build completion client with timeouts: {error}");
                Client::new()
            });
        let mut client = Self::new(http, &config.api_url, &config.api_key, &config.model);
        client.temperature = config.temperature;
        client.request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        client
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, prompt: &[PromptTurn], stream: bool) -> Result<reqwest::Response, RelayError> {
        let request = ApiChatRequest {
            model: &self.model,
            messages: prompt,
            temperature: self.temperature,
            stream: stream.then_some(true),
        };

        tracing::debug!(
            "Relay: requesting completion ({} turn(s), stream={stream})",
            prompt.len()
        );

        let mut builder = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        } else {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP error: {status}"));
            tracing::warn!("Relay: completion backend returned {status}");
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for CompletionClient {
    async fn complete(&self, prompt: &[PromptTurn]) -> Result<String, RelayError> {
        let response = self.send(prompt, false).await?;
        let body = response.text().await?;
        let parsed: ApiChatResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RelayError::Decode("completion response has no message content".into()))
    }

    async fn complete_stream(&self, prompt: &[PromptTurn]) -> Result<ByteStream, RelayError> {
        let response = self.send(prompt, true).await?;
        Ok(response.bytes_stream().map_err(RelayError::from).boxed())
    }
}
