//! Inbound event handling: trigger rules, thread reconstruction, prompt
//! assembly and the streaming answer.

pub mod prompt;
pub mod sse;
pub mod stream;
pub mod trigger;

pub use prompt::build_prompt;
pub use stream::{RelayOutcome, StreamEnd, StreamOptions, StreamRelay};
pub use trigger::{Trigger, TriggerRules};

use crate::channels::{
    ChatMessage, InboundEvent, InboundMessage, LarkClient, MessageBody, MessageGateway,
    ThreadFetcher,
};
use crate::config::Config;
use crate::error::RelayError;
use crate::providers::{CompletionClient, PromptTurn, Provider};
use crate::util::strip_at_placeholders;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything [`Relay`] needs besides its two backends.
#[derive(Debug, Clone, Default)]
pub struct RelaySettings {
    pub trigger: TriggerRules,
    pub thread: ThreadFetcher,
    pub stream: StreamOptions,
    /// Sender ID of the bot's own messages; those become assistant turns.
    pub bot_sender_id: String,
    pub system_prompt: Option<String>,
    /// Where document-creation notices go.
    pub notify_chat_id: Option<String>,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        let relay = &config.relay;
        Self {
            trigger: TriggerRules::new(relay.wake_phrases.clone(), config.lark.bot_union_id.clone()),
            thread: ThreadFetcher::new(relay.max_thread_depth, relay.max_thread_chars),
            stream: StreamOptions {
                placeholder_text: relay.placeholder_text.clone(),
                status_footer: relay.status_footer.clone(),
                stream_timeout: (relay.stream_timeout_secs > 0)
                    .then(|| Duration::from_secs(relay.stream_timeout_secs)),
                patch_interval: Duration::from_millis(relay.patch_interval_ms),
            },
            bot_sender_id: config.lark.resolved_bot_sender_id().to_string(),
            system_prompt: config
                .completion
                .system_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty()),
            notify_chat_id: config.lark.notify_chat_id.clone().filter(|id| !id.is_empty()),
        }
    }
}

/// What handling an event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// A streamed answer was delivered (fully or partially).
    Answered(RelayOutcome),
    /// A plain notice was sent; carries the new message id.
    Notified(String),
    /// Nothing to do for this event.
    Skipped,
}

pub struct Relay {
    gateway: Arc<dyn MessageGateway>,
    provider: Arc<dyn Provider>,
    stream_relay: StreamRelay,
    settings: RelaySettings,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(
        gateway: Arc<dyn MessageGateway>,
        provider: Arc<dyn Provider>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            stream_relay: StreamRelay::new(Arc::clone(&gateway), settings.stream.clone()),
            gateway,
            provider,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire up the Lark client and completion backend from config.
    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!("Failed to build Lark HTTP client with timeouts: {error}");
                reqwest::Client::new()
            });
        let gateway: Arc<dyn MessageGateway> = Arc::new(LarkClient::from_config(&config.lark, http));
        let provider: Arc<dyn Provider> = Arc::new(CompletionClient::from_config(&config.completion));
        Self::new(gateway, provider, RelaySettings::from_config(config))
    }

    pub fn gateway(&self) -> &Arc<dyn MessageGateway> {
        &self.gateway
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Token cancelled on shutdown; in-flight answers finalize and stop.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Dispatch a decrypted, classified callback.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<Handled, RelayError> {
        match event {
            InboundEvent::DocumentCreated { title } => self.notify_document_created(&title).await,
            InboundEvent::Message(message) => self.handle_message(&message).await,
            InboundEvent::UrlVerification { .. } => Ok(Handled::Skipped),
            InboundEvent::Ignored(reason) => {
                tracing::debug!("Relay: ignoring event: {reason}");
                Ok(Handled::Skipped)
            }
        }
    }

    /// Answer `message` if the trigger rules say so.
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<Handled, RelayError> {
        let text = strip_at_placeholders(&message.text);
        let prompt_text = match self.settings.trigger.classify(message, &text) {
            Trigger::Invoke { text } => text,
            Trigger::Skip => {
                tracing::debug!("Relay: message {} is not addressed to the bot", message.message_id);
                return Ok(Handled::Skipped);
            }
        };

        let outcome = self
            .relay_message(message, prompt_text, &self.shutdown.child_token())
            .await?;
        Ok(Handled::Answered(outcome))
    }

    /// Fetch the thread behind `message`, ask the backend, and stream the answer
    /// as a reply. `prompt_text` replaces the leaf message's stored content.
    pub async fn relay_message(
        &self,
        message: &InboundMessage,
        prompt_text: String,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        let mut thread = self
            .settings
            .thread
            .fetch_thread(self.gateway.as_ref(), &message.message_id)
            .await?;
        if let Some(leaf) = thread.first_mut() {
            leaf.content = prompt_text;
        }

        let prompt = self.prompt_for(&thread);
        let stream = self.provider.complete_stream(&prompt).await?;

        let outcome = self
            .stream_relay
            .run(&message.chat_id, Some(message.message_id.as_str()), stream, cancel)
            .await?;
        tracing::info!(
            "Relay: answered {} in card {} ({:?}, {} chars)",
            message.message_id,
            outcome.message_id,
            outcome.end,
            outcome.text.chars().count()
        );
        Ok(outcome)
    }

    fn prompt_for(&self, thread: &[ChatMessage]) -> Vec<PromptTurn> {
        let mut prompt = Vec::with_capacity(thread.len() + 1);
        if let Some(system) = &self.settings.system_prompt {
            prompt.push(PromptTurn::system(system.clone()));
        }
        prompt.extend(build_prompt(thread, &self.settings.bot_sender_id));
        prompt
    }

    /// Post `A new document titled "<title>" has been created.` to the notify chat.
    pub async fn notify_document_created(&self, title: &str) -> Result<Handled, RelayError> {
        let Some(chat_id) = self.settings.notify_chat_id.as_deref() else {
            tracing::warn!("Relay: document.create received but lark.notify_chat_id is not set");
            return Ok(Handled::Skipped);
        };
        let text = format!("A new document titled \"{title}\" has been created.");
        let message_id = self.send_text(chat_id, &text).await?;
        Ok(Handled::Notified(message_id))
    }

    /// Send a plain text message to `chat_id`.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, RelayError> {
        self.gateway
            .send_message(chat_id, &MessageBody::Text(text.to_string()), None)
            .await
    }

    /// One-shot, non-streaming completion for a single user message.
    pub async fn ask(&self, text: &str) -> Result<String, RelayError> {
        let mut prompt = self.prompt_for(&[]);
        prompt.push(PromptTurn::user(text));
        self.provider.complete(&prompt).await
    }
}
