use crate::channels::card::Card;
use crate::error::RelayError;
use async_trait::async_trait;

/// A message fetched back from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub content: String,
    pub parent_id: Option<String>,
    pub sender_id: String,
}

/// Outbound message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Plain text message (`msg_type = "text"`).
    Text(String),
    /// Interactive card (`msg_type = "interactive"`), the only kind that can be patched.
    Card(Card),
}

impl MessageBody {
    pub fn msg_type(&self) -> &'static str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::Card(_) => "interactive",
        }
    }

    /// The `content` field as the platform expects it: a JSON document serialized to a string.
    pub fn content_json(&self) -> String {
        match self {
            MessageBody::Text(text) => serde_json::json!({ "text": text }).to_string(),
            MessageBody::Card(card) => card.to_json().to_string(),
        }
    }
}

/// Chat platform operations the relay depends on.
///
/// Every call carries the current tenant bearer token. Non-success responses
/// surface as [`RelayError::Gateway`]; nothing here retries.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Fetch a single message by id.
    async fn get_message(&self, message_id: &str) -> Result<ChatMessage, RelayError>;

    /// Send `body` to `chat_id`, or as a reply to `reply_to` when given.
    /// Returns the id of the created message.
    async fn send_message(
        &self,
        chat_id: &str,
        body: &MessageBody,
        reply_to: Option<&str>,
    ) -> Result<String, RelayError>;

    /// Replace the content of a previously sent card.
    async fn patch_message(&self, message_id: &str, card: &Card) -> Result<(), RelayError>;
}
