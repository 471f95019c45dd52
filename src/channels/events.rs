//! Decoding of decrypted event callbacks.

use serde::Deserialize;
use serde_json::Value;

/// A decrypted callback, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Endpoint ownership check; the challenge must be echoed back.
    UrlVerification { challenge: String },
    /// A document was created in a watched space.
    DocumentCreated { title: String },
    /// A text message addressed to (or visible to) the bot.
    Message(InboundMessage),
    /// Anything else; carries a short description for logging.
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatType {
    /// Direct chat between one user and the bot.
    P2p,
    Group,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_id: String,
    pub chat_type: ChatType,
    pub text: String,
    pub mentions: Vec<Mention>,
}

impl InboundMessage {
    pub fn mentions_union_id(&self, union_id: &str) -> bool {
        self.mentions
            .iter()
            .any(|m| m.id.union_id.as_deref() == Some(union_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Mention {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub id: MentionId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MentionId {
    pub union_id: Option<String>,
    pub open_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LarkMessage {
    message_id: String,
    chat_id: String,
    #[serde(default)]
    chat_type: String,
    message_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    mentions: Vec<Mention>,
}

/// Classify a decrypted callback payload.
pub fn parse_event(payload: &Value) -> InboundEvent {
    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = payload
            .get("challenge")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return InboundEvent::UrlVerification { challenge };
    }

    if payload.get("action").and_then(Value::as_str) == Some("document.create") {
        let title = payload
            .pointer("/resource/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return InboundEvent::DocumentCreated { title };
    }

    let Some(raw_message) = payload.pointer("/event/message") else {
        let kind = payload
            .pointer("/header/event_type")
            .or_else(|| payload.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return InboundEvent::Ignored(format!("unhandled event type {kind}"));
    };

    let message = match LarkMessage::deserialize(raw_message) {
        Ok(message) => message,
        Err(e) => return InboundEvent::Ignored(format!("malformed message event: {e}")),
    };

    if message.message_type != "text" {
        return InboundEvent::Ignored(format!(
            "unsupported message type {}",
            message.message_type
        ));
    }

    let text = serde_json::from_str::<Value>(&message.content)
        .ok()
        .and_then(|v| v.get("text").and_then(Value::as_str).map(String::from));
    let Some(text) = text else {
        return InboundEvent::Ignored("text message without text content".into());
    };

    let chat_type = if message.chat_type == "group" {
        ChatType::Group
    } else {
        ChatType::P2p
    };

    InboundEvent::Message(InboundMessage {
        message_id: message.message_id,
        chat_id: message.chat_id,
        chat_type,
        text,
        mentions: message.mentions,
    })
}

/// Verification token carried by the callback (`token` in v1 payloads, `header.token` in v2).
pub fn verification_token(payload: &Value) -> Option<&str> {
    payload
        .get("token")
        .or_else(|| payload.pointer("/header/token"))
        .and_then(Value::as_str)
}
