//! Decides whether an inbound message should be answered, and with what text.

use crate::channels::{ChatType, InboundMessage};

pub const DEFAULT_WAKE_PHRASES: &[&str] = &["yy", "鸭鸭"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Answer, using `text` as the latest user turn.
    Invoke { text: String },
    /// Stay silent.
    Skip,
}

#[derive(Debug, Clone)]
pub struct TriggerRules {
    wake_phrases: Vec<String>,
    bot_union_id: Option<String>,
}

impl Default for TriggerRules {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(), None)
    }
}

impl TriggerRules {
    pub fn new(wake_phrases: Vec<String>, bot_union_id: Option<String>) -> Self {
        Self {
            wake_phrases: wake_phrases.into_iter().filter(|p| !p.is_empty()).collect(),
            bot_union_id: bot_union_id.filter(|id| !id.is_empty()),
        }
    }

    /// First configured wake phrase that `text` starts with (case-sensitive).
    fn matching_phrase(&self, text: &str) -> Option<&str> {
        self.wake_phrases
            .iter()
            .map(String::as_str)
            .find(|phrase| text.starts_with(phrase))
    }

    fn mentions_bot(&self, message: &InboundMessage) -> bool {
        self.bot_union_id
            .as_deref()
            .is_some_and(|id| message.mentions_union_id(id))
    }

    /// Classify `message`, whose text has already had mention placeholders removed.
    ///
    /// Direct chats always invoke. Group chats invoke on a wake phrase or a bot
    /// mention; the phrase is stripped only when the bot was not also mentioned.
    pub fn classify(&self, message: &InboundMessage, text: &str) -> Trigger {
        if message.chat_type != ChatType::Group {
            return Trigger::Invoke {
                text: text.to_string(),
            };
        }

        let phrase = self.matching_phrase(text);
        let mentioned = self.mentions_bot(message);

        match (phrase, mentioned) {
            (Some(phrase), false) => Trigger::Invoke {
                text: text[phrase.len()..].trim().to_string(),
            },
            (_, true) => Trigger::Invoke {
                text: text.to_string(),
            },
            (None, false) => Trigger::Skip,
        }
    }
}
