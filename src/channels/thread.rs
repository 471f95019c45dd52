//! Reconstruction of a reply chain, newest message first.

use super::traits::{ChatMessage, MessageGateway};
use crate::error::RelayError;
use crate::util::char_len;

pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Walks `parent_id` links backward from a leaf message.
///
/// The walk stops after `max_depth` messages, when a message has no parent, or
/// once the collected content reaches `max_chars` characters. The size check
/// runs after a message is appended, so the last message may push the total
/// past the budget.
#[derive(Debug, Clone, Copy)]
pub struct ThreadFetcher {
    pub max_depth: usize,
    pub max_chars: usize,
}

impl Default for ThreadFetcher {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl ThreadFetcher {
    pub fn new(max_depth: usize, max_chars: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            max_chars,
        }
    }

    /// Fetch the thread ending at `leaf_id`, newest first.
    ///
    /// Any failed fetch aborts the walk with [`RelayError::Fetch`] naming the
    /// message that could not be read.
    pub async fn fetch_thread(
        &self,
        gateway: &dyn MessageGateway,
        leaf_id: &str,
    ) -> Result<Vec<ChatMessage>, RelayError> {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut total_chars = 0usize;
        let mut current_id = leaf_id.to_string();

        loop {
            let message = gateway
                .get_message(&current_id)
                .await
                .map_err(|e| e.at_message(current_id.as_str()))?;
            total_chars += char_len(&message.content);
            let parent_id = message.parent_id.clone();
            messages.push(message);

            if messages.len() >= self.max_depth {
                break;
            }
            match parent_id {
                Some(parent) if total_chars < self.max_chars => current_id = parent,
                _ => break,
            }
        }

        tracing::debug!(
            "Relay: fetched thread of {} message(s), {total_chars} chars, from {leaf_id}",
            messages.len()
        );
        Ok(messages)
    }
}
