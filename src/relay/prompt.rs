use crate::channels::ChatMessage;
use crate::providers::PromptTurn;

/// Turn a newest-first thread into an oldest-first prompt.
///
/// Messages sent by `bot_sender_id` become assistant turns; everything else is
/// a user turn.
pub fn build_prompt(thread: &[ChatMessage], bot_sender_id: &str) -> Vec<PromptTurn> {
    thread
        .iter()
        .rev()
        .map(|message| {
            if message.sender_id == bot_sender_id {
                PromptTurn::assistant(message.content.clone())
            } else {
                PromptTurn::user(message.content.clone())
            }
        })
        .collect()
}
