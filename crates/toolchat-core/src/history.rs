//! History Formatter: caller-supplied turns to the message list the agent runs on.

use std::borrow::Cow;

use tracing::warn;

use crate::types::{HistoryEntry, Message};

/// Prepend the system instruction and map `user`/`bot` turns to roles.
/// Turns of any other type are dropped; order is preserved.
pub fn format_history(system_prompt: &str, history: &[HistoryEntry]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));

    for entry in history {
        match entry.kind_str() {
            Some("user") => messages.push(Message::user(entry.content.clone())),
            Some("bot") => messages.push(Message::assistant(entry.content.clone())),
            _ => {}
        }
    }

    messages
}

/// Cut `message` to at most `max_chars` characters, logging once when it does.
pub fn truncate_input(message: &str, max_chars: usize) -> Cow<'_, str> {
    match message.char_indices().nth(max_chars) {
        None => Cow::Borrowed(message),
        Some((byte_idx, _)) => {
            warn!(
                "Message truncated from {} to {} characters",
                message.chars().count(),
                max_chars
            );
            Cow::Owned(message[..byte_idx].to_string())
        }
    }
}
