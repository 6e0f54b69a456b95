//! Bounds the conversation history sent to the model by message count.

use crate::config::SessionConfig;
use crate::models::{Message, Role};

/// Fallback when a configured `max_history_length` is zero.
pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 20;

/// System messages first, then the most recent `max_history_length`
/// non-system messages. Relative order inside each group is preserved.
pub fn truncate_history(messages: &[Message], config: &SessionConfig) -> Vec<Message> {
    let max_length = match config.max_history_length {
        0 => DEFAULT_MAX_HISTORY_LENGTH,
        n => n,
    };

    let (system, other): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.role == Role::System);

    let skip = other.len().saturating_sub(max_length);

    system
        .into_iter()
        .chain(other.into_iter().skip(skip))
        .cloned()
        .collect()
}
