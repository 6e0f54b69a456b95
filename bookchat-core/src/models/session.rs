use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Message, Role};

/// Longest title derived from the first user message, in characters.
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_id: Option<String>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, now: i64) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            title: None,
            book_id: None,
        }
    }

    /// Advance `updated_at`, never moving it backwards.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Stored title, or one derived from the first user message.
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| generate_session_title(&self.messages))
    }
}

/// `session-<epoch ms>-<9 hex chars>`.
pub fn generate_session_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("session-{}-{}", super::now_millis(), &random[..9])
}

pub fn generate_session_title(messages: &[Message]) -> String {
    match messages.iter().find(|m| m.role == Role::User) {
        Some(first) => {
            let cut: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
            let title = cut.trim();
            if cut.chars().count() < first.content.chars().count() {
                format!("{}...", title)
            } else {
                title.to_string()
            }
        }
        None => "New Chat".to_string(),
    }
}
