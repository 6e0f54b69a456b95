//! Chat orchestrator for `POST /api/chat`
//!
//! validate → retrieve context (best-effort) → compose prompt → complete → respond
//!
//! Validation failures are 400 with `{error}`; generation failures are 500
//! with `{error}`. The handler keeps no state between requests.

use axum::http::StatusCode;
use bookchat_core::api::{ChatResponse, ErrorBody};
use bookchat_core::completion::CompletionStream;
use bookchat_core::history::truncate_history;
use bookchat_core::models::{now_millis, Message, Role};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::http::HttpState;
use crate::subsystems::generate::{self, GenerationInput};
use crate::subsystems::retrieve;

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid JSON body")]
    InvalidJson,

    #[error("Invalid or missing sessionId")]
    InvalidSessionId,

    #[error("Invalid or empty messages array")]
    InvalidMessages,

    #[error("No user message found")]
    NoUserMessage,

    #[error("User message is empty")]
    EmptyUserMessage,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChat {
    pub session_id: String,
    pub book_id: Option<String>,
    /// Latest user message, trimmed.
    pub user_message: String,
    /// Messages before the latest user message.
    pub history: Vec<Message>,
    pub stream: Option<bool>,
}

pub enum ChatReply {
    Json(StatusCode, Value),
    Stream(CompletionStream),
}

impl ChatReply {
    pub fn error(status: StatusCode, msg: impl Into<String>) -> Self {
        let body = serde_json::to_value(ErrorBody::new(msg))
            .unwrap_or_else(|_| serde_json::json!({"error": "Internal server error"}));
        ChatReply::Json(status, body)
    }
}

pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.trim().is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && !session_id.chars().any(char::is_control)
}

pub fn validate_chat_request(body: &Value) -> Result<ValidatedChat, ValidationError> {
    let body = body.as_object().ok_or(ValidationError::InvalidJson)?;

    let session_id = match body.get("sessionId").and_then(Value::as_str) {
        Some(id) if is_valid_session_id(id) => id.to_string(),
        _ => return Err(ValidationError::InvalidSessionId),
    };

    let messages: Vec<Message> = match body.get("messages") {
        Some(Value::Array(items)) if !items.is_empty() => {
            serde_json::from_value(Value::Array(items.clone()))
                .map_err(|_| ValidationError::InvalidMessages)?
        }
        _ => return Err(ValidationError::InvalidMessages),
    };

    let user_index = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .ok_or(ValidationError::NoUserMessage)?;

    let user_message = messages[user_index].content.trim().to_string();
    if user_message.is_empty() {
        return Err(ValidationError::EmptyUserMessage);
    }

    let book_id = body
        .get("bookId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let stream = body.get("stream").and_then(Value::as_bool);

    let mut history = messages;
    history.truncate(user_index);

    Ok(ValidatedChat {
        session_id,
        book_id,
        user_message,
        history,
        stream,
    })
}

pub async fn handle_chat(state: &HttpState, body: Value, cancel: CancellationToken) -> ChatReply {
    let chat = match validate_chat_request(&body) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected chat request");
            return ChatReply::error(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let history = truncate_history(&chat.history, &state.config.session);
    let streaming = chat.stream.unwrap_or(state.config.completion.streaming);

    tracing::info!(
        session_id = %chat.session_id,
        book_id = ?chat.book_id,
        history_len = history.len(),
        streaming,
        "Chat request"
    );

    let book_context = retrieve::retrieve_book_context(
        state.search.as_deref(),
        state.config.retrieval.vector_store_id.as_deref(),
        &chat.user_message,
        state.config.retrieval.top_k,
    )
    .await;

    let input = GenerationInput {
        user_message: &chat.user_message,
        history: &history,
        book_context: &book_context,
    };

    if streaming {
        return match generate::generate_response_stream(
            state.completion.as_deref(),
            &state.prompts,
            &state.config.completion,
            input,
            cancel,
        )
        .await
        {
            Ok(stream) => ChatReply::Stream(stream),
            Err(e) => ChatReply::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
    }

    let generated = match generate::generate_response(
        state.completion.as_deref(),
        &state.prompts,
        &state.config.completion,
        input,
    )
    .await
    {
        Ok(g) => g,
        Err(e) => return ChatReply::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let response = ChatResponse {
        message: Message::assistant(generated.content).with_timestamp(now_millis()),
        session_id: chat.session_id,
        source_type: Some(generated.source_type),
    };

    match serde_json::to_value(&response) {
        Ok(body) => ChatReply::Json(StatusCode::OK, body),
        Err(e) => ChatReply::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
