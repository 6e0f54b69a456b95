//! Client-side chat session controller.
//!
//! Owns the active [`ChatSession`], talks to the server through a
//! [`ChatTransport`] and persists finished exchanges through a
//! [`SessionStore`]. Updates are optimistic: the user message and an empty
//! assistant placeholder are appended before the request goes out, and rolled
//! back if it fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bookchat_core::api::ChatRequest;
use bookchat_core::models::{generate_session_id, generate_session_title, now_millis};
use bookchat_core::{ChatSession, KeyValueStore, Message, SessionStore, StoreError};
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::transport::{ChatTransport, TransportError};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    Cancelled,
}

// ============================================================================
// In-flight request handle
// ============================================================================

/// Shared handle on the request currently in flight, if any. Clones refer
/// to the same slot, so a signal handler can cancel while a send is awaited.
#[derive(Clone, Default)]
pub struct CancelHandle {
    slot: Arc<Mutex<Option<(u64, CancellationToken)>>>,
    next_id: Arc<AtomicU64>,
}

impl CancelHandle {
    /// Register a new request, cancelling any previous one.
    pub fn begin(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.lock().replace((id, token.clone()));
        if let Some((_, old)) = previous {
            old.cancel();
        }
        (id, token)
    }

    /// Release the slot if it still belongs to request `id`.
    pub fn finish(&self, id: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
    }

    /// Cancel the in-flight request. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Incremental UTF-8 decoding
// ============================================================================

/// Decodes a byte stream whose chunk boundaries may split a character.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `pending + bytes` as is complete. Invalid sequences
    /// become U+FFFD; an incomplete trailing sequence is held back.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

// ============================================================================
// SessionController
// ============================================================================

pub struct SessionController<K: KeyValueStore, T: ChatTransport> {
    store: SessionStore<K>,
    transport: T,
    session: ChatSession,
    streaming: bool,
    is_loading: bool,
    error: Option<String>,
    in_flight: CancelHandle,
}

impl<K: KeyValueStore, T: ChatTransport> SessionController<K, T> {
    /// Start on a fresh, unsaved session.
    pub fn new(store: SessionStore<K>, transport: T, streaming: bool) -> Self {
        Self {
            store,
            transport,
            session: ChatSession::new(generate_session_id(), now_millis()),
            streaming,
            is_loading: false,
            error: None,
            in_flight: CancelHandle::default(),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn messages(&self) -> &[Message] {
        &self.session.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.in_flight.clone()
    }

    pub fn set_book_id(&mut self, book_id: Option<String>) {
        self.session.book_id = book_id;
    }

    /// Stored sessions, most recently updated first.
    pub fn list_sessions(&self) -> Vec<ChatSession> {
        let mut sessions = self.store.load_sessions();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Abandon the active session and start an empty one.
    pub fn new_chat(&mut self) {
        self.in_flight.cancel();
        let book_id = self.session.book_id.take();
        self.session = ChatSession::new(generate_session_id(), now_millis());
        self.session.book_id = book_id;
        self.error = None;
    }

    pub fn select_session(&mut self, session_id: &str) -> Result<(), ControllerError> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| ControllerError::SessionNotFound(session_id.to_string()))?;
        self.in_flight.cancel();
        self.session = session;
        self.error = None;
        Ok(())
    }

    /// Delete a stored session. Deleting the active one starts a new chat.
    pub fn delete_session(&mut self, session_id: &str) -> Result<(), ControllerError> {
        self.store.delete_session(session_id)?;
        if self.session.session_id == session_id {
            self.new_chat();
        }
        Ok(())
    }

    /// Send `content` as the next user message. `on_text` receives each
    /// decoded piece of the answer as it arrives.
    ///
    /// A failed request restores the previous messages and records the
    /// error (see [`Self::error`]). A cancelled one keeps any partial answer
    /// and persists nothing.
    pub async fn send_message(
        &mut self,
        content: &str,
        mut on_text: impl FnMut(&str),
    ) -> Result<SendOutcome, ControllerError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ControllerError::EmptyMessage);
        }

        let snapshot = self.session.messages.clone();
        self.session
            .messages
            .push(Message::user(content).with_timestamp(now_millis()));

        let request = ChatRequest {
            session_id: self.session.session_id.clone(),
            messages: self.session.messages.clone(),
            book_id: self.session.book_id.clone(),
            stream: Some(self.streaming),
        };

        self.session
            .messages
            .push(Message::assistant("").with_timestamp(now_millis()));
        self.is_loading = true;
        self.error = None;

        let (request_id, cancel) = self.in_flight.begin();
        let result = match self.session.messages.last_mut() {
            Some(placeholder) => {
                run_request(
                    &self.transport,
                    &request,
                    self.streaming,
                    &cancel,
                    placeholder,
                    &mut on_text,
                )
                .await
            }
            None => Ok(SendOutcome::Cancelled),
        };
        self.in_flight.finish(request_id);
        self.is_loading = false;

        match result {
            Ok(SendOutcome::Completed) => {
                self.finalize();
                Ok(SendOutcome::Completed)
            }
            Ok(SendOutcome::Cancelled) => {
                if self
                    .session
                    .messages
                    .last()
                    .is_some_and(|m| m.content.is_empty())
                {
                    self.session.messages.pop();
                }
                tracing::debug!(session_id = %self.session.session_id, "Request cancelled");
                Ok(SendOutcome::Cancelled)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session.session_id, error = %e, "Chat request failed");
                self.session.messages = snapshot;
                self.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    fn finalize(&mut self) {
        if self.session.title.is_none() {
            self.session.title = Some(generate_session_title(&self.session.messages));
        }
        self.session.touch(now_millis());
        if let Err(e) = self.store.save_session(&self.session) {
            tracing::error!(session_id = %self.session.session_id, error = %e, "Failed to save session");
        }
    }
}

impl<K: KeyValueStore, T: ChatTransport> Drop for SessionController<K, T> {
    fn drop(&mut self) {
        self.in_flight.cancel();
    }
}

/// Drive one request to completion, writing the answer into `placeholder`.
async fn run_request<T: ChatTransport>(
    transport: &T,
    request: &ChatRequest,
    streaming: bool,
    cancel: &CancellationToken,
    placeholder: &mut Message,
    on_text: &mut impl FnMut(&str),
) -> Result<SendOutcome, TransportError> {
    if !streaming {
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SendOutcome::Cancelled),
            reply = transport.send(request) => reply?,
        };
        placeholder.content = reply.message.content;
        if reply.message.timestamp.is_some() {
            placeholder.timestamp = reply.message.timestamp;
        }
        on_text(&placeholder.content);
        return Ok(SendOutcome::Completed);
    }

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(SendOutcome::Cancelled),
        stream = transport.send_stream(request) => stream?,
    };

    let mut decoder = Utf8Decoder::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SendOutcome::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                let text = decoder.push(&bytes);
                if !text.is_empty() {
                    placeholder.content.push_str(&text);
                    on_text(&text);
                }
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        placeholder.content.push_str(&tail);
        on_text(&tail);
    }
    Ok(SendOutcome::Completed)
}
