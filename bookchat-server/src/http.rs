//! Bookchat HTTP API
//!
//! Axum-based HTTP server exposing the chat endpoint to the client.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning a status and JSON body (or a byte stream for the
//! streamed chat reply). The inner functions are testable without a socket.
//!
//! Endpoints:
//! - GET  /health: provider / vector store configuration status
//! - GET  /version: server version info
//! - POST /api/chat: grounded chat completion (streamed or JSON)

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bookchat_core::api::CHAT_PATH;
use bookchat_core::completion::CompletionStream;
use bookchat_core::prompts::PromptComposer;
use bookchat_core::{BookchatConfig, CompletionBackend, OpenAiClient, ProviderError, VectorSearch};
use futures::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::chat::{self, ChatReply, ValidationError};

/// Shared state for all HTTP handlers. Immutable after startup.
#[derive(Clone)]
pub struct HttpState {
    pub config: BookchatConfig,
    pub completion: Option<Arc<dyn CompletionBackend>>,
    pub search: Option<Arc<dyn VectorSearch>>,
    pub prompts: PromptComposer,
}

impl HttpState {
    /// Build state from config. A missing API key leaves both provider
    /// handles unset; chat requests then fail with a 500.
    pub fn from_config(config: BookchatConfig) -> Result<Self, ProviderError> {
        let prompts = PromptComposer::new(config.prompts.dir.clone());

        let client = match OpenAiClient::new(&config.provider) {
            Ok(c) => Some(Arc::new(c)),
            Err(ProviderError::MissingApiKey) => None,
            Err(e) => return Err(e),
        };

        let completion = client
            .clone()
            .map(|c| c as Arc<dyn CompletionBackend>);
        let search = client.map(|c| c as Arc<dyn VectorSearch>);

        Ok(Self {
            config,
            completion,
            search,
            prompts,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route(CHAT_PATH, post(chat_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Bookchat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check. Reports which provider features are configured.
pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "model": state.config.provider.model,
            "provider_configured": state.completion.is_some(),
            "vector_store_configured": state.config.retrieval.vector_store_id.is_some(),
            "streaming": state.config.completion.streaming,
        }),
    )
}

/// Inner version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "bookchat/1",
    })
}

/// Inner chat. Parses the raw body and runs the orchestrator.
pub async fn chat_inner(state: &HttpState, body: &[u8], cancel: CancellationToken) -> ChatReply {
    let payload: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => {
            return ChatReply::error(
                StatusCode::BAD_REQUEST,
                ValidationError::InvalidJson.to_string(),
            )
        }
    };
    chat::handle_chat(state, payload, cancel).await
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn chat_handler(State(state): State<Arc<HttpState>>, body: Bytes) -> Response {
    let cancel = CancellationToken::new();

    match chat_inner(&state, &body, cancel.clone()).await {
        ChatReply::Json(status, body) => (status, Json(body)).into_response(),
        ChatReply::Stream(stream) => stream_response(stream, cancel),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Wrap a completion stream as a `text/event-stream` response body. The
/// body owns a guard that cancels `cancel` when the client goes away.
pub fn stream_response(stream: CompletionStream, cancel: CancellationToken) -> Response {
    let body = CancelOnDrop {
        inner: stream,
        _guard: cancel.drop_guard(),
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

struct CancelOnDrop {
    inner: CompletionStream,
    _guard: DropGuard,
}

impl Stream for CancelOnDrop {
    type Item = Result<Bytes, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
