//! OpenAI-compatible provider client.
//!
//! One explicitly constructed [`OpenAiClient`] serves both provider roles:
//! - [`CompletionBackend`] via `POST /chat/completions` (plain or SSE streamed)
//! - [`VectorSearch`] via `POST /vector_stores/{id}/search`
//!
//! The client is built once at startup and shared behind an `Arc`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::completion::{CompletionBackend, CompletionMessage, CompletionRequest, CompletionStream};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::vector_store::{SearchHit, VectorSearch};

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    max_num_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorDetail {
    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

// ============================================================================
// OpenAiClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.to_string(),
            _ => return Err(ProviderError::MissingApiKey),
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_chat(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response)
    }
}

/// Turn a non-2xx response into `ProviderError::Api`, reading the provider's
/// `{"error": {"message", "code"}}` body when present.
async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error);

    let (code, message) = match detail {
        Some(d) => (d.code_string(), d.message),
        None => (None, body),
    };

    tracing::debug!(status, code = ?code, message = %message, "Provider API error");

    ProviderError::Api {
        status,
        code,
        message,
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let response = self.send_chat(request, false).await?;
        let text = response.text().await?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream, ProviderError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(stream::empty().boxed());
            }
            res = self.send_chat(request, true) => res?,
        };

        Ok(delta_stream(response.bytes_stream().boxed(), cancel))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl VectorSearch for OpenAiClient {
    async fn search(
        &self,
        store_id: &str,
        query: &str,
        max_num_results: u32,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!("{}/vector_stores/{}/search", self.base_url, store_id);
        let body = SearchBody {
            query,
            max_num_results,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let text = response.text().await?;
        let parsed: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.data)
    }
}

// ============================================================================
// SSE delta stream
// ============================================================================

struct SseState {
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<Bytes, ProviderError>>,
    done: bool,
    cancel: CancellationToken,
}

impl SseState {
    fn drain_lines(&mut self) {
        while !self.done {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line));
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }

        match parse_stream_data(data) {
            Ok(Some(text)) => self.pending.push_back(Ok(Bytes::from(text))),
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

/// Content delta of one SSE `data:` payload, if any.
fn parse_stream_data(data: &str) -> Result<Option<String>, ProviderError> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable completion stream chunk");
            return Ok(None);
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown stream error");
        return Err(ProviderError::Stream(message.to_string()));
    }

    let chunk: StreamChunk = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed completion stream chunk");
            return Ok(None);
        }
    };

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

/// Re-stream the provider's SSE body as raw text deltas. `cancel` is checked
/// before every upstream read; once it fires the upstream body is dropped.
fn delta_stream(
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    cancel: CancellationToken,
) -> CompletionStream {
    let state = SseState {
        upstream,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
        cancel,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => {
                    tracing::debug!("Completion stream cancelled by client");
                    return None;
                }
                next = state.upstream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.pending.push_back(Err(ProviderError::Http(e)));
                }
                None => {
                    state.done = true;
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        state.handle_line(&String::from_utf8_lossy(&rest));
                    }
                }
            }
        }
    })
    .boxed()
}

// ============================================================================
// TESTS
// ============================================================================
