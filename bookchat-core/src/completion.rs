//! Chat completion abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::models::Role;

/// Incremental text fragments of a streamed completion.
pub type CompletionStream = BoxStream<'static, Result<Bytes, ProviderError>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

impl CompletionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<CompletionMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Single request, full text back.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Streamed request. Each item is one non-empty delta. The stream ends
    /// when the provider finishes or `cancel` fires; provider errors end it
    /// with an `Err` item.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream, ProviderError>;

    /// Model name for logging.
    fn model(&self) -> &str;
}
