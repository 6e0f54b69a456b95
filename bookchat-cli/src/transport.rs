//! HTTP transport from the CLI to the Bookchat server.

use async_trait::async_trait;
use bookchat_core::api::{ChatRequest, ChatResponse, ErrorBody, CHAT_PATH};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use thiserror::Error;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx reply carrying an `{error}` body.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Non-2xx reply without a readable error body.
    #[error("API error: {0}")]
    Status(u16),
}

/// Sends chat requests. Dropping a returned future or stream aborts the
/// underlying request.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Streaming mode: the raw text body, chunk by chunk.
    async fn send_stream(&self, request: &ChatRequest) -> Result<ByteStream, TransportError>;

    /// Non-streaming mode: the JSON reply envelope.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        // No overall timeout: streamed answers may take a while.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health` as raw JSON.
    pub async fn health(&self) -> Result<serde_json::Value, TransportError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, CHAT_PATH))
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send_stream(&self, request: &ChatRequest) -> Result<ByteStream, TransportError> {
        let resp = self.post_chat(request).await?;
        Ok(resp.bytes_stream().map_err(TransportError::Http).boxed())
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let resp = self.post_chat(request).await?;
        Ok(resp.json().await?)
    }
}

async fn error_from(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    match resp.json::<ErrorBody>().await {
        Ok(body) if !body.error.is_empty() => TransportError::Server {
            status,
            message: body.error,
        },
        _ => TransportError::Status(status),
    }
}
