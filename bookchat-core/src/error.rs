use thiserror::Error;

/// Errors raised by the hosted completion / vector store provider client.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("No response from provider")]
    EmptyResponse,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    /// True for the "store not found" class of errors: HTTP 404, a
    /// `not_found` error code, or a message mentioning "not found".
    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::Api {
                status,
                code,
                message,
            } => {
                *status == 404
                    || code.as_deref() == Some("not_found")
                    || message.contains("not found")
            }
            _ => false,
        }
    }
}

/// Errors raised by the local session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
