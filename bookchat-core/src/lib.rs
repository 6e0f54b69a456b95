pub mod api;
pub mod completion;
pub mod config;
pub mod error;
pub mod history;
pub mod models;
pub mod openai;
pub mod prompts;
pub mod session_store;
pub mod vector_store;

pub use config::{BookchatConfig, SessionConfig};
pub use completion::{CompletionBackend, CompletionMessage, CompletionRequest, CompletionStream};
pub use error::{ProviderError, StoreError};
pub use history::truncate_history;
pub use models::{ChatSession, Message, Role, SourceType};
pub use openai::OpenAiClient;
pub use prompts::{compose_developer_message, PromptComposer};
pub use session_store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use vector_store::{ContextChunk, VectorSearch};
