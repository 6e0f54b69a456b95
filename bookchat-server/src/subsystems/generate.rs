//! Generation subsystem: composes the prompt and calls the completion backend
//!
//! Message order sent to the model:
//! 1. system prompt (role = system)
//! 2. developer message carrying the book context (role = user)
//! 3. prior history, system messages skipped, roles preserved
//! 4. the current user message

use bookchat_core::completion::{
    CompletionBackend, CompletionMessage, CompletionRequest, CompletionStream,
};
use bookchat_core::config::CompletionConfig;
use bookchat_core::models::{Message, Role, SourceType};
use bookchat_core::prompts::{compose_developer_message, PromptComposer};
use bookchat_core::vector_store::ContextChunk;
use bookchat_core::ProviderError;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const BOOK_PHRASES: [&str; 3] = ["book", "the book", "author"];
const GENERAL_KNOWLEDGE_PHRASES: [&str; 3] = [
    "general knowledge",
    "not from the book",
    "not explicitly in the book",
];

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("OPENAI_API_KEY is not set")]
    NotConfigured,

    #[error("Failed to generate response: {0}")]
    Provider(#[from] ProviderError),
}

/// Everything one turn needs besides the backend.
pub struct GenerationInput<'a> {
    pub user_message: &'a str,
    pub history: &'a [Message],
    pub book_context: &'a [ContextChunk],
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedResponse {
    pub content: String,
    pub source_type: SourceType,
}

pub fn build_messages(
    system_prompt: String,
    developer_message: String,
    history: &[Message],
    user_message: &str,
) -> Vec<CompletionMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(CompletionMessage::new(Role::System, system_prompt));
    messages.push(CompletionMessage::new(Role::User, developer_message));
    messages.extend(
        history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| CompletionMessage::new(m.role, m.content.clone())),
    );
    messages.push(CompletionMessage::new(Role::User, user_message));
    messages
}

pub fn build_request(
    prompts: &PromptComposer,
    config: &CompletionConfig,
    input: &GenerationInput<'_>,
) -> CompletionRequest {
    let developer_message = compose_developer_message(input.book_context, input.history.len());
    CompletionRequest {
        messages: build_messages(
            prompts.compose_system_prompt(),
            developer_message,
            input.history,
            input.user_message,
        ),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

/// Heuristic label from phrases in the answer. Approximate: it pattern
/// matches the model's own wording.
pub fn classify_source(response: &str, has_context: bool) -> SourceType {
    if !has_context {
        return SourceType::General;
    }

    let lower = response.to_lowercase();
    let mentions_book = BOOK_PHRASES.iter().any(|p| lower.contains(p));
    let labels_general = GENERAL_KNOWLEDGE_PHRASES.iter().any(|p| lower.contains(p));

    match (mentions_book, labels_general) {
        (true, true) => SourceType::Mixed,
        (true, false) => SourceType::Book,
        (false, true) => SourceType::General,
        (false, false) => SourceType::Mixed,
    }
}

pub async fn generate_response(
    backend: Option<&dyn CompletionBackend>,
    prompts: &PromptComposer,
    config: &CompletionConfig,
    input: GenerationInput<'_>,
) -> Result<GeneratedResponse, GenerationError> {
    let backend = backend.ok_or(GenerationError::NotConfigured)?;
    let request = build_request(prompts, config, &input);

    let content = backend.complete(&request).await.map_err(|e| {
        tracing::error!(error = %e, model = backend.model(), "Error generating chat response");
        GenerationError::from(e)
    })?;

    let source_type = classify_source(&content, !input.book_context.is_empty());
    Ok(GeneratedResponse {
        content,
        source_type,
    })
}

/// Start a streamed completion. Errors before the first byte are returned;
/// later ones end the stream and are logged here.
pub async fn generate_response_stream(
    backend: Option<&dyn CompletionBackend>,
    prompts: &PromptComposer,
    config: &CompletionConfig,
    input: GenerationInput<'_>,
    cancel: CancellationToken,
) -> Result<CompletionStream, GenerationError> {
    let backend = backend.ok_or(GenerationError::NotConfigured)?;
    let request = build_request(prompts, config, &input);

    let stream = backend
        .complete_stream(&request, cancel)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, model = backend.model(), "Error starting chat response stream");
            GenerationError::from(e)
        })?;

    Ok(stream
        .inspect(|item| {
            if let Err(e) = item {
                tracing::error!(error = %e, "Chat response stream aborted");
            }
        })
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Backend that records the last request and replays fixed chunks.
    struct ScriptedBackend {
        chunks: Vec<&'static str>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(self.chunks.concat())
        }

        async fn complete_stream(
            &self,
            request: &CompletionRequest,
            _cancel: CancellationToken,
        ) -> Result<CompletionStream, ProviderError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            let items: Vec<Result<Bytes, ProviderError>> =
                self.chunks.iter().map(|c| Ok(Bytes::from(*c))).collect();
            Ok(futures::stream::iter(items).boxed())
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn composer() -> PromptComposer {
        PromptComposer::with_search_dirs(vec![PathBuf::from("/nonexistent/bookchat")])
    }

    fn chunk(content: &str) -> ContextChunk {
        ContextChunk {
            content: content.to_string(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_build_messages_order() {
        let history = vec![
            Message::user("q1"),
            Message::system("ignored"),
            Message::assistant("a1"),
        ];
        let messages = build_messages("sys".into(), "dev".into(), &history, "q2");

        let pairs: Vec<(Role, &str)> = messages.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                (Role::System, "sys"),
                (Role::User, "dev"),
                (Role::User, "q1"),
                (Role::Assistant, "a1"),
                (Role::User, "q2"),
            ]
        );
    }

    #[test]
    fn test_classify_without_context_is_general() {
        assert_eq!(classify_source("The book says so.", false), SourceType::General);
    }

    #[test]
    fn test_classify_book_only() {
        assert_eq!(classify_source("The author argues that ...", true), SourceType::Book);
    }

    #[test]
    fn test_classify_general_only() {
        assert_eq!(
            classify_source("From general knowledge, photosynthesis ...", true),
            SourceType::General
        );
    }

    #[test]
    fn test_classify_both_is_mixed() {
        assert_eq!(
            classify_source("The book covers X; Y is general knowledge.", true),
            SourceType::Mixed
        );
    }

    #[test]
    fn test_classify_neither_with_context_is_mixed() {
        assert_eq!(classify_source("Sure, here is an answer.", true), SourceType::Mixed);
    }

    #[tokio::test]
    async fn test_generate_response_labels_source() {
        let backend = ScriptedBackend::new(vec!["The book ", "says hello."]);
        let context = [chunk("hello passage")];
        let input = GenerationInput {
            user_message: "hi",
            history: &[],
            book_context: &context,
        };

        let response = generate_response(Some(&backend), &composer(), &CompletionConfig::default(), input)
            .await
            .unwrap();
        assert_eq!(response.content, "The book says hello.");
        assert_eq!(response.source_type, SourceType::Book);

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages.len(), 3);
        assert!(request.messages[1].content.contains("[Chunk 1]\nhello passage"));
        assert_eq!(request.max_tokens, 1000);
    }

    #[tokio::test]
    async fn test_generate_without_backend_fails() {
        let input = GenerationInput {
            user_message: "hi",
            history: &[],
            book_context: &[],
        };
        let result = generate_response(None, &composer(), &CompletionConfig::default(), input).await;
        assert!(matches!(result, Err(GenerationError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_stream_matches_full_response() {
        let backend = ScriptedBackend::new(vec!["Para", "phrased ", "answer."]);
        let config = CompletionConfig::default();
        let history = [Message::user("earlier"), Message::assistant("reply")];

        let full = generate_response(
            Some(&backend),
            &composer(),
            &config,
            GenerationInput { user_message: "now", history: &history, book_context: &[] },
        )
        .await
        .unwrap();

        let stream = generate_response_stream(
            Some(&backend),
            &composer(),
            &config,
            GenerationInput { user_message: "now", history: &history, book_context: &[] },
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        let streamed: String = chunks.iter().map(|b| String::from_utf8_lossy(b).into_owned()).collect();

        assert_eq!(streamed, full.content);
        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert!(request.messages[1].content.contains("This is message 3 in the conversation."));
    }

    #[test]
    fn test_provider_error_message_is_wrapped() {
        let err = GenerationError::from(ProviderError::EmptyResponse);
        assert_eq!(err.to_string(), "Failed to generate response: No response from provider");
    }
}
