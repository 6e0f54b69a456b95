//! HTTP integration tests for the Bookchat API
//!
//! A wiremock server stands in for the hosted completion / vector store
//! provider; requests go through the real router via `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bookchat_core::BookchatConfig;
use bookchat_server::http::{build_router, HttpState};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(provider: &MockServer, vector_store_id: Option<&str>) -> BookchatConfig {
    let mut config = BookchatConfig::default();
    config.provider.api_key = Some("test-key".to_string());
    config.provider.base_url = provider.uri();
    config.provider.model = "gpt-test".to_string();
    config.retrieval.vector_store_id = vector_store_id.map(str::to_string);
    config
}

fn app_for(config: BookchatConfig) -> Router {
    let state = HttpState::from_config(config).unwrap();
    build_router(Arc::new(state))
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for d in deltas {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": d}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

// ===========================================================================
// TEST 1: GET /health and GET /version
// ===========================================================================
#[tokio::test]
async fn test_health_and_version_endpoints() {
    let provider = MockServer::start().await;
    let app = app_for(config_for(&provider, None));

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["provider_configured"], true);
    assert_eq!(json["vector_store_configured"], false);
    assert_eq!(json["model"], "gpt-test");

    let req = Request::builder().uri("/version").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["protocol"], "bookchat/1");
}

// ===========================================================================
// TEST 2: validation failures are 400 with {error} and never reach the provider
// ===========================================================================
#[tokio::test]
async fn test_empty_messages_is_400() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&provider)
        .await;
    let app = app_for(config_for(&provider, None));

    let resp = app
        .oneshot(chat_request(json!({"sessionId": "s1", "messages": []})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await, json!({"error": "Invalid or empty messages array"}));
}

#[tokio::test]
async fn test_whitespace_user_message_is_400() {
    let provider = MockServer::start().await;
    let app = app_for(config_for(&provider, None));

    let resp = app
        .oneshot(chat_request(json!({
            "sessionId": "s1",
            "messages": [{"role": "user", "content": "   "}]
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "User message is empty");
}

#[tokio::test]
async fn test_invalid_json_and_session_id_are_400() {
    let provider = MockServer::start().await;
    let app = app_for(config_for(&provider, None));

    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "Invalid JSON body");

    let resp = app
        .oneshot(chat_request(json!({
            "sessionId": 7,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "Invalid or missing sessionId");
}

// ===========================================================================
// TEST 3: streaming end-to-end without a vector store sends the no-context
// placeholder and relays the deltas
// ===========================================================================
#[tokio::test]
async fn test_stream_without_vector_store_uses_placeholder() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "model": "gpt-test"})))
        .and(body_string_contains("(No relevant book context found)"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hello ", "reader."]), "text/event-stream"),
        )
        .expect(1)
        .mount(&provider)
        .await;
    let app = app_for(config_for(&provider, None));

    let resp = app
        .oneshot(chat_request(json!({
            "sessionId": "s1",
            "messages": [{"role": "user", "content": "What is this book about?"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(resp.headers()[header::CONNECTION], "keep-alive");

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(std::str::from_utf8(&body).unwrap(), "Hello reader.");
}

// ===========================================================================
// TEST 4: non-streaming reply envelope, grounded in retrieved chunks
// ===========================================================================
#[tokio::test]
async fn test_non_streaming_reply_with_book_context() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vector_stores/vs_test/search"))
        .and(body_partial_json(json!({"query": "Who wrote it?", "max_num_results": 5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "vector_store.search_results.page",
            "data": [{
                "file_id": "file-1",
                "filename": "book.pdf",
                "score": 0.91,
                "content": [{"type": "text", "text": "Written by the author in 1999."}]
            }]
        })))
        .expect(1)
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("[Chunk 1]"))
        .and(body_string_contains("Written by the author in 1999."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "The book says the author wrote it in 1999."}}]
        })))
        .expect(1)
        .mount(&provider)
        .await;
    let app = app_for(config_for(&provider, Some("vs_test")));

    let resp = app
        .oneshot(chat_request(json!({
            "sessionId": "s42",
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"},
                {"role": "user", "content": "Who wrote it?"}
            ],
            "stream": false
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["sessionId"], "s42");
    assert_eq!(json["sourceType"], "book");
    assert_eq!(json["message"]["role"], "assistant");
    assert_eq!(json["message"]["content"], "The book says the author wrote it in 1999.");
    assert!(json["message"]["timestamp"].is_i64());
}

// ===========================================================================
// TEST 5: a missing vector store degrades to no context
// ===========================================================================
#[tokio::test]
async fn test_missing_vector_store_degrades_to_placeholder() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vector_stores/vs_gone/search"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "No vector store found with id 'vs_gone'.", "code": null}
        })))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("(No relevant book context found)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "From general knowledge, yes."}}]
        })))
        .expect(1)
        .mount(&provider)
        .await;
    let app = app_for(config_for(&provider, Some("vs_gone")));

    let resp = app
        .oneshot(chat_request(json!({
            "sessionId": "s1",
            "messages": [{"role": "user", "content": "Is it long?"}],
            "stream": false
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["sourceType"], "general");
}

// ===========================================================================
// TEST 6: provider failure is 500 with {error}
// ===========================================================================
#[tokio::test]
async fn test_provider_failure_is_500() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "The server had an error", "code": "server_error"}
        })))
        .mount(&provider)
        .await;
    let app = app_for(config_for(&provider, None));

    let resp = app
        .oneshot(chat_request(json!({
            "sessionId": "s1",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = body_json(resp).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Failed to generate response"), "got {}", error);
    assert!(error.contains("The server had an error"));
}
