//! OpenAI-compatible client against a mock server.

use httpmock::prelude::*;
use serde_json::json;

use millstone::error::CorpusError;
use millstone::llm::openai::{OpenAiClient, OpenAiConfig};
use millstone::llm::{ChatModel, EmbeddingModel, TokenBucket};

fn client_for(server: &MockServer) -> OpenAiClient {
    let config = OpenAiConfig::new("test-key")
        .with_base_url(server.base_url())
        .with_dimensions(4);
    OpenAiClient::new(config, TokenBucket::unlimited()).unwrap()
}

#[tokio::test]
async fn chat_completion_roundtrip() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer test-key");
        then.status(200).json_body(json!({
            "choices": [{ "message": { "content": "{\"title\": \"ok\"}" } }]
        }));
    });

    let client = client_for(&server);
    let reply = client.complete("system", "user", 256).await.unwrap();
    assert_eq!(reply, "{\"title\": \"ok\"}");
    mock.assert();
}

#[tokio::test]
async fn rate_limit_surfaces_with_retry_hint() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(429)
            .header("retry-after", "7")
            .body("slow down");
    });

    let client = client_for(&server);
    let err = client.complete("s", "u", 16).await.unwrap_err();
    match err {
        CorpusError::RateLimited {
            retry_after: Some(delay),
            ..
        } => assert_eq!(delay.as_secs(), 7),
        other => panic!("expected RateLimited with hint, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_upstream() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(503).body("maintenance");
    });

    let client = client_for(&server);
    let err = client.complete("s", "u", 16).await.unwrap_err();
    assert!(matches!(err, CorpusError::Upstream(_)));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn embedding_roundtrip() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/embeddings");
        then.status(200).json_body(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3, 0.4] }]
        }));
    });

    let client = client_for(&server);
    let vector = client.embed("some text").await.unwrap();
    assert_eq!(vector.len(), 4);
    assert_eq!(client.dimensions(), 4);
}

#[tokio::test]
async fn empty_embedding_response_fails() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/embeddings");
        then.status(200).json_body(json!({ "data": [] }));
    });

    let client = client_for(&server);
    let err = client.embed("text").await.unwrap_err();
    assert!(matches!(err, CorpusError::EmbeddingFailed(_)));
}
