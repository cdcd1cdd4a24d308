use nl2sql_core::providers::embedder::openai::OpenAIEmbedder;
use nl2sql_core::providers::embedder::Embedder;
use nl2sql_core::providers::llm::openai::OpenAiCompatClient;
use nl2sql_core::providers::llm::{InferenceClient, LlmClient, LlmError};
use nl2sql_core::{ErrorKind, Provider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OpenAiCompatClient {
    OpenAiCompatClient::new("gpt-test".into(), "sk-test".into(), 0.0, 256)
        .with_base_url(format!("{}/v1/", server.uri()))
}

#[tokio::test]
async fn chat_completion_content_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-test", "max_tokens": 256 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "SELECT 1;" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = client(&server).complete("count things").await.unwrap();
    assert_eq!(resp.text, "SELECT 1;");
    assert_eq!(resp.model, "gpt-test");
}

#[tokio::test]
async fn http_429_is_quota_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    match client(&server).complete("q").await.unwrap_err() {
        LlmError::QuotaExceeded { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn quota_wording_in_error_body_is_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": "insufficient_quota", "message": "You exceeded your current quota" }
        })))
        .mount(&server)
        .await;

    let err = client(&server).complete("q").await.unwrap_err();
    assert!(matches!(err, LlmError::QuotaExceeded { .. }), "{err:?}");
}

#[tokio::test]
async fn server_errors_and_malformed_bodies_are_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let c = client(&server);
    match c.complete("q").await.unwrap_err() {
        LlmError::Unavailable { message } => assert!(message.contains("HTTP 500")),
        other => panic!("unexpected error: {other:?}"),
    }
    match c.complete("q").await.unwrap_err() {
        LlmError::Unavailable { message } => assert!(message.contains("missing content")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_endpoint_is_tagged_as_provider_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!({ "choices": [{ "message": { "content": "SELECT 1" } }] })),
        )
        .mount(&server)
        .await;

    let inference = InferenceClient::new().with_backend(
        Provider::Secondary,
        Arc::new(client(&server)),
        Duration::from_millis(200),
    );
    let err = inference.complete("q", Provider::Secondary).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderTimeout);
    assert_eq!(err.provider(), Some(Provider::Secondary));
}

#[tokio::test]
async fn embeddings_request_dimensions_and_parse_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "model": "embed-test", "dimensions": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.25, -0.5, 1.0] }]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAIEmbedder::new("embed-test".into(), "sk-test".into())
        .with_base_url(format!("{}/v1", server.uri()))
        .with_dimensions(3);
    let vec = embedder.embed("how many orders").await.unwrap();
    assert_eq!(vec, vec![0.25, -0.5, 1.0]);
    assert_eq!(embedder.model_id(), "embed-test");
}

#[tokio::test]
async fn embeddings_error_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let embedder = OpenAIEmbedder::new("embed-test".into(), "sk-test".into())
        .with_base_url(format!("{}/v1", server.uri()));
    let err = embedder.embed("q").await.unwrap_err();
    assert!(err.to_string().contains("503"));
}
