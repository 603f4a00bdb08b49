//! HTTP provider tests against a local mock server

use restab_engine::config::OpenAIConfig;
use restab_engine::evaluation::consistency::{EmbeddingSimilarity, SimilarityScorer};
use restab_engine::llm::embedding::{Embedder, OllamaEmbedder};
use restab_engine::llm::ollama::OllamaProvider;
use restab_engine::llm::openai::OpenAIProvider;
use restab_engine::llm::{GenerationRequest, LLMError, LLMProvider};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_config(base_url: &str) -> OpenAIConfig {
    OpenAIConfig {
        base_url: base_url.to_string(),
        model: "gpt-4o-mini".to_string(),
        api_key_env: "RESTAB_TEST_UNUSED_KEY".to_string(),
    }
}

#[tokio::test]
async fn test_ollama_chat_request_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "options": { "temperature": 0.7, "num_predict": 512 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.1:8b",
            "message": { "role": "assistant", "content": "<plan>agency</plan>\nHello." },
            "prompt_eval_count": 120,
            "eval_count": 30
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b").unwrap();
    let request = GenerationRequest::new("system prompt", "Conversation history:")
        .with_temperature(0.7)
        .with_max_tokens(512);

    let completion = provider.generate(&request).await.unwrap();

    assert_eq!(completion.text, "<plan>agency</plan>\nHello.");
    assert_eq!(completion.usage.prompt_tokens, 120);
    assert_eq!(completion.usage.completion_tokens, 30);
    assert_eq!(completion.usage.total_tokens, 150);
}

#[tokio::test]
async fn test_ollama_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b").unwrap();
    let err = provider
        .generate(&GenerationRequest::new("", "hi"))
        .await
        .unwrap_err();

    match err {
        LLMError::ProviderUnavailable(msg) => assert!(msg.contains("model not loaded")),
        other => panic!("expected ProviderUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ollama_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let up = OllamaProvider::new(server.uri(), "llama3.1:8b").unwrap();
    let down = OllamaProvider::new("http://127.0.0.1:9", "llama3.1:8b").unwrap();
    assert!(up.check_health().await);
    assert!(!down.check_health().await);
}

#[tokio::test]
async fn test_openai_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini", "max_tokens": 64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "agency: clear | score: 2" } }],
            "usage": { "prompt_tokens": 50, "completion_tokens": 8 }
        })))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(openai_config(&server.uri()), Some("sk-test".to_string()));
    let completion = provider
        .generate(&GenerationRequest::new("judge", "rate this").with_max_tokens(64))
        .await
        .unwrap();

    assert_eq!(completion.text, "agency: clear | score: 2");
    assert_eq!(completion.usage.prompt_tokens, 50);
    assert_eq!(completion.usage.completion_tokens, 8);
}

#[tokio::test]
async fn test_openai_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(openai_config(&server.uri()), Some("sk-test".to_string()));
    let err = provider
        .generate(&GenerationRequest::new("", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::RateLimitExceeded));
}

#[tokio::test]
async fn test_openai_without_key_never_calls_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(openai_config(&server.uri()), Some("  ".to_string()));
    let err = provider
        .generate(&GenerationRequest::new("", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn test_ollama_embeddings_feed_cosine_similarity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "nomic-embed-text:v1.5" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0], [0.0, 1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OllamaEmbedder::new(server.uri(), "nomic-embed-text:v1.5", Duration::from_secs(5))
            .unwrap();
    let scorer = EmbeddingSimilarity::new(embedder);
    assert_eq!(scorer.id(), "nomic-embed-text:v1.5");

    scorer.prepare(&["door", "window"]).await.unwrap();
    // Served from the cache; the mock expects exactly one request
    let score = scorer.similarity("door", "window").await.unwrap();
    assert!(score.abs() < 1e-9);
    let same = scorer.similarity("door", "door").await.unwrap();
    assert!((same - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_embedding_count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0]] })))
        .mount(&server)
        .await;

    let embedder =
        OllamaEmbedder::new(server.uri(), "nomic-embed-text:v1.5", Duration::from_secs(5))
            .unwrap();
    let err = embedder
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::ParseError(_)));
}
