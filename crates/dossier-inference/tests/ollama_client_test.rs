//! HTTP-level behaviour of the Ollama client against a mock server.

use std::time::Duration;

use dossier_core::{Error, GenerationBackend};
use dossier_inference::{BreakerState, OllamaClient, OllamaConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> OllamaConfig {
    OllamaConfig::default()
        .with_base_url(server.uri())
        .with_timeout(Duration::from_secs(2))
        .with_backoff(Duration::from_millis(10))
        .with_retries(2)
        .with_circuit(5, Duration::from_secs(60))
}

fn generated(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3",
        "response": text,
        "done": true,
        "eval_count": 7
    }))
}

#[tokio::test]
async fn test_generate_sends_non_streaming_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "llama3", "stream": false})))
        .respond_with(generated("{\"summary\":\"ok\"}"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(config(&server)).unwrap();
    let generation = client.generate("llama3", "hello").await.unwrap();

    assert_eq!(generation.text, "{\"summary\":\"ok\"}");
    assert_eq!(generation.meta.eval_count, Some(7));
    assert_eq!(client.breaker_state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_generate_retries_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(generated("second time lucky"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(config(&server)).unwrap();
    let generation = client.generate("llama3", "hello").await.unwrap();

    assert_eq!(generation.text, "second time lucky");
    assert_eq!(client.breaker_state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_retries_exhausted_carries_last_cause() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .expect(3)
        .mount(&server)
        .await;

    let client = OllamaClient::new(config(&server)).unwrap();
    let err = client.generate("llama3", "hello").await.unwrap_err();

    match err {
        Error::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.to_string().contains("out of memory"), "{source}");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_circuit_opens_and_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = OllamaClient::new(
        config(&server)
            .with_retries(5)
            .with_circuit(2, Duration::from_secs(60)),
    )
    .unwrap();

    let err = client.generate("llama3", "hello").await.unwrap_err();
    assert!(err.is_circuit_open(), "{err:?}");
    assert_eq!(client.breaker_state(), BreakerState::Open);

    // No request reaches the server while open.
    let err = client.generate("llama3", "again").await.unwrap_err();
    assert!(err.is_circuit_open());
}

#[tokio::test]
async fn test_per_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(generated("late").set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = OllamaClient::new(
        config(&server)
            .with_timeout(Duration::from_millis(50))
            .with_retries(0),
    )
    .unwrap();

    match client.generate("llama3", "hello").await.unwrap_err() {
        Error::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 1);
            assert!(matches!(*source, Error::Timeout(_)), "{source:?}");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_and_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3", "size": 4661224676u64, "modified_at": "2024-05-01T10:00:00Z"},
                {"name": "nomic-embed-text"}
            ]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(config(&server)).unwrap();
    client.health().await.unwrap();

    let models = client.list_models().await.unwrap();
    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["llama3", "nomic-embed-text"]);
}

#[tokio::test]
async fn test_health_fails_without_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(config(&server)).unwrap();
    let err = client.health().await.unwrap_err();
    assert!(err.to_string().contains("no models"), "{err}");
}

#[tokio::test]
async fn test_health_fails_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = OllamaClient::new(config(&server)).unwrap();
    assert!(client.health().await.is_err());
}
