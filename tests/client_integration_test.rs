//! Integration tests for the resilient client over real HTTP
//!
//! A wiremock server plays the dependency so the reqwest transport, the
//! built-in interceptors, the retry loop and the breaker are exercised
//! together.

use std::io::Write;
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;
use tripwire::config::TripwireConfig;
use tripwire::resilience::CircuitState;
use tripwire::transport::TransportErrorKind;
use tripwire::{ClientError, RequestConfig, ResilientClient};
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(toml: &str) -> TripwireConfig {
    TripwireConfig::from_toml_str(toml).unwrap()
}

fn fast() -> TripwireConfig {
    config(
        r#"
[logging]
level = "debug"

[retry]
retries = 3
delay_ms = 5

[breaker]
failure_threshold = 2
reset_timeout_ms = 200

[client]
log_traffic = false
"#,
    )
}

#[tokio::test]
async fn test_request_carries_builtin_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer t0ken"))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-request-id"))
        .and(header_exists("x-request-timestamp"))
        .and(body_json(json!({"sku": "A1", "qty": 2})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = fast();
    cfg.client.auth_token = Some("t0ken".to_string());
    let client = ResilientClient::from_config(&cfg).unwrap();

    let response = client
        .call(
            "orders",
            RequestConfig::post(
                format!("{}/orders", server.uri()),
                json!({"sku": "A1", "qty": 2}),
            ),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["id"], 42);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let client = ResilientClient::from_config(&fast()).unwrap();
    let response = client
        .get("inventory", &format!("{}/items", server.uri()))
        .await
        .unwrap();

    assert_eq!(response.body, "[]");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let stats = client.breaker("inventory").stats();
    assert_eq!(stats.total_successes, 1);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_persistent_failure_opens_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = ResilientClient::from_config(&fast()).unwrap();
    let url = format!("{}/search", server.uri());

    for _ in 0..2 {
        match client.get("search", &url).await {
            Err(ClientError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.status, Some(500));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
    }
    assert_eq!(client.breaker("search").state(), CircuitState::Open);
    assert_eq!(server.received_requests().await.unwrap().len(), 6);

    let err = client.get("search", &url).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(server.received_requests().await.unwrap().len(), 6);

    let health = client.health();
    assert!(!health.healthy);
    assert_eq!(health.breakers[0].name, "search");
}

#[tokio::test]
async fn test_breaker_recovers_after_reset_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(6)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = ResilientClient::from_config(&fast()).unwrap();
    let url = format!("{}/status", server.uri());

    for _ in 0..2 {
        assert!(client.get("status", &url).await.is_err());
    }
    assert_eq!(client.breaker("status").state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.breaker("status").state(), CircuitState::HalfOpen);

    client.get("status", &url).await.unwrap();
    client.get("status", &url).await.unwrap();
    assert_eq!(client.breaker("status").state(), CircuitState::Closed);
    assert!(client.health().healthy);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::from_config(&fast()).unwrap();
    let err = client
        .get("catalog", &format!("{}/missing", server.uri()))
        .await
        .unwrap_err();

    match err {
        ClientError::Transport(source) => {
            assert_eq!(source.status, Some(404));
            assert_eq!(source.kind, TransportErrorKind::Status);
        }
        other => panic!("expected a transport error, got {:?}", other),
    }
    let stats = client.breaker("catalog").stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_rate_limit_exposes_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "4"))
        .mount(&server)
        .await;

    let client = ResilientClient::from_config(&fast()).unwrap();
    let err = client
        .get("billing", &format!("{}/charge", server.uri()))
        .await
        .unwrap_err();

    assert_eq!(err.transport().and_then(|t| t.status), Some(429));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(4)));
}

#[tokio::test]
async fn test_unreachable_dependency() {
    let server = MockServer::start().await;
    let url = format!("{}/gone", server.uri());
    drop(server);

    let client = ResilientClient::from_config(&fast()).unwrap();
    let err = client.get("gone", &url).await.unwrap_err();

    assert_eq!(err.transport().map(|t| t.kind), Some(TransportErrorKind::Connect));
    assert_eq!(client.breaker("gone").stats().failures, 1);
}

#[tokio::test]
async fn test_config_file_drives_client() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[retry]
retries = 1

[breakers.payments]
failure_threshold = 1
reset_timeout_ms = 60000

[client]
log_traffic = false
"#
    )
    .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = TripwireConfig::from_file(file.path()).unwrap();
    let client = ResilientClient::from_config(&cfg).unwrap();
    let url = format!("{}/pay", server.uri());

    let first = client.get("payments", &url).await.unwrap_err();
    assert!(matches!(first, ClientError::Transport(_)));

    let second = client.get("payments", &url).await.unwrap_err();
    assert!(second.is_circuit_open());
}
