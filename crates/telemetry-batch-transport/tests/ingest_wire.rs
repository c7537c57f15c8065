//! HTTP wire contract of the ingest client against a mock server.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_batch_transport::{
    BatchTransport, DeliveryError, IngestClient, Provider, QueueCallbacks, TelemetryEvent,
    TokenUsage, TransportCallbacks, TransportConfig,
};
use telemetry_retry_queue::EventQueueConfig;
use tempfile::tempdir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn events() -> Vec<TelemetryEvent> {
    vec![
        TelemetryEvent::success(
            Provider::OpenAi,
            "gpt-4",
            TokenUsage::new(100, 50),
            0.0045,
            Duration::from_millis(500),
        ),
        TelemetryEvent::failure(
            Provider::Anthropic,
            "claude-3-opus",
            Duration::from_millis(1200),
            "rate limited",
        ),
    ]
}

fn config(server: &MockServer) -> TransportConfig {
    TransportConfig {
        endpoint: server.uri(),
        enable_dlq: false,
        ..TransportConfig::new("ak_test_key")
    }
}

#[tokio::test]
async fn posts_json_array_with_api_key() {
    let server = MockServer::start().await;
    let batch = events();

    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .and(header("X-API-Key", "ak_test_key"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(serde_json::to_value(&batch).unwrap()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"accepted": 2, "message": "ok"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = IngestClient::new(&config(&server)).unwrap();
    let response = client.send_batch(&batch).await.unwrap().unwrap();
    assert_eq!(response.accepted, 2);
    assert_eq!(response.message, "ok");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let array = body.as_array().unwrap();
    assert_eq!(array.len(), 2);
    assert_eq!(array[0]["provider"], "openai");
    assert_eq!(array[0]["tokens"]["totalTokens"], 150);
    assert_eq!(array[1]["status"], "error");
    assert_eq!(array[1]["error"], "rate limited");
    assert!(array[0].get("error").is_none());
}

#[tokio::test]
async fn empty_success_body_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let client = IngestClient::new(&config(&server)).unwrap();
    assert_eq!(client.send_batch(&events()).await, Ok(None));
}

#[tokio::test]
async fn non_success_status_is_rejected_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = IngestClient::new(&config(&server)).unwrap();
    let err = client.send_batch(&events()).await.unwrap_err();
    assert_eq!(
        err,
        DeliveryError::Rejected {
            status: 503,
            body: "overloaded".to_string()
        }
    );
    assert_eq!(err.to_string(), "Ingestion API error: 503 - overloaded");
}

#[tokio::test]
async fn unreachable_endpoint_is_network_error() {
    let server = MockServer::start().await;
    let config = config(&server);
    drop(server);

    let client = IngestClient::new(&config).unwrap();
    let err = client.send_batch(&events()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Network(_)));
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = TransportConfig {
        request_timeout: Duration::from_millis(100),
        ..config(&server)
    };
    let client = IngestClient::new(&config).unwrap();
    let err = client.send_batch(&events()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Network(_)));
}

#[tokio::test]
async fn rejected_batch_is_retried_from_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let processed = Arc::new(AtomicUsize::new(0));
    let callbacks = TransportCallbacks::new().with_queue_callbacks(
        QueueCallbacks::new().on_event_processed({
            let processed = processed.clone();
            move |_| {
                processed.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );
    let config = TransportConfig {
        enable_dlq: true,
        queue: EventQueueConfig {
            retry_base_delay_ms: 0,
            ..EventQueueConfig::with_storage_dir(dir.path())
        },
        ..config(&server)
    };
    let transport = BatchTransport::new(config, callbacks).unwrap();

    transport.start().unwrap();
    for event in events() {
        transport.send(event);
    }
    transport.flush().await;

    let queued = transport.queue().unwrap().entries().unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(
        queued[0].last_error.as_deref(),
        Some("Ingestion API error: 500 - boom")
    );

    transport.process_queue().await;
    assert!(transport.queue().unwrap().entries().unwrap().is_empty());
    assert_eq!(processed.load(Ordering::SeqCst), 2);
    assert_eq!(transport.get_queue_stats().unwrap().processed_count, 2);

    transport.stop().await;
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
