//! End-to-end tests: publish, dispatch over HTTP, verify on arrival.

use courier::prelude::*;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn config(server: &MockServer) -> CourierConfig {
    let mut config = CourierConfig {
        signing_key: Some("integration-secret".to_string()),
        base_url: Some(server.uri()),
        enforce_verification: true,
        ..Default::default()
    };
    config.worker.max_attempts = 2;
    config.worker.initial_backoff_ms = 10;
    config.worker.max_backoff_ms = 10;
    config.worker.min_interval_ms = 0;
    config
}

async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .collect()
}

#[tokio::test]
async fn test_published_job_is_delivered_signed_and_verifiable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/send-email"))
        .and(header_exists("upstash-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_string("sent"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/email-sent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let courier = Courier::in_memory(config(&server)).unwrap();
    let receipt = courier
        .publisher()
        .publish_json(
            PublishRequest::new("/api/send-email", json!({"to": "user@example.com"}))
                .callback("/api/email-sent"),
        )
        .await
        .unwrap();

    let worker = courier.http_worker().unwrap();
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some(JobOutcome::Succeeded)
    );

    let verifier = courier.inbound_verifier();

    let delivered = requests_to(&server, "/api/send-email").await;
    assert_eq!(delivered.len(), 1);
    let body: serde_json::Value = verifier
        .receive(delivered[0].url.as_str(), &delivered[0].headers, &delivered[0].body)
        .unwrap();
    assert_eq!(body, json!({"to": "user@example.com"}));
    assert_eq!(
        delivered[0].headers.get("upstash-message-id").unwrap(),
        receipt.message_id.to_string().as_str()
    );

    let callbacks = requests_to(&server, "/api/email-sent").await;
    assert_eq!(callbacks.len(), 1);
    let payload: CallbackPayload = verifier
        .receive(callbacks[0].url.as_str(), &callbacks[0].headers, &callbacks[0].body)
        .unwrap();
    assert_eq!(payload.message_id, receipt.message_id);
    assert_eq!(payload.outcome, CallbackOutcome::Succeeded);
    assert_eq!(payload.status, Some(200));
    assert_eq!(payload.attempts, 1);

    assert_eq!(courier.store().len("jobs").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_endpoint_exhausts_retries_and_reports_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/flaky"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/flaky-failed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let courier = Courier::in_memory(config(&server)).unwrap();
    let receipt = courier
        .publisher()
        .publish_json(
            PublishRequest::new("/api/flaky", json!({"n": 1})).failure_callback("/api/flaky-failed"),
        )
        .await
        .unwrap();

    let worker = courier.http_worker().unwrap();
    assert_eq!(worker.run_once().await.unwrap(), Some(JobOutcome::Retrying));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some(JobOutcome::DeadLettered)
    );

    let attempts = requests_to(&server, "/api/flaky").await;
    let retried: Vec<_> = attempts
        .iter()
        .map(|r| r.headers.get("upstash-retried").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(retried, ["0", "1"]);

    let failures = requests_to(&server, "/api/flaky-failed").await;
    let payload: CallbackPayload = serde_json::from_slice(&failures[0].body).unwrap();
    assert_eq!(payload.outcome, CallbackOutcome::Failed);
    assert_eq!(payload.status, Some(503));
    assert_eq!(payload.attempts, 2);

    let dead = courier.store().dead_letters("jobs", 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.message_id, receipt.message_id);
}

#[tokio::test]
async fn test_tampered_inbound_request_is_rejected() {
    let server = MockServer::start().await;
    let courier = Courier::in_memory(config(&server)).unwrap();
    let verifier = courier.inbound_verifier();

    let body = br#"{"to":"user@example.com"}"#;
    let mut headers = http::HeaderMap::new();
    headers.insert(
        "upstash-signature",
        courier.signer().sign(body).parse().unwrap(),
    );

    assert!(verifier.verify("/api/send-email", &headers, body).is_ok());
    assert!(
        verifier
            .verify("/api/send-email", &headers, br#"{"to":"attacker@example.com"}"#)
            .is_err()
    );
    assert!(
        verifier
            .verify("/api/send-email", &http::HeaderMap::new(), body)
            .is_err()
    );
}

#[tokio::test]
async fn test_started_worker_drains_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/batch"))
        .respond_with(ResponseTemplate::new(202))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.worker.poll_interval_ms = 10;
    config.worker.max_concurrent = 2;
    let courier = Courier::in_memory(config).unwrap();

    for n in 0..3 {
        courier
            .publisher()
            .send(SendRequest::new("/api/batch", json!({"n": n})))
            .await
            .unwrap();
    }

    let worker = courier.http_worker().unwrap();
    worker.start().await.unwrap();

    for _ in 0..100 {
        if requests_to(&server, "/api/batch").await.len() == 3
            && courier.store().in_flight("jobs").await.unwrap() == 0
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    worker.shutdown().await.unwrap();
    assert_eq!(courier.store().len("jobs").await.unwrap(), 0);
    assert_eq!(courier.store().in_flight("jobs").await.unwrap(), 0);
    assert_eq!(requests_to(&server, "/api/batch").await.len(), 3);
}

#[test]
fn test_log_settings_defaults() {
    let settings = LogSettings::default();
    assert_eq!(settings.level, "info");
    assert_eq!(settings.format, LogFormat::Json);
}
