//! Integration tests for courier-webhooks

use courier_config::RuntimeEnvironment;
use courier_webhooks::*;
use http::{HeaderMap, HeaderValue, Method};
use std::time::Duration;
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher() -> HttpDispatcher {
    HttpDispatcher::new(DispatchConfig::default()).unwrap()
}

#[tokio::test]
async fn test_signed_dispatch_delivers_headers_and_body() {
    let server = MockServer::start().await;
    let signer = Signer::new("integration-secret").unwrap();
    let body = r#"{"to":"user@example.com"}"#;

    Mock::given(method("POST"))
        .and(path("/api/send-email"))
        .and(header("content-type", "application/json"))
        .and(header("upstash-signature", signer.sign(body.as_bytes()).as_str()))
        .and(header("upstash-message-id", "msg-42"))
        .and(body_string(body))
        .respond_with(ResponseTemplate::new(200).set_body_string("sent"))
        .expect(1)
        .mount(&server)
        .await;

    let request = DispatchRequest::new(Method::POST, format!("{}/api/send-email", server.uri()))
        .header("Content-Type", "application/json")
        .body(body)
        .signed(&signer, "msg-42");

    let response = dispatcher().dispatch(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "sent");
}

#[tokio::test]
async fn test_non_success_status_is_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let request = DispatchRequest::new(Method::POST, server.uri()).body("{}");
    let err = dispatcher().dispatch(request).await.unwrap_err();

    assert_eq!(
        err,
        DispatchError::Status {
            status: 503,
            body: "down".to_string()
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_error_is_still_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let request = DispatchRequest::new(Method::PUT, server.uri());
    let err = dispatcher().dispatch(request).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let request = DispatchRequest::new(Method::POST, server.uri())
        .body("{}")
        .timeout(Duration::from_millis(50));
    let err = dispatcher().dispatch(request).await.unwrap_err();

    assert_eq!(err, DispatchError::Timeout(Duration::from_millis(50)));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Bind then drop a server to get a port with nothing listening.
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let request = DispatchRequest::new(Method::POST, uri).body("{}");
    let err = dispatcher().dispatch(request).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)));
}

#[tokio::test]
async fn test_get_without_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = DispatchRequest::new(Method::GET, format!("{}/health", server.uri()));
    let response = dispatcher().dispatch(request).await.unwrap();
    assert_eq!(response.status, 204);
}

#[tokio::test]
async fn test_dispatched_request_passes_inbound_verification() {
    let signer = Signer::new("shared-secret").unwrap();
    let body = br#"{"messageId":"m-1","outcome":"succeeded"}"#.to_vec();

    let request = DispatchRequest::new(Method::POST, "https://app.example.com/api/callback")
        .body(body.clone())
        .signed(&signer, "m-1");

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        headers.insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    let verifier = InboundVerifier::new(signer, RuntimeEnvironment::Production);
    let outcome = verifier
        .verify("https://app.example.com/api/callback", &headers, &body)
        .unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Verified {
            message_id: Some("m-1".to_string())
        }
    );

    let mut tampered = body.clone();
    tampered.push(b'\n');
    let rejection = verifier
        .verify("https://app.example.com/api/callback", &headers, &tampered)
        .unwrap_err();
    assert_eq!(rejection.status, http::StatusCode::UNAUTHORIZED);
}
