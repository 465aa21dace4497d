#![allow(clippy::unwrap_used)]
// Integration tests for `RestClient` and `TokenManager` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use simbridge_api::rest::models::{OrderSide, OrderStatus, OrderTicket, SimulatorOptions};
use simbridge_api::{Error, RestClient, TokenManager};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RestClient, TokenManager) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let http = reqwest::Client::new();
    let tokens = TokenManager::new(base_url.clone(), http.clone());
    let client = RestClient::new(base_url, http, tokens.clone());
    (server, client, tokens)
}

fn session_body(token: &str) -> serde_json::Value {
    json!({
        "accessToken": token,
        "refreshToken": "refresh-1",
        "sessionId": "sess-1",
        "expiresInSecs": 3600
    })
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body(token)))
        .mount(server)
        .await;
}

async fn login(server: &MockServer, tokens: &TokenManager) {
    mount_login(server, "token-abc").await;
    let secret: secrecy::SecretString = "hunter2".to_string().into();
    tokens.login("trader", &secret).await.unwrap();
}

// ── Session tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_login_success() {
    let (server, _client, tokens) = setup().await;

    mount_login(&server, "token-abc").await;

    let secret: secrecy::SecretString = "hunter2".to_string().into();
    tokens.login("trader", &secret).await.unwrap();

    assert!(tokens.is_authenticated());
    assert_eq!(tokens.session_id().as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn test_login_failure() {
    let (server, _client, tokens) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/session"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(&server)
        .await;

    let secret: secrecy::SecretString = "wrong".to_string().into();
    let result = tokens.login("trader", &secret).await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert!(!tokens.is_authenticated());
}

#[tokio::test]
async fn test_refresh_rotates_token() {
    let (server, _client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/session/refresh"))
        .and(header("Authorization", "Bearer refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("token-def")))
        .mount(&server)
        .await;

    tokens.refresh().await.unwrap();
    assert!(tokens.is_authenticated());
}

#[tokio::test]
async fn test_refresh_rejection_clears_session() {
    let (server, _client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/session/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = tokens.refresh().await;

    assert!(matches!(result, Err(Error::SessionExpired)));
    assert!(!tokens.is_authenticated(), "401 refresh must clear the session");
}

// ── Order tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_submit_order() {
    let (server, client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .and(header("Authorization", "Bearer token-abc"))
        .and(body_partial_json(json!({ "symbol": "ACME", "side": "buy" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orderId": "ord-1",
            "status": "accepted",
            "submittedAt": "2026-03-05T09:30:00Z"
        })))
        .mount(&server)
        .await;

    let ticket = OrderTicket::market("ACME", OrderSide::Buy, 100.0);
    let ack = client.submit_order(&ticket).await.unwrap();

    assert_eq!(ack.order_id, "ord-1");
    assert_eq!(ack.status, OrderStatus::Accepted);
}

#[tokio::test]
async fn test_cancel_order() {
    let (server, client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/orders/ord-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orderId": "ord-1",
            "status": "cancelled",
            "submittedAt": "2026-03-05T09:31:00Z"
        })))
        .mount(&server)
        .await;

    let ack = client.cancel_order("ord-1").await.unwrap();
    assert_eq!(ack.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_order_without_session_fails_fast() {
    let (_server, client, _tokens) = setup().await;

    let ticket = OrderTicket::market("ACME", OrderSide::Sell, 10.0);
    let result = client.submit_order(&ticket).await;

    assert!(
        matches!(result, Err(Error::NotAuthenticated)),
        "expected NotAuthenticated, got: {result:?}"
    );
}

// ── Simulator tests ─────────────────────────────────────────────────

#[tokio::test]
async fn test_start_and_stop_simulator() {
    let (server, client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/simulator/start"))
        .and(body_partial_json(json!({ "scenario": "volatile-open" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "runId": "run-7",
            "running": true,
            "startedAt": "2026-03-05T09:00:00Z"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/simulator/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "runId": "run-7",
            "running": false
        })))
        .mount(&server)
        .await;

    let opts = SimulatorOptions {
        scenario: Some("volatile-open".into()),
        ..SimulatorOptions::default()
    };
    let run = client.start_simulator(&opts).await.unwrap();
    assert!(run.running);

    let run = client.stop_simulator().await.unwrap();
    assert!(!run.running);
    assert_eq!(run.run_id, "run-7");
}

// ── Error mapping tests ─────────────────────────────────────────────

#[tokio::test]
async fn test_401_maps_to_session_expired() {
    let (server, client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let ticket = OrderTicket::market("ACME", OrderSide::Buy, 1.0);
    let result = client.submit_order(&ticket).await;

    assert!(matches!(result, Err(Error::SessionExpired)));
}

#[tokio::test]
async fn test_structured_api_error() {
    let (server, client, tokens) = setup().await;
    login(&server, &tokens).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "unknown symbol FAKE",
            "code": "BAD_SYMBOL"
        })))
        .mount(&server)
        .await;

    let ticket = OrderTicket::market("FAKE", OrderSide::Buy, 1.0);
    let result = client.submit_order(&ticket).await;

    match result {
        Err(Error::Api {
            ref message,
            ref code,
            status,
        }) => {
            assert_eq!(status, 422);
            assert_eq!(code.as_deref(), Some("BAD_SYMBOL"));
            assert!(message.contains("FAKE"), "got: {message}");
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}
