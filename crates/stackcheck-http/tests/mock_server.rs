//! Mock server tests for the authenticated HTTP client.
//!
//! These tests use wiremock to simulate both the identity provider and the
//! API behind it, so the login, refresh and retry behaviour can be checked
//! without a real cluster.

use std::time::Duration;

use serde_json::json;
use stackcheck_core::{BaseUrl, Credentials, Error};
use stackcheck_http::{CancellationToken, HttpClient, Request};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/auth/realms/iam/protocol/openid-connect/token";
const EXPIRED_PAGE: &str = "<html><title>Log in to IAM realm</title></html>";

fn base_url(server: &MockServer) -> BaseUrl {
    BaseUrl::new(format!("{}/", server.uri())).unwrap()
}

fn identity_url(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

fn token_body(n: u32) -> serde_json::Value {
    json!({
        "access_token": format!("access-{}", n),
        "refresh_token": format!("refresh-{}", n),
        "expires_in": 300,
        "token_type": "Bearer"
    })
}

/// Mount a password grant returning `access-1`, expected exactly once.
async fn mount_login(idp: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=operator"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(1)))
        .expect(1)
        .mount(idp)
        .await;
}

/// Mount refresh grants handing out `access-2`, `access-3`, ... and expect
/// exactly `count` of them.
async fn mount_refreshes(idp: &MockServer, count: u64) {
    for n in 1..=count {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains(format!("refresh_token=refresh-{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(n as u32 + 1)))
            .expect(1)
            .mount(idp)
            .await;
    }
    if count == 0 {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(99)))
            .expect(0)
            .mount(idp)
            .await;
    }
}

async fn authenticated_client(api: &MockServer, idp: &MockServer) -> HttpClient {
    HttpClient::builder(base_url(api))
        .keycloak(Credentials::new("operator", "secret"), identity_url(idp))
        .build()
        .await
        .unwrap()
}

/// API responds with the expired-session page when sent `access-{n}`.
async fn mount_expired_for(api: &MockServer, n: u32) {
    Mock::given(method("GET"))
        .and(path("/api/org"))
        .and(header("cookie", format!("kc-access=access-{}", n).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXPIRED_PAGE))
        .expect(1)
        .mount(api)
        .await;
}

async fn mount_ok_for(api: &MockServer, n: u32) {
    Mock::given(method("GET"))
        .and(path("/api/org"))
        .and(header("cookie", format!("kc-access=access-{}", n).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "Main Org."})))
        .expect(1)
        .mount(api)
        .await;
}

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn test_login_attaches_session_cookie() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 0).await;
    mount_ok_for(&api, 1).await;

    let client = authenticated_client(&api, &idp).await;
    assert!(client.is_authenticated());
    assert_eq!(client.access_token().await.unwrap().as_str(), "access-1");

    let response = client.get("/api/org", &[]).await.unwrap();
    assert_eq!(response.status(), 200);
    let org: serde_json::Value = response.json().unwrap();
    assert_eq!(org["name"], "Main Org.");
}

#[tokio::test]
async fn test_login_failure_is_authentication_error() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid user credentials"
        })))
        .mount(&idp)
        .await;

    let result = HttpClient::builder(base_url(&api))
        .keycloak(Credentials::new("operator", "wrong"), identity_url(&idp))
        .build()
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("Invalid user credentials"));
}

#[tokio::test]
async fn test_login_unreachable_provider_is_authentication_error() {
    let api = MockServer::start().await;
    // Nothing listens on port 9 of localhost.
    let result = HttpClient::builder(base_url(&api))
        .keycloak(
            Credentials::new("operator", "secret"),
            Url::parse("http://127.0.0.1:9").unwrap(),
        )
        .build()
        .await;

    assert!(matches!(result, Err(Error::Auth(_))));
}

// ============================================================================
// Retry policy
// ============================================================================

#[tokio::test]
async fn test_first_attempt_success_never_refreshes() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 0).await;
    mount_ok_for(&api, 1).await;

    let client = authenticated_client(&api, &idp).await;
    client.get("/api/org", &[]).await.unwrap();
}

#[tokio::test]
async fn test_marker_then_success_refreshes_once() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 1).await;
    mount_expired_for(&api, 1).await;
    mount_ok_for(&api, 2).await;

    let client = authenticated_client(&api, &idp).await;
    let response = client.get("/api/org", &[]).await.unwrap();

    assert_eq!(response.json::<serde_json::Value>().unwrap()["id"], 1);
    assert_eq!(client.access_token().await.unwrap().as_str(), "access-2");
}

#[tokio::test]
async fn test_third_attempt_success_refreshes_twice() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 2).await;
    mount_expired_for(&api, 1).await;
    mount_expired_for(&api, 2).await;
    mount_ok_for(&api, 3).await;

    let client = authenticated_client(&api, &idp).await;
    let response = client.get("/api/org", &[]).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(client.access_token().await.unwrap().as_str(), "access-3");
}

#[tokio::test]
async fn test_marker_on_every_attempt_exhausts_retries() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 2).await;
    mount_expired_for(&api, 1).await;
    mount_expired_for(&api, 2).await;
    mount_expired_for(&api, 3).await;

    let client = authenticated_client(&api, &idp).await;
    let err = client.get("/api/org", &[]).await.unwrap_err();

    assert!(matches!(err, Error::ExhaustedRetries { attempts: 3 }));
}

#[tokio::test]
async fn test_unauthorized_status_triggers_refresh() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/org"))
        .and(header("cookie", "kc-access=access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&api)
        .await;
    mount_ok_for(&api, 2).await;

    let client = authenticated_client(&api, &idp).await;
    let response = client.get("/api/org", &[]).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_server_error_fails_without_refresh() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;
    mount_refreshes(&idp, 0).await;

    Mock::given(method("GET"))
        .and(path("/api/org"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database is locked"))
        .expect(1)
        .mount(&api)
        .await;

    let client = authenticated_client(&api, &idp).await;
    let err = client.get("/api/org", &[]).await.unwrap_err();

    match err {
        Error::Http(http) => {
            assert_eq!(http.status, 500);
            assert_eq!(http.body, "database is locked");
        }
        other => panic!("expected HttpError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refresh_failure_is_authentication_error() {
    let idp = MockServer::start().await;
    let api = MockServer::start().await;
    mount_login(&idp).await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token is not active"
        })))
        .expect(1)
        .mount(&idp)
        .await;
    mount_expired_for(&api, 1).await;

    let client = authenticated_client(&api, &idp).await;
    let err = client.get("/api/org", &[]).await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("Token is not active"));
}

// ============================================================================
// Unauthenticated mode
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_client_sends_no_session_cookie() {
    let api = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", "up"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api)).build().await.unwrap();
    client.get("api/v1/query", &[("query", "up")]).await.unwrap();

    let requests = api.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("cookie"));
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn test_unauthenticated_unauthorized_is_http_error() {
    let api = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/org"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api)).build().await.unwrap();
    let err = client.get("/api/org", &[]).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_unauthenticated_marker_is_returned_as_is() {
    let api = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXPIRED_PAGE))
        .expect(1)
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api)).build().await.unwrap();
    let response = client.get("/login", &[]).await.unwrap();
    assert!(response.text().contains("IAM realm"));
}

// ============================================================================
// Request shape
// ============================================================================

#[tokio::test]
async fn test_static_headers_and_body_are_sent() {
    let api = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/console/proxy"))
        .and(query_param("path", "_search"))
        .and(query_param("method", "POST"))
        .and(header("kbn-version", "7.1.0"))
        .and(body_string_contains("uniq_logger"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": {"hits": []}})))
        .expect(1)
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api))
        .header("kbn-version", "7.1.0")
        .build()
        .await
        .unwrap();

    client
        .post(
            "/api/console/proxy?path=_search&method=POST",
            Some(r#"{"aggs": {"uniq_logger": {}}}"#.to_string()),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_put_and_delete_map_to_http_verbs() {
    let api = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/thing"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&api)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/series"))
        .and(query_param("match[]", "up"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api)).build().await.unwrap();
    assert_eq!(client.put("/api/thing", None).await.unwrap().status(), 204);
    assert_eq!(
        client
            .delete("/api/v1/series", &[("match[]", "up")])
            .await
            .unwrap()
            .status(),
        204
    );
}

#[tokio::test]
async fn test_bearer_token_header() {
    let api = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/nodes"))
        .and(header("authorization", "Bearer cluster-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api))
        .bearer_token("cluster-token")
        .build()
        .await
        .unwrap();
    client.get("/api/v1/nodes", &[]).await.unwrap();
}

// ============================================================================
// Timeouts and cancellation
// ============================================================================

#[tokio::test]
async fn test_request_timeout() {
    let api = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api)).build().await.unwrap();
    let err = client
        .send(Request::get("/slow").timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("timed out after 100ms"), "{err}");
}

#[tokio::test]
async fn test_cancelled_request() {
    let api = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&api)
        .await;

    let client = HttpClient::builder(base_url(&api)).build().await.unwrap();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = client
        .send(Request::get("/slow").cancel_on(token))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("cancelled"), "{err}");
}
