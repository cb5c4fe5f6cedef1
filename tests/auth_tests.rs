//! Integration tests for the authentication strategy against a mock issuer.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use frappe_gateway::{
    AuthGate, AuthStrategy, Error, OAuth2Config, OAuth2Strategy, RequestMetadata,
    UpstreamCredential,
};

const TOKEN_INFO_PATH: &str = "/api/method/frappe.integrations.oauth2.openid_profile";
const LOGGED_USER_PATH: &str = "/api/method/frappe.auth.get_logged_user";

fn strategy_for(server: &MockServer, trusted: Vec<String>) -> OAuth2Strategy {
    OAuth2Strategy::new(OAuth2Config {
        token_info_url: format!("{}{}", server.uri(), TOKEN_INFO_PATH),
        issuer_url: server.uri(),
        trusted_clients: trusted,
        validate_remote: true,
        timeout_secs: 5,
    })
    .unwrap()
}

fn token_info_body() -> serde_json::Value {
    json!({
        "sub": "user123",
        "email": "test@example.com",
        "name": "Test User",
        "client_id": "backend-portal",
        "roles": ["Projects User"]
    })
}

#[tokio::test]
async fn bearer_token_introspected_once_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .and(header("Authorization", "Bearer valid-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_info_body()))
        .expect(1)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec![]);
    let meta = RequestMetadata::new().with_bearer("valid-token");

    let first = strategy.authenticate(&meta).await.unwrap();
    let second = strategy.authenticate(&meta).await.unwrap();

    assert_eq!(first.id(), "user123");
    assert_eq!(first.email(), "test@example.com");
    assert_eq!(second.id(), first.id());
    assert_eq!(second.email(), first.email());
    assert!(matches!(
        first.credential(),
        Some(UpstreamCredential::Bearer(_))
    ));
}

#[tokio::test]
async fn missing_credentials_fail_without_network_call() {
    let server = MockServer::start().await;
    let strategy = strategy_for(&server, vec![]);

    let err = strategy
        .authenticate(&RequestMetadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));

    // Non-bearer authorization schemes count as absent too.
    let err = strategy
        .authenticate(&RequestMetadata::new().with_authorization("Basic dXNlcg=="))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_token_is_hard_failure_and_never_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec![]);
    let meta = RequestMetadata::new().with_bearer("bad-token");

    let err = strategy.authenticate(&meta).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // Failures are not cached: the second attempt validates again.
    let err = strategy.authenticate(&meta).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn trusted_client_delegation_overrides_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_info_body()))
        .expect(1)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec!["backend-portal".into()]);
    let meta = RequestMetadata::new()
        .with_bearer("backend-token")
        .with_delegated_identity("emp-42", "emp42@example.com", "Employee 42");

    let identity = strategy.authenticate(&meta).await.unwrap();
    assert_eq!(identity.id(), "emp-42");
    assert_eq!(identity.email(), "emp42@example.com");
    // Delegated identities carry no roles and no upstream credential.
    assert!(identity.roles().is_empty());
    assert!(identity.credential().is_none());

    // The cache holds the introspected identity, not the delegated one:
    // the same token without delegation headers resolves to the subject,
    // and within the TTL no second introspection happens.
    let plain = strategy
        .authenticate(&RequestMetadata::new().with_bearer("backend-token"))
        .await
        .unwrap();
    assert_eq!(plain.id(), "user123");
}

#[tokio::test]
async fn delegation_applies_on_cache_hits_too() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_info_body()))
        .expect(1)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec!["backend-portal".into()]);

    // Prime the cache without delegation headers.
    let primed = strategy
        .authenticate(&RequestMetadata::new().with_bearer("backend-token"))
        .await
        .unwrap();
    assert_eq!(primed.id(), "user123");

    let delegated = strategy
        .authenticate(
            &RequestMetadata::new()
                .with_bearer("backend-token")
                .with_delegated_identity("emp-7", "emp7@example.com", "Employee 7"),
        )
        .await
        .unwrap();
    assert_eq!(delegated.id(), "emp-7");
}

#[tokio::test]
async fn untrusted_client_ignores_delegation_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_info_body()))
        .expect(1)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec![]);
    let meta = RequestMetadata::new()
        .with_bearer("backend-token")
        .with_delegated_identity("emp-42", "emp42@example.com", "Employee 42");

    let identity = strategy.authenticate(&meta).await.unwrap();
    assert_eq!(identity.id(), "user123");
}

#[tokio::test]
async fn session_cookie_validated_against_issuer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOGGED_USER_PATH))
        .and(header("Cookie", "sid=sess-abc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "user@example.com"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec![]);
    let meta = RequestMetadata::new()
        .with_session_cookie("sess-abc")
        .with_csrf_token("csrf-123");

    let first = strategy.authenticate(&meta).await.unwrap();
    assert_eq!(first.email(), "user@example.com");
    assert!(matches!(
        first.credential(),
        Some(UpstreamCredential::Session { sid, csrf_token })
            if sid == "sess-abc" && csrf_token.as_deref() == Some("csrf-123")
    ));

    // Cached: second resolution performs no network call.
    let second = strategy.authenticate(&meta).await.unwrap();
    assert_eq!(second.email(), first.email());
}

#[tokio::test]
async fn invalid_session_falls_through_to_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOGGED_USER_PATH))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_info_body()))
        .expect(1)
        .mount(&server)
        .await;

    let strategy = strategy_for(&server, vec![]);
    let meta = RequestMetadata::new()
        .with_session_cookie("stale-sid")
        .with_bearer("valid-token");

    let identity = strategy.authenticate(&meta).await.unwrap();
    assert_eq!(identity.id(), "user123");
    assert!(matches!(
        identity.credential(),
        Some(UpstreamCredential::Bearer(_))
    ));
}

#[tokio::test]
async fn expired_cache_entry_revalidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_info_body()))
        .expect(2)
        .mount(&server)
        .await;

    let strategy = OAuth2Strategy::with_cache_ttl(
        OAuth2Config {
            token_info_url: format!("{}{}", server.uri(), TOKEN_INFO_PATH),
            issuer_url: server.uri(),
            trusted_clients: vec![],
            validate_remote: true,
            timeout_secs: 5,
        },
        Duration::from_millis(10),
    )
    .unwrap();
    let meta = RequestMetadata::new().with_bearer("valid-token");

    strategy.authenticate(&meta).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    strategy.authenticate(&meta).await.unwrap();
}

#[tokio::test]
async fn gate_modes_decide_failure_propagation() {
    let server = MockServer::start().await;

    let optional = AuthGate::new(strategy_for(&server, vec![]), false);
    let resolved = optional.resolve(&RequestMetadata::new()).await.unwrap();
    assert!(resolved.is_none());

    let required = AuthGate::new(strategy_for(&server, vec![]), true);
    let err = required.resolve(&RequestMetadata::new()).await.unwrap_err();
    assert!(err.is_unauthorized());
}
