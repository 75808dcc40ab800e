use clearchart_lib::auth::firebase::FirebaseIdentity;
use clearchart_lib::auth::{AuthState, Credentials, IdentityProvider, SessionProvider, SignInFlow};
use clearchart_lib::config::Environment;
use clearchart_lib::store::{KeyValueStore, MemoryStore, REFRESH_TOKEN_KEY};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn identity(server: &MockServer, store: Arc<MemoryStore>) -> Arc<FirebaseIdentity> {
    Arc::new(FirebaseIdentity::with_endpoints(
        "api-key",
        "https://app.example.com",
        store,
        &server.uri(),
        &server.uri(),
    ))
}

fn auth_body(id_token: &str, refresh_token: &str) -> serde_json::Value {
    json!({
        "idToken": id_token,
        "refreshToken": refresh_token,
        "expiresIn": "3600",
        "localId": "uid-1",
        "email": "pat@example.com",
        "displayName": "Pat"
    })
}

#[tokio::test]
async fn test_password_sign_in_persists_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts:signInWithPassword"))
        .and(query_param("key", "api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("id-1", "refresh-1")))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let identity = identity(&server, store.clone());
    let provider = SessionProvider::new(identity.clone(), Environment::Deployed);

    let session = provider
        .login_with_email("pat@example.com", "hunter2222")
        .await
        .unwrap();
    assert_eq!(session.label(), "Pat");
    assert!(matches!(provider.state(), AuthState::SignedIn(_)));
    assert_eq!(provider.get_token().await.as_deref(), Some("id-1"));
    assert_eq!(
        store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
        Some("refresh-1")
    );
}

#[tokio::test]
async fn test_bad_password_maps_to_fixed_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "INVALID_PASSWORD"}
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let provider = SessionProvider::new(identity(&server, store), Environment::Deployed);
    let err = provider
        .login_with_email("pat@example.com", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("INVALID_PASSWORD"));
    assert_eq!(provider.auth_error(), Some(err.user_message()));
}

#[tokio::test]
async fn test_restore_uses_persisted_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id_token": "id-2",
            "refresh_token": "refresh-2",
            "expires_in": "3600"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/accounts:lookup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{"localId": "uid-1", "email": "pat@example.com"}]
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.set(REFRESH_TOKEN_KEY, "stored").unwrap();
    let identity = identity(&server, store.clone());
    let provider = SessionProvider::new(identity.clone(), Environment::Deployed);
    assert!(provider.is_loading());

    identity.restore().await;
    let state = provider.ready().await;
    assert_eq!(state.session().map(|s| s.uid.as_str()), Some("uid-1"));
    assert_eq!(identity.get_token(false).await.unwrap().as_deref(), Some("id-2"));
    assert_eq!(
        store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
        Some("refresh-2")
    );
}

#[tokio::test]
async fn test_rejected_refresh_token_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "TOKEN_EXPIRED"}
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.set(REFRESH_TOKEN_KEY, "stale").unwrap();
    let identity = identity(&server, store.clone());

    assert_eq!(identity.restore().await, AuthState::SignedOut);
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(identity.get_token(false).await.unwrap(), None);
}

#[tokio::test]
async fn test_restore_without_stored_session_makes_no_requests() {
    let server = MockServer::start().await;
    let identity = identity(&server, Arc::new(MemoryStore::new()));
    assert_eq!(identity.restore().await, AuthState::SignedOut);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_register_sets_display_name_after_sign_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts:signUp"))
        .and(body_partial_json(json!({
            "email": "pat@example.com",
            "password": "s3cret-pass",
            "returnSecureToken": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "idToken": "id-new",
            "refreshToken": "refresh-new",
            "expiresIn": "3600",
            "localId": "uid-9",
            "email": "pat@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/accounts:update"))
        .and(body_partial_json(json!({"idToken": "id-new", "displayName": "Pat"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"localId": "uid-9"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let identity = identity(&server, store.clone());
    let session = identity
        .register("pat@example.com", "s3cret-pass", Some("Pat"))
        .await
        .unwrap();

    assert_eq!(session.uid, "uid-9");
    assert_eq!(session.display_name.as_deref(), Some("Pat"));
    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/accounts:signUp", "/accounts:update"]);
    assert_eq!(
        store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
        Some("refresh-new")
    );
}

async fn google_sign_in(flow: SignInFlow, expected_request_uri: &str) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts:signInWithIdp"))
        .and(body_partial_json(json!({
            "postBody": "id_token=g-token&providerId=google.com",
            "requestUri": expected_request_uri,
            "returnSecureToken": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("id-g", "refresh-g")))
        .expect(1)
        .mount(&server)
        .await;

    let identity = identity(&server, Arc::new(MemoryStore::new()));
    let credentials = Credentials::Google {
        id_token: "g-token".into(),
    };
    let session = identity.sign_in(&credentials, flow).await.unwrap();
    assert_eq!(session.uid, "uid-1");
    assert_eq!(identity.get_token(false).await.unwrap().as_deref(), Some("id-g"));
}

#[tokio::test]
async fn test_google_popup_uses_localhost_request_uri() {
    google_sign_in(SignInFlow::Popup, "http://localhost").await;
}

#[tokio::test]
async fn test_google_redirect_uses_configured_request_uri() {
    google_sign_in(SignInFlow::Redirect, "https://app.example.com").await;
}

#[tokio::test]
async fn test_sign_out_during_refresh_keeps_session_cleared() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("id-1", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "id_token": "id-late",
                    "refresh_token": "refresh-late",
                    "expires_in": "3600"
                }))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let identity = identity(&server, store.clone());
    let credentials = Credentials::Email {
        email: "pat@example.com".into(),
        password: "hunter2222".into(),
    };
    identity.sign_in(&credentials, SignInFlow::Popup).await.unwrap();

    let refreshing = tokio::spawn({
        let identity = identity.clone();
        async move { identity.get_token(true).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    identity.sign_out().await.unwrap();

    assert_eq!(refreshing.await.unwrap().unwrap(), None);
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(identity.get_token(false).await.unwrap(), None);
    assert_eq!(identity.current_session().await, None);
}
