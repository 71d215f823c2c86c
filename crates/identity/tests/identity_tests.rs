use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pantry_sync_identity::{
    IdentityClient, IdentityError, IdentityService, SessionEventKind,
};

fn session_body(user_id: &str) -> serde_json::Value {
    json!({
        "access_token": "access-1",
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "token_type": "bearer",
        "user": {
            "id": user_id,
            "email": "ana@example.com",
            "user_metadata": { "full_name": "Ana Matos" }
        }
    })
}

#[tokio::test]
async fn sign_in_stores_session_and_emits_signed_in() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("u1")))
        .mount(&server)
        .await;

    let client = IdentityClient::new(&server.uri(), "anon", reqwest::Client::new(), None);
    let mut events = client.on_session_change();

    let session = client.sign_in("ana@example.com", "secret").await.unwrap();
    assert_eq!(session.user.id, "u1");
    assert_eq!(client.current_session().unwrap().access_token, "access-1");

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, SessionEventKind::SignedIn);
    assert_eq!(event.session.unwrap().user.id, "u1");
}

#[tokio::test]
async fn sign_in_maps_rejection_to_invalid_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let client = IdentityClient::new(&server.uri(), "anon", reqwest::Client::new(), None);
    let err = client.sign_in("ana@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, IdentityError::InvalidCredentials));
    assert!(client.current_session().is_none());
}

#[tokio::test]
async fn restore_refreshes_persisted_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("u1")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    std::fs::write(
        &session_path,
        session_body("u1").to_string(),
    )
    .unwrap();

    let client = IdentityClient::new(
        &server.uri(),
        "anon",
        reqwest::Client::new(),
        Some(session_path),
    );
    let mut events = client.on_session_change();

    let restored = client.restore_session().await.unwrap();
    assert_eq!(restored.unwrap().user.id, "u1");
    assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::InitialSession);
}

#[tokio::test]
async fn restore_without_persisted_session_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let client = IdentityClient::new(
        "http://localhost:1",
        "anon",
        reqwest::Client::new(),
        Some(dir.path().join("session.json")),
    );

    // No file means no network call at all, so the bogus URL is never hit.
    let restored = client.restore_session().await.unwrap();
    assert!(restored.is_none());
}

#[tokio::test]
async fn restore_discards_rejected_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    std::fs::write(&session_path, session_body("u1").to_string()).unwrap();

    let client = IdentityClient::new(
        &server.uri(),
        "anon",
        reqwest::Client::new(),
        Some(session_path.clone()),
    );

    let restored = client.restore_session().await.unwrap();
    assert!(restored.is_none());
    assert!(!session_path.exists());
}

#[tokio::test]
async fn sign_out_clears_session_even_when_remote_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("u1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = IdentityClient::new(&server.uri(), "anon", reqwest::Client::new(), None);
    client.sign_in("ana@example.com", "secret").await.unwrap();
    let mut events = client.on_session_change();

    client.sign_out().await.unwrap();
    assert!(client.current_session().is_none());
    assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::SignedOut);
}
