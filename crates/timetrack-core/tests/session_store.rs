use std::path::Path;
use std::time::Duration;

use serde_json::json;
use timetrack_core::auth::FileStore;
use timetrack_core::{
    AuthError, LoginRequest, RegisterRequest, SessionEvent, SessionPersistence, SessionStore,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials() -> LoginRequest {
    LoginRequest {
        email: "ada@example.com".into(),
        password: "secret".into(),
    }
}

fn file_backed(server: &MockServer, dir: &Path) -> SessionStore {
    let persistence = SessionPersistence::new(Box::new(FileStore::new(dir.to_path_buf())));
    SessionStore::new(&server.uri(), persistence).unwrap()
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "secret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "pseudo": "ada",
            "email": "ada@example.com",
            "role": "USER",
            "token": token
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_persists_and_restores() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    let dir = tempfile::tempdir().unwrap();

    let store = file_backed(&server, dir.path());
    let mut events = store.subscribe();
    let session = store.login(&credentials()).await.unwrap();
    assert!(session.is_authenticated);
    assert_eq!(session.token.as_deref(), Some("abc"));
    assert_eq!(session.user.as_ref().and_then(|u| u.pseudo.as_deref()), Some("ada"));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedIn);

    // A fresh process reading the same snapshot
    let restored = file_backed(&server, dir.path());
    assert!(restored.restore());
    assert_eq!(restored.session().user, session.user);
    assert_eq!(restored.token().as_deref(), Some("abc"));
    assert_eq!(restored.authorization_header_value(), "Bearer abc");
}

#[tokio::test]
async fn test_logout_then_restore_is_unauthenticated() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    let dir = tempfile::tempdir().unwrap();

    let store = file_backed(&server, dir.path());
    store.login(&credentials()).await.unwrap();
    store.logout();
    assert!(!store.is_authenticated());
    assert_eq!(store.authorization_header_value(), "");

    let fresh = file_backed(&server, dir.path());
    assert!(!fresh.restore());
    assert!(!fresh.is_authenticated());
}

#[tokio::test]
async fn test_login_failure_keeps_existing_session() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "wrong" })))
        .respond_with(ResponseTemplate::new(400).set_body_string("Email ou mot de passe incorrect"))
        .mount(&server)
        .await;

    let store = SessionStore::new(&server.uri(), SessionPersistence::in_memory()).unwrap();
    store.login(&credentials()).await.unwrap();

    let err = store
        .login(&LoginRequest {
            email: "ada@example.com".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Rejected(ref m) if m == "Email ou mot de passe incorrect"));
    assert_eq!(store.last_error().as_deref(), Some("Email ou mot de passe incorrect"));
    assert!(store.is_authenticated());
    assert_eq!(store.token().as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_login_failure_without_body_uses_generic_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = SessionStore::new(&server.uri(), SessionPersistence::in_memory()).unwrap();
    let err = store.login(&credentials()).await.unwrap_err();
    assert_eq!(err.to_string(), "Login failed");
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_login_network_failure() {
    let store = SessionStore::new("http://127.0.0.1:9", SessionPersistence::in_memory()).unwrap();
    let err = store.login(&credentials()).await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
    assert!(store.last_error().is_some());
}

#[tokio::test]
async fn test_register() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/register"))
        .and(body_json(json!({
            "pseudo": "grace",
            "email": "grace@example.com",
            "password": "secret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 2,
            "pseudo": "grace",
            "email": "grace@example.com",
            "role": "USER",
            "token": "reg"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/register"))
        .and(body_json(json!({
            "pseudo": "ada",
            "email": "ada@example.com",
            "password": "secret"
        })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "Email déjà utilisé" })))
        .mount(&server)
        .await;

    let store = SessionStore::new(&server.uri(), SessionPersistence::in_memory()).unwrap();
    let err = store
        .register(&RegisterRequest {
            pseudo: "ada".into(),
            email: "ada@example.com".into(),
            password: "secret".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Email déjà utilisé");
    assert!(!store.is_authenticated());

    let session = store
        .register(&RegisterRequest {
            pseudo: "grace".into(),
            email: "grace@example.com".into(),
            password: "secret".into(),
        })
        .await
        .unwrap();
    assert!(session.is_authenticated);
    assert_eq!(session.user.unwrap().id, Some(2));
    assert_eq!(store.last_error(), None);
}

#[tokio::test]
async fn test_refresh_replaces_and_persists_token() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(header("Authorization", "Bearer abc"))
        .and(body_json(json!({ "token": "abc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "xyz" })))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let store = file_backed(&server, dir.path());
    store.login(&credentials()).await.unwrap();
    assert_eq!(store.refresh().await.unwrap(), "xyz");
    assert_eq!(store.token().as_deref(), Some("xyz"));

    let fresh = file_backed(&server, dir.path());
    assert!(fresh.restore());
    assert_eq!(fresh.token().as_deref(), Some("xyz"));
}

#[tokio::test]
async fn test_refresh_failure_logs_out() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Token invalide ou expiré"))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let store = file_backed(&server, dir.path());
    store.login(&credentials()).await.unwrap();
    let err = store.refresh().await.unwrap_err();
    assert_eq!(err.to_string(), "Token invalide ou expiré");
    assert!(!store.is_authenticated());
    assert_eq!(store.user(), None);

    let fresh = file_backed(&server, dir.path());
    assert!(!fresh.restore());
}

#[tokio::test]
async fn test_refresh_response_without_token_logs_out() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;

    let store = SessionStore::new(&server.uri(), SessionPersistence::in_memory()).unwrap();
    store.login(&credentials()).await.unwrap();
    assert!(matches!(
        store.refresh().await,
        Err(AuthError::InvalidResponse(_))
    ));
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_malformed_snapshot_is_deleted() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("user.session"), "{truncated").unwrap();
    std::fs::write(dir.path().join("token.session"), "abc").unwrap();

    let store = file_backed(&server, dir.path());
    assert!(!store.restore());
    assert!(!store.is_authenticated());
    assert!(!dir.path().join("user.session").exists());
    assert!(!dir.path().join("token.session").exists());
}

#[tokio::test]
async fn test_failed_refresh_keeps_session_from_concurrent_login() {
    let server = MockServer::start().await;
    mount_login(&server, "abc").await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "again" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": 1, "pseudo": "ada", "token": "def" }))
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string("Token invalide ou expiré")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let store = file_backed(&server, dir.path());
    store.login(&credentials()).await.unwrap();
    let mut events = store.subscribe();

    let again = LoginRequest {
        email: "ada@example.com".into(),
        password: "again".into(),
    };
    let (refreshed, relogged) = futures::join!(store.refresh(), store.login(&again));

    relogged.unwrap();
    assert_eq!(refreshed.unwrap(), "def");
    assert!(store.is_authenticated());
    assert_eq!(store.token().as_deref(), Some("def"));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedIn);
    assert!(events.try_recv().is_err());

    let fresh = file_backed(&server, dir.path());
    assert!(fresh.restore());
    assert_eq!(fresh.token().as_deref(), Some("def"));
}
