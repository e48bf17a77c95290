use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use super::persist::{SessionPersistence, Snapshot};
use super::token::{self, TokenClaims};
use super::{AuthError, EndpointError};
use crate::api::error::message_from_text;
use crate::utils::truncate_body;

const LOGIN_PATH: &str = "/api/auth/login";
const REGISTER_PATH: &str = "/api/auth/register";
const REFRESH_PATH: &str = "/api/auth/refresh";

/// HTTP request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Identity record returned by the auth endpoints.
/// Unknown fields are kept so the persisted copy is lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn display_name(&self) -> String {
        self.pseudo
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| "unknown user".to_string())
    }
}

#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub pseudo: String,
    pub email: String,
    pub password: String,
}

/// In-memory view of the logged-in identity and its credential.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub token: Option<String>,
    pub is_authenticated: bool,
    pub last_error: Option<String>,
}

/// Session transitions, for presentation layers that react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut,
    /// A refresh failed during a request; the user must authenticate again
    Expired,
}

struct Inner {
    client: Client,
    base_url: Url,
    state: RwLock<Session>,
    persistence: SessionPersistence,
    /// Serializes refreshes so concurrent 401s share one refresh
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

/// Owner of the session state.
/// Clone is cheap - all clones share the same session and connection pool.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create a store for the API at `base_url` with the default timeout
    pub fn new(base_url: &str, persistence: SessionPersistence) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, base_url, persistence))
    }

    /// Create a store sharing an existing client's connection pool
    pub fn with_client(client: Client, base_url: Url, persistence: SessionPersistence) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                state: RwLock::new(Session::default()),
                persistence,
                refresh_lock: Mutex::new(()),
                events,
            }),
        }
    }

    // ===== State access =====

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session(&self) -> Session {
        self.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    /// Decoded payload of the held token
    pub fn claims(&self) -> Option<TokenClaims> {
        self.read().token.as_deref().and_then(token::decode_claims)
    }

    /// Role of the user record, falling back to the token's role claim
    pub fn role(&self) -> Option<String> {
        self.user()
            .and_then(|u| u.role)
            .or_else(|| self.claims().and_then(|c| c.role))
    }

    /// True when no token is held or its expiry has passed
    pub fn is_expired(&self) -> bool {
        match self.read().token.as_deref() {
            Some(held) => token::is_expired(held),
            None => true,
        }
    }

    /// `Bearer <token>`, or an empty string without a token
    pub fn authorization_header_value(&self) -> String {
        match self.read().token.as_deref() {
            Some(held) => format!("Bearer {}", held),
            None => String::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Resolve `path` against the base URL. The result must stay on the
    /// base origin, since requests to it carry the session's token.
    pub(crate) fn endpoint(&self, path: &str) -> std::result::Result<Url, EndpointError> {
        let url = self.inner.base_url.join(path)?;
        if url.origin() != self.inner.base_url.origin() {
            return Err(EndpointError::ForeignOrigin(path.to_string()));
        }
        Ok(url)
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    // ===== Transitions =====

    /// Log in with email and password
    pub async fn login(&self, credentials: &LoginRequest) -> Result<Session, AuthError> {
        self.authenticate(LOGIN_PATH, credentials, "Login failed").await
    }

    /// Create an account and log in as it
    pub async fn register(&self, new_user: &RegisterRequest) -> Result<Session, AuthError> {
        self.authenticate(REGISTER_PATH, new_user, "Registration failed")
            .await
    }

    async fn authenticate<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        generic_error: &str,
    ) -> Result<Session, AuthError> {
        self.write().last_error = None;

        let result = self
            .post_auth(path, body, None, generic_error)
            .await
            .and_then(split_auth_response);

        let (user, token) = match result {
            Ok(parts) => parts,
            Err(e) => {
                warn!(path = path, error = %e, "Authentication failed");
                self.write().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let session = {
            let mut state = self.write();
            state.user = Some(user.clone());
            state.token = Some(token.clone());
            state.is_authenticated = true;
            state.clone()
        };

        self.persist(&user, &token);
        info!(user = %user.display_name(), "Authenticated");
        self.emit(SessionEvent::LoggedIn);
        Ok(session)
    }

    /// Exchange the held token for a fresh one.
    /// A failure logs the session out, unless a login replaced the token
    /// while the refresh was in flight; the newer token is returned then.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let stale = self.token().ok_or(AuthError::NoToken)?;
        self.refresh_from(&stale).await
    }

    /// Refresh unless another caller already replaced `stale`.
    /// Ends with the session holding a token other than `stale`, or cleared.
    pub(crate) async fn refresh_from(&self, stale: &str) -> Result<String, AuthError> {
        let _guard = self.inner.refresh_lock.lock().await;

        match self.token() {
            None => return Err(AuthError::NoToken),
            Some(current) if current != stale => {
                debug!("Token already refreshed by a concurrent caller");
                return Ok(current);
            }
            Some(_) => {}
        }

        let result = self
            .post_auth(
                REFRESH_PATH,
                &serde_json::json!({ "token": stale }),
                Some(stale),
                "Token refresh failed",
            )
            .await
            .and_then(|body| {
                body.get("token")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        AuthError::InvalidResponse("refresh response has no token".into())
                    })
            });

        match result {
            Ok(token) => {
                {
                    let mut state = self.write();
                    // Logged out or logged in again while the refresh was in flight
                    if state.token.as_deref() != Some(stale) {
                        debug!("Session changed during refresh, dropping new token");
                        return state.token.clone().ok_or(AuthError::NoToken);
                    }
                    state.token = Some(token.clone());
                }
                if let Err(e) = self.inner.persistence.save_token(&token) {
                    warn!(error = %e, "Failed to persist refreshed token");
                }
                debug!("Token refreshed");
                self.emit(SessionEvent::Refreshed);
                Ok(token)
            }
            Err(e) => {
                {
                    let mut state = self.write();
                    match state.token.clone() {
                        Some(current) if current != stale => {
                            debug!(error = %e, "Refresh failed for a replaced session, keeping it");
                            return Ok(current);
                        }
                        None => return Err(e),
                        Some(_) => {}
                    }
                    warn!(error = %e, "Token refresh failed, logging out");
                    // Cleared under the lock so a racing login keeps its snapshot
                    Self::clear(&mut state);
                    if let Err(e) = self.inner.persistence.clear() {
                        warn!(error = %e, "Failed to delete session snapshot");
                    }
                }
                self.emit(SessionEvent::LoggedOut);
                Err(e)
            }
        }
    }

    fn clear(state: &mut Session) {
        state.user = None;
        state.token = None;
        state.is_authenticated = false;
    }

    /// Clear the session and delete the persisted snapshot
    pub fn logout(&self) {
        Self::clear(&mut self.write());
        if let Err(e) = self.inner.persistence.clear() {
            warn!(error = %e, "Failed to delete session snapshot");
        }
        debug!("Logged out");
        self.emit(SessionEvent::LoggedOut);
    }

    /// Announce that a failed refresh ended the session mid-request.
    /// `refresh_from` has already cleared it.
    pub(crate) fn expire(&self) {
        debug!("Session expired");
        self.emit(SessionEvent::Expired);
    }

    /// Restore the session from the persisted snapshot.
    /// Returns whether the store is authenticated afterwards.
    pub fn restore(&self) -> bool {
        if self.is_authenticated() {
            return true;
        }

        match self.inner.persistence.load() {
            Ok(Snapshot::Valid { user, token }) => {
                let mut state = self.write();
                state.user = Some(user);
                state.token = Some(token);
                state.is_authenticated = true;
                debug!("Session restored");
                true
            }
            Ok(Snapshot::Empty) => false,
            Ok(Snapshot::Malformed(reason)) => {
                warn!(reason = %reason, "Discarding malformed session snapshot");
                if let Err(e) = self.inner.persistence.clear() {
                    warn!(error = %e, "Failed to delete session snapshot");
                }
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to read session snapshot");
                false
            }
        }
    }

    fn persist(&self, user: &User, token: &str) {
        if let Err(e) = self.inner.persistence.save(user, token) {
            warn!(error = %e, "Failed to persist session snapshot");
        }
    }

    /// POST a JSON body to an auth endpoint and return the parsed reply
    async fn post_auth<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
        generic_error: &str,
    ) -> Result<Value, AuthError> {
        let url = self
            .endpoint(path)
            .map_err(|e| AuthError::InvalidResponse(format!("bad endpoint {}: {}", path, e)))?;

        let mut request = self
            .inner
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(path = path, status = %status, "Auth endpoint refused request");
            let message =
                message_from_text(&text).unwrap_or_else(|| generic_error.to_string());
            return Err(AuthError::Rejected(message));
        }

        serde_json::from_str(&text).map_err(|_| AuthError::InvalidResponse(truncate_body(&text)))
    }
}

/// Split a login/register reply into the identity record and its token
fn split_auth_response(body: Value) -> Result<(User, String), AuthError> {
    let mut fields = match body {
        Value::Object(fields) => fields,
        other => {
            return Err(AuthError::InvalidResponse(truncate_body(&other.to_string())));
        }
    };

    let token = match fields.remove("token") {
        Some(Value::String(token)) if !token.is_empty() => token,
        _ => return Err(AuthError::InvalidResponse("response has no token".into())),
    };

    let user = serde_json::from_value(Value::Object(fields))
        .map_err(|e| AuthError::InvalidResponse(format!("bad user record: {}", e)))?;
    Ok((user, token))
}
