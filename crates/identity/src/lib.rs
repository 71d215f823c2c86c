//! Identity service boundary for the SharedPantry sync core.
//!
//! Wraps the hosted auth API (sign up, sign in, sign out, session restore,
//! password recovery) behind the [`IdentityService`] trait and publishes
//! session lifecycle changes on a broadcast channel. The sync core reacts
//! to those events; it never talks to the auth API directly.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by the identity boundary.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("missing session")]
    MissingSession,
}

/// Authenticated user record as returned by the auth API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub user: User,
}

impl Session {
    /// Display name for the session's user: metadata full name, else the
    /// email local part, else a generic placeholder.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.user.user_metadata.get("full_name").and_then(|v| v.as_str()) {
            if !name.trim().is_empty() {
                return name.to_string();
            }
        }
        if let Some(email) = self.user.email.as_deref() {
            let local = email.split('@').next().unwrap_or_default();
            if !local.is_empty() {
                return local.to_string();
            }
        }
        "User".to_string()
    }
}

/// Kinds of session lifecycle changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    SignedIn,
    InitialSession,
    TokenRefreshed,
    UserUpdated,
    SignedOut,
}

/// A session lifecycle change. `session` is `None` only for `SignedOut`.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

/// Operations the sync core needs from the identity provider.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Restore a previously persisted session, if any. A stale or revoked
    /// session resolves to `None` rather than an error.
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Register a new account. Email confirmation may be required, so no
    /// session is assumed on success.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(), IdentityError>;

    /// Best effort: always clears the local session and emits `SignedOut`,
    /// even when the remote call fails.
    async fn sign_out(&self) -> Result<(), IdentityError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), IdentityError>;

    async fn update_password(&self, new_password: &str) -> Result<(), IdentityError>;

    fn current_session(&self) -> Option<Session>;

    /// Subscribe to session lifecycle changes.
    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent>;
}

/// HTTP implementation of [`IdentityService`] over the `/auth/v1/` surface.
///
/// When constructed with a session path, sessions are persisted to disk on
/// sign-in and removed on sign-out, which is what makes restore possible
/// across process restarts.
pub struct IdentityClient {
    url: String,
    key: String,
    http_client: Client,
    session_path: Option<PathBuf>,
    current_session: RwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl IdentityClient {
    pub fn new(url: &str, key: &str, http_client: Client, session_path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            session_path,
            current_session: RwLock::new(None),
            events,
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        let event = SessionEvent { kind, session: self.current_session() };
        // No receivers yet is fine.
        let _ = self.events.send(event);
    }

    fn set_session(&self, session: Option<Session>) {
        *self.current_session.write().unwrap() = session.clone();
        self.persist(session.as_ref());
    }

    fn persist(&self, session: Option<&Session>) {
        let Some(path) = &self.session_path else { return };
        let result = match session {
            Some(session) => {
                serde_json::to_string(session).map_err(IdentityError::from).and_then(|body| {
                    fs::write(path, body).map_err(|e| IdentityError::Api(e.to_string()))
                })
            }
            None => {
                if path.exists() {
                    fs::remove_file(path).map_err(|e| IdentityError::Api(e.to_string()))
                } else {
                    Ok(())
                }
            }
        };
        if let Err(e) = result {
            warn!("failed to persist session: {}", e);
        }
    }

    fn load_persisted(&self) -> Option<Session> {
        let path = self.session_path.as_ref()?;
        let body = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Session>(&body) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("discarding unreadable persisted session: {}", e);
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        payload: serde_json::Value,
    ) -> Result<Session, IdentityError> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.url, grant_type);

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if matches!(status.as_u16(), 400 | 401 | 422) {
                debug!("token grant rejected: {}", error_text);
                return Err(IdentityError::InvalidCredentials);
            }
            return Err(IdentityError::Api(error_text));
        }

        let session: Session = response.json().await?;
        Ok(session)
    }

    /// Refresh the current session in place, emitting `TokenRefreshed`.
    pub async fn refresh_session(&self) -> Result<Session, IdentityError> {
        let session = self.current_session().ok_or(IdentityError::MissingSession)?;
        let refreshed = self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": session.refresh_token }),
            )
            .await?;
        self.set_session(Some(refreshed.clone()));
        self.emit(SessionEventKind::TokenRefreshed);
        Ok(refreshed)
    }
}

#[async_trait]
impl IdentityService for IdentityClient {
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError> {
        let Some(persisted) = self.load_persisted() else {
            return Ok(None);
        };

        // One round trip: exchange the persisted refresh token for a fresh
        // session. A rejected token means the session is gone, not an error.
        match self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": persisted.refresh_token }),
            )
            .await
        {
            Ok(session) => {
                self.set_session(Some(session.clone()));
                self.emit(SessionEventKind::InitialSession);
                Ok(Some(session))
            }
            Err(IdentityError::InvalidCredentials) => {
                warn!("persisted session no longer valid, discarding");
                self.set_session(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        self.set_session(Some(session.clone()));
        self.emit(SessionEventKind::SignedIn);
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(), IdentityError> {
        let url = format!("{}/auth/v1/signup", self.url);

        let payload = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "full_name": display_name },
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IdentityError::Api(error_text));
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        if let Some(session) = self.current_session() {
            let url = format!("{}/auth/v1/logout", self.url);
            let result = self
                .http_client
                .post(&url)
                .header("apikey", &self.key)
                .header("Authorization", format!("Bearer {}", session.access_token))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!("remote sign-out returned {}", response.status());
                }
                Err(e) => warn!("remote sign-out failed: {}", e),
                _ => {}
            }
        }

        self.set_session(None);
        self.emit(SessionEventKind::SignedOut);
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        let url = format!("{}/auth/v1/recover", self.url);

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IdentityError::Api(error_text));
        }
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), IdentityError> {
        let session = self.current_session().ok_or(IdentityError::MissingSession)?;
        let url = format!("{}/auth/v1/user", self.url);

        let response = self
            .http_client
            .put(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .json(&serde_json::json!({ "password": new_password }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IdentityError::Api(error_text));
        }

        let user: User = response.json().await?;
        let mut updated = session;
        updated.user = user;
        self.set_session(Some(updated));
        self.emit(SessionEventKind::UserUpdated);
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.current_session.read().unwrap().clone()
    }

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(metadata: serde_json::Value, email: Option<&str>) -> Session {
        Session {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_in: 3600,
            token_type: "bearer".into(),
            user: User {
                id: "u1".into(),
                email: email.map(str::to_string),
                user_metadata: metadata,
            },
        }
    }

    #[test]
    fn display_name_prefers_metadata_full_name() {
        let session = session_with(
            serde_json::json!({ "full_name": "Ana Matos" }),
            Some("ana@example.com"),
        );
        assert_eq!(session.display_name(), "Ana Matos");
    }

    #[test]
    fn display_name_falls_back_to_email_local_part() {
        let session = session_with(serde_json::Value::Null, Some("ana@example.com"));
        assert_eq!(session.display_name(), "ana");
    }

    #[test]
    fn display_name_bottoms_out_at_placeholder() {
        let session = session_with(serde_json::Value::Null, None);
        assert_eq!(session.display_name(), "User");
    }
}
