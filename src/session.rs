//! Session manager: owns the identity lifecycle and is the sole trigger
//! for membership resolution.

use log::{info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

use pantry_sync_feed::ChangeFeed;
use pantry_sync_identity::{IdentityService, Session, SessionEvent, SessionEventKind};
use pantry_sync_store::{RemoteStore, Role};

use crate::items::ItemSyncEngine;
use crate::membership::MembershipResolver;
use crate::state::{Identity, StateContainer, StateEvent};

pub struct SessionManager {
    identity: Arc<dyn IdentityService>,
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    state: Arc<StateContainer>,
    memberships: Arc<MembershipResolver>,
    items: Arc<ItemSyncEngine>,
    restore_timeout: Duration,
    /// User id whose membership fetch already ran; repeat signed-in events
    /// for the same id must not re-trigger it.
    last_processed: Mutex<Option<String>>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        state: Arc<StateContainer>,
        memberships: Arc<MembershipResolver>,
        items: Arc<ItemSyncEngine>,
        restore_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            store,
            feed,
            state,
            memberships,
            items,
            restore_timeout,
            last_processed: Mutex::new(None),
        }
    }

    /// Spawn the session-event listener, then run the bounded restore.
    /// A restore that errors or exceeds the timeout fails open to the
    /// unauthenticated state; the UI is never blocked on it.
    pub async fn start(self: Arc<Self>) {
        self.clone().spawn_listener();

        match timeout(self.restore_timeout, self.identity.restore_session()).await {
            Ok(Ok(Some(_session))) => {
                // The listener picks up the emitted initial-session event.
                info!("session restored");
            }
            Ok(Ok(None)) => {
                self.state.apply(StateEvent::Initialized);
            }
            Ok(Err(e)) => {
                warn!("session restore failed: {}", e);
                self.state.apply(StateEvent::Initialized);
            }
            Err(_) => {
                warn!(
                    "session restore exceeded {:?}, continuing unauthenticated",
                    self.restore_timeout
                );
                self.state.apply(StateEvent::Initialized);
            }
        }
    }

    fn spawn_listener(self: Arc<Self>) {
        let mut events = self.identity.on_session_change();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("session listener missed {} events", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_event(&self, event: SessionEvent) {
        match event.kind {
            SessionEventKind::SignedIn
            | SessionEventKind::InitialSession
            | SessionEventKind::TokenRefreshed
            | SessionEventKind::UserUpdated => {
                if let Some(session) = event.session {
                    self.handle_session(&session).await;
                } else {
                    warn!("session event {:?} without session", event.kind);
                }
            }
            SessionEventKind::SignedOut => self.handle_sign_out().await,
        }
    }

    async fn handle_session(&self, session: &Session) {
        let identity = Identity {
            id: session.user.id.clone(),
            display_name: session.display_name(),
            role: Role::Administrator,
        };
        self.state.apply(StateEvent::IdentityChanged(Some(identity)));

        self.store.set_auth(Some(session.access_token.clone())).await;
        self.feed.set_auth(Some(session.access_token.clone())).await;

        // Idempotent on user id across signed-in and refresh events.
        {
            let mut last = self.last_processed.lock().unwrap();
            if last.as_deref() == Some(session.user.id.as_str()) {
                return;
            }
            *last = Some(session.user.id.clone());
        }

        if let Err(e) = self.memberships.on_identity(&session.user.id).await {
            warn!("membership resolution failed: {}", e);
            // Stale-but-consistent beats blocked: mark startup done anyway.
            self.state.apply(StateEvent::Initialized);
        }
    }

    async fn handle_sign_out(&self) {
        info!("signed out");
        *self.last_processed.lock().unwrap() = None;
        self.store.set_auth(None).await;
        self.feed.set_auth(None).await;
        self.memberships.clear();
        self.items.ensure_active(None);
        self.state.apply(StateEvent::SignedOut);
    }
}
