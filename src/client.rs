use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use pantry_sync_classifier::{Classifier, RemoteClassifier};
use pantry_sync_feed::{ChangeFeed, FeedClient};
use pantry_sync_identity::{IdentityClient, IdentityService};
use pantry_sync_store::{GroceryItem, ItemPatch, Member, Pantry, RemoteStore, RestStore};

use crate::config::PantryConfig;
use crate::error::{CoreError, CoreResult};
use crate::items::{ItemSyncEngine, NewItem};
use crate::membership::MembershipResolver;
use crate::offline::{guest_baseline, GuestCache};
use crate::pantry::PantryLifecycle;
use crate::session::SessionManager;
use crate::state::{ReconciliationState, StateContainer, StateEvent};

/// The client core: one state tree, the service boundaries, and the
/// command set exposed to presentation.
///
/// Construct with [`PantryClient::new`] for the hosted services, or
/// [`PantryClient::with_services`] to inject any other implementations of
/// the boundary traits. There is no ambient global; every consumer gets
/// its handle from here.
pub struct PantryClient {
    state: Arc<StateContainer>,
    identity: Arc<dyn IdentityService>,
    session: Arc<SessionManager>,
    items: Arc<ItemSyncEngine>,
    pantries: PantryLifecycle,
    store: Arc<dyn RemoteStore>,
    guest_cache: Option<Arc<GuestCache>>,
}

impl PantryClient {
    /// Build the client over the hosted service endpoints in `config`.
    pub fn new(config: PantryConfig) -> CoreResult<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        let url = config.url.as_str();
        let identity: Arc<dyn IdentityService> = Arc::new(IdentityClient::new(
            url,
            &config.anon_key,
            http_client.clone(),
            config.session_path.clone(),
        ));
        let store: Arc<dyn RemoteStore> =
            Arc::new(RestStore::new(url, &config.anon_key, http_client.clone()));
        let feed: Arc<dyn ChangeFeed> = Arc::new(FeedClient::new(url, &config.anon_key));
        let classifier: Arc<dyn Classifier> =
            Arc::new(RemoteClassifier::new(url, &config.anon_key, http_client));

        Ok(Self::with_services(identity, store, feed, classifier, config))
    }

    /// Build the client over explicit service handles.
    pub fn with_services(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        classifier: Arc<dyn Classifier>,
        config: PantryConfig,
    ) -> Self {
        let state = Arc::new(StateContainer::new(ReconciliationState::initial()));
        let items = Arc::new(ItemSyncEngine::new(
            store.clone(),
            feed.clone(),
            classifier,
            state.clone(),
        ));
        let memberships = Arc::new(MembershipResolver::new(
            store.clone(),
            feed.clone(),
            state.clone(),
            items.clone(),
        ));
        let session = Arc::new(SessionManager::new(
            identity.clone(),
            store.clone(),
            feed,
            state.clone(),
            memberships.clone(),
            items.clone(),
            config.restore_timeout,
        ));
        let pantries = PantryLifecycle::new(store.clone(), state.clone(), memberships, items.clone());
        let guest_cache = config
            .guest_cache_dir
            .as_deref()
            .map(|dir| Arc::new(GuestCache::new(dir)));

        Self { state, identity, session, items, pantries, store, guest_cache }
    }

    /// Seed guest state, start the session listener, and run the bounded
    /// session restore. Returns once the tree is initialized one way or
    /// the other.
    pub async fn start(&self) {
        let saved = self.guest_cache.as_ref().and_then(|cache| cache.load());
        match saved {
            Some(saved) => {
                info!("loaded guest snapshot");
                self.state.apply(StateEvent::Replaced(saved));
            }
            None => {
                self.state.apply(StateEvent::Replaced(guest_baseline()));
            }
        }
        self.spawn_guest_persistence();

        self.session.clone().start().await;
    }

    /// Persist the tree on every change while unauthenticated.
    fn spawn_guest_persistence(&self) {
        let Some(cache) = self.guest_cache.clone() else { return };
        let mut snapshots = self.state.watch();
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.initialized && snapshot.identity.is_none() {
                    if let Err(e) = cache.save(&snapshot) {
                        warn!("guest snapshot write failed: {}", e);
                    }
                }
            }
        });
    }

    /// Current read-only snapshot of the state tree.
    pub fn snapshot(&self) -> ReconciliationState {
        self.state.snapshot()
    }

    /// Watch channel delivering every new snapshot.
    pub fn watch(&self) -> watch::Receiver<ReconciliationState> {
        self.state.watch()
    }

    // --- identity commands ---

    pub async fn login(&self, email: &str, password: &str) -> CoreResult<()> {
        self.identity.sign_in(email, password).await?;
        Ok(())
    }

    pub async fn signup(&self, email: &str, password: &str, display_name: &str) -> CoreResult<()> {
        self.identity.sign_up(email, password, display_name).await?;
        Ok(())
    }

    /// Best effort; never fails.
    pub async fn logout(&self) {
        if let Err(e) = self.identity.sign_out().await {
            warn!("sign-out reported {}", e);
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> CoreResult<()> {
        self.identity.request_password_reset(email).await?;
        Ok(())
    }

    pub async fn update_password(&self, new_password: &str) -> CoreResult<()> {
        self.identity.update_password(new_password).await?;
        Ok(())
    }

    // --- item commands (active pantry) ---

    pub async fn add_item(&self, item: NewItem) -> CoreResult<GroceryItem> {
        self.items.add(item).await
    }

    pub async fn toggle_item(&self, id: &str) -> CoreResult<()> {
        self.items.toggle(id).await
    }

    pub async fn update_item(&self, id: &str, patch: ItemPatch) -> CoreResult<()> {
        self.items.update(id, patch).await
    }

    pub async fn remove_item(&self, id: &str) -> CoreResult<()> {
        self.items.remove(id).await
    }

    pub async fn clear_bought(&self) -> CoreResult<()> {
        self.items.clear_bought().await
    }

    // --- pantry commands ---

    pub async fn create_pantry(&self, name: &str) -> CoreResult<Pantry> {
        self.pantries.create(name).await
    }

    pub async fn join_pantry(&self, code: &str) -> CoreResult<Pantry> {
        self.pantries.join_by_code(code).await
    }

    pub fn switch_pantry(&self, pantry_id: &str) -> CoreResult<()> {
        self.pantries.switch(pantry_id)
    }

    pub async fn leave_pantry(&self, pantry_id: &str) -> CoreResult<()> {
        self.pantries.leave(pantry_id).await
    }

    pub async fn delete_pantry(&self, pantry_id: &str) -> CoreResult<()> {
        self.pantries.delete(pantry_id).await
    }

    pub async fn list_members(&self, pantry_id: &str) -> CoreResult<Vec<Member>> {
        self.pantries.list_members(pantry_id).await
    }

    pub async fn remove_member(&self, pantry_id: &str, user_id: &str) -> CoreResult<()> {
        self.pantries.remove_member(pantry_id, user_id).await
    }

    /// Delete every pantry the caller owns (cascading to their items and
    /// memberships), the caller's remaining memberships and profile row,
    /// then sign out. Each cleanup step is best effort; the sign-out
    /// always happens.
    pub async fn delete_account(&self) -> CoreResult<()> {
        let snapshot = self.state.snapshot();
        let Some(identity) = snapshot.identity else {
            return Err(CoreError::NotAuthenticated);
        };

        match self.store.pantries_owned_by(&identity.id).await {
            Ok(owned) => {
                for pantry in owned {
                    if let Err(e) = self.store.delete_pantry(&pantry.id, &identity.id).await {
                        warn!("failed to delete owned pantry {}: {}", pantry.id, e);
                    }
                }
            }
            Err(e) => warn!("failed to list owned pantries: {}", e),
        }
        if let Err(e) = self.store.delete_memberships_for(&identity.id).await {
            warn!("failed to delete memberships: {}", e);
        }
        if let Err(e) = self.store.delete_profile(&identity.id).await {
            warn!("failed to delete profile: {}", e);
        }

        self.logout().await;
        Ok(())
    }
}
