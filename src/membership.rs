//! Membership resolution: which pantries the signed-in user belongs to,
//! kept live through the membership change feed.

use log::{debug, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use pantry_sync_feed::{ChangeFeed, FeedFilter};
use pantry_sync_store::{map_membership, Pantry, RemoteStore, Role};

use crate::error::CoreResult;
use crate::items::ItemSyncEngine;
use crate::state::{StateContainer, StateEvent};

/// Name of the pantry provisioned for an identity with no memberships.
pub const DEFAULT_PANTRY_NAME: &str = "My Pantry";

pub struct MembershipResolver {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    state: Arc<StateContainer>,
    items: Arc<ItemSyncEngine>,
    epoch: Arc<AtomicU64>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MembershipResolver {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        state: Arc<StateContainer>,
        items: Arc<ItemSyncEngine>,
    ) -> Self {
        Self {
            store,
            feed,
            state,
            items,
            epoch: Arc::new(AtomicU64::new(0)),
            pump: Mutex::new(None),
        }
    }

    /// Resolve the ordered pantry list for `user_id`, provisioning the
    /// default pantry when the user has none. Owned spaces surface before
    /// joined ones.
    pub async fn resolve(&self, user_id: &str) -> CoreResult<Vec<Pantry>> {
        Self::resolve_with(&self.store, user_id).await
    }

    async fn resolve_with(
        store: &Arc<dyn RemoteStore>,
        user_id: &str,
    ) -> CoreResult<Vec<Pantry>> {
        let rows = store.memberships_for(user_id).await?;
        // Dangling rows (pantry already deleted) map to None and drop out.
        let mut pantries: Vec<Pantry> = rows.into_iter().filter_map(map_membership).collect();

        let mut seen = HashSet::new();
        pantries.retain(|p| seen.insert(p.id.clone()));

        pantries.sort_by(|a, b| {
            let a_admin = a.viewer_role == Role::Administrator;
            let b_admin = b.viewer_role == Role::Administrator;
            b_admin
                .cmp(&a_admin)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        if pantries.is_empty() {
            debug!("no memberships for {}, provisioning {:?}", user_id, DEFAULT_PANTRY_NAME);
            let row = store.insert_pantry(DEFAULT_PANTRY_NAME, user_id).await?;
            store
                .insert_membership(&row.id, user_id, Role::Administrator)
                .await?;
            pantries.push(Pantry {
                id: row.id,
                name: row.name,
                invite_code: row.invite_code,
                owner_id: row.created_by,
                viewer_role: Role::Administrator,
            });
        }

        Ok(pantries)
    }

    /// Initial resolution for a freshly signed-in identity: apply the list,
    /// point the item engine at the resulting active pantry, and open the
    /// live membership subscription.
    pub async fn on_identity(&self, user_id: &str) -> CoreResult<()> {
        let pantries = self.resolve(user_id).await?;
        let desired = self.state.snapshot().active_pantry_id;
        let next = self.state.apply(StateEvent::PantriesResolved {
            pantries,
            desired_active: desired,
        });
        self.items.ensure_active(next.active_pantry_id);

        self.subscribe(user_id).await;
        Ok(())
    }

    /// Keep the pantry list live: any membership change re-resolves and
    /// replaces it, reassigning the active pantry when it disappeared.
    async fn subscribe(&self, user_id: &str) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.pump.lock().unwrap().take() {
            previous.abort();
        }

        let subscription = match self
            .feed
            .subscribe("pantry_members", FeedFilter::eq("user_id", user_id))
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                // Membership stays as resolved; it just will not track
                // remote changes until the next sign-in.
                warn!("membership feed subscription failed: {}", e);
                return;
            }
        };

        let store = self.store.clone();
        let state = self.state.clone();
        let items = self.items.clone();
        let shared_epoch = self.epoch.clone();
        let user_id = user_id.to_string();
        let mut subscription = subscription;
        let handle = tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                if shared_epoch.load(Ordering::SeqCst) != epoch {
                    break;
                }
                debug!("membership change for {}: {:?}", user_id, change.kind);
                match Self::resolve_with(&store, &user_id).await {
                    Ok(pantries) => {
                        if shared_epoch.load(Ordering::SeqCst) != epoch {
                            break;
                        }
                        let desired = state.snapshot().active_pantry_id;
                        let next = state.apply(StateEvent::PantriesResolved {
                            pantries,
                            desired_active: desired,
                        });
                        items.ensure_active(next.active_pantry_id);
                    }
                    Err(e) => warn!("membership re-resolution failed: {}", e),
                }
            }
        });
        *self.pump.lock().unwrap() = Some(handle);
    }

    /// Tear down the live subscription (sign-out).
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.pump.lock().unwrap().take() {
            previous.abort();
        }
    }
}
