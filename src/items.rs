//! Item synchronization engine for the active pantry.
//!
//! Per active pantry the engine loads the full item set, subscribes to its
//! change feed, and mediates every local mutation through one rule:
//! optimistic local apply, remote call, rollback to the exact prior
//! snapshot on failure, id-keyed no-op merge on the remote echo.
//!
//! Switching pantries bumps an epoch and aborts the previous load/pump
//! task; anything still in flight for the old pantry checks its captured
//! epoch before touching state, so a slow fetch or a stale subscription
//! can never corrupt the new pantry's list.

use chrono::Utc;
use log::{debug, error, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use pantry_sync_classifier::{Classifier, PENDING_ICON};
use pantry_sync_feed::{ChangeFeed, ChangeKind, FeedFilter, RowChange};
use pantry_sync_store::{
    map_item, Category, GroceryItem, ItemPatch, ItemRow, NewItemRow, RemoteStore,
};

use crate::error::{CoreError, CoreResult};
use crate::state::{StateContainer, StateEvent};

/// Input for adding an item. Category and icon are assigned by the
/// classifier after the optimistic apply.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub name: String,
    pub qty_value: Option<String>,
    pub qty_unit: Option<String>,
    pub notes: Option<String>,
}

pub struct ItemSyncEngine {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    classifier: Arc<dyn Classifier>,
    state: Arc<StateContainer>,
    epoch: Arc<AtomicU64>,
    active: Mutex<Option<String>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ItemSyncEngine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        classifier: Arc<dyn Classifier>,
        state: Arc<StateContainer>,
    ) -> Self {
        Self {
            store,
            feed,
            classifier,
            state,
            epoch: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// Point the engine at `target`. A no-op when already there; otherwise
    /// the previous pantry's load/pump is superseded and, for a remote
    /// pantry, a fresh load + subscription starts in the background.
    pub fn ensure_active(&self, target: Option<String>) {
        {
            let mut active = self.active.lock().unwrap();
            if *active == target {
                return;
            }
            *active = target.clone();
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.pump.lock().unwrap().take() {
            previous.abort();
        }

        let Some(pantry_id) = target else {
            debug!("item engine idle");
            return;
        };
        if pantry_id == crate::offline::GUEST_PANTRY_ID {
            // Guest items never come from the remote store.
            return;
        }

        debug!("item engine loading pantry {}", pantry_id);
        let store = self.store.clone();
        let feed = self.feed.clone();
        let state = self.state.clone();
        let shared_epoch = self.epoch.clone();
        let handle = tokio::spawn(async move {
            Self::run(store, feed, state, shared_epoch, pantry_id, epoch).await;
        });
        *self.pump.lock().unwrap() = Some(handle);
    }

    /// Load the pantry's items, then go live on its change feed. Every
    /// state application re-checks the captured epoch first.
    async fn run(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        state: Arc<StateContainer>,
        shared_epoch: Arc<AtomicU64>,
        pantry_id: String,
        epoch: u64,
    ) {
        let live = || shared_epoch.load(Ordering::SeqCst) == epoch;

        match store.items_for(&pantry_id).await {
            Ok(rows) => {
                if !live() {
                    debug!("discarding superseded item fetch for {}", pantry_id);
                    return;
                }
                match rows.into_iter().map(map_item).collect::<Result<Vec<_>, _>>() {
                    Ok(items) => {
                        state.apply(StateEvent::ItemsLoaded(items));
                    }
                    Err(e) => error!("item fetch for {} returned bad rows: {}", pantry_id, e),
                }
            }
            // Prior state stays untouched: stale but consistent.
            Err(e) => warn!("item fetch for {} failed: {}", pantry_id, e),
        }

        if !live() {
            return;
        }
        let mut subscription = match feed
            .subscribe("grocery_items", FeedFilter::eq("pantry_id", &pantry_id))
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("item feed subscription for {} failed: {}", pantry_id, e);
                return;
            }
        };

        while let Some(change) = subscription.next().await {
            if !live() {
                debug!("ignoring stale feed event for {}", pantry_id);
                break;
            }
            Self::apply_change(&state, change);
        }
    }

    fn apply_change(state: &StateContainer, change: RowChange) {
        match change.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = match serde_json::from_value::<ItemRow>(change.row) {
                    Ok(row) => row,
                    Err(e) => {
                        error!("dropping malformed feed row: {}", e);
                        return;
                    }
                };
                match map_item(row) {
                    Ok(item) => {
                        let event = match change.kind {
                            ChangeKind::Insert => StateEvent::RemoteItemInserted(item),
                            _ => StateEvent::RemoteItemUpdated(item),
                        };
                        state.apply(event);
                    }
                    Err(e) => error!("dropping undecodable feed row: {}", e),
                }
            }
            ChangeKind::Delete => {
                match change.row.get("id").and_then(|v| v.as_str()) {
                    Some(id) => {
                        state.apply(StateEvent::RemoteItemDeleted(id.to_string()));
                    }
                    None => error!("delete feed event without id"),
                }
            }
        }
    }

    /// Optimistically prepend, insert remotely, then classify. The item is
    /// visible before network confirmation and never survives a failed
    /// insert.
    pub async fn add(&self, new_item: NewItem) -> CoreResult<GroceryItem> {
        let name = new_item.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("item name is required".to_string()));
        }

        let snapshot = self.state.snapshot();
        let Some(pantry_id) = snapshot.active_pantry_id.clone() else {
            return Err(CoreError::Validation("no active pantry".to_string()));
        };

        let Some(identity) = snapshot.identity.clone() else {
            return self.add_guest(pantry_id, name, new_item).await;
        };

        let temp_id = format!("temp-{}", Uuid::new_v4());
        let optimistic = GroceryItem {
            id: temp_id.clone(),
            pantry_id: pantry_id.clone(),
            name: name.clone(),
            qty_value: new_item.qty_value.clone(),
            qty_unit: new_item.qty_unit.clone(),
            notes: new_item.notes.clone(),
            category: Category::Other,
            icon: PENDING_ICON.to_string(),
            is_bought: false,
            added_by: identity.id.clone(),
            created_at: Utc::now(),
        };
        self.state.apply(StateEvent::ItemPrepended(optimistic));

        let row = NewItemRow {
            pantry_id,
            user_id: identity.id,
            name,
            category: Category::Other,
            icon: PENDING_ICON.to_string(),
            qty_value: new_item.qty_value,
            qty_unit: new_item.qty_unit,
            is_bought: false,
            notes: new_item.notes,
        };

        let confirmed = match self.store.insert_item(&row).await.and_then(map_item) {
            Ok(item) => item,
            Err(e) => {
                // The phantom entry must not outlive the failure.
                self.state.apply(StateEvent::ItemRemoved(temp_id));
                return Err(e.into());
            }
        };
        self.state.apply(StateEvent::ItemConfirmed {
            temp_id,
            item: confirmed.clone(),
        });

        self.classify_and_patch(&confirmed.id, &confirmed.name).await;
        let latest = self.state.snapshot();
        Ok(latest.item(&confirmed.id).cloned().unwrap_or(confirmed))
    }

    async fn add_guest(
        &self,
        pantry_id: String,
        name: String,
        new_item: NewItem,
    ) -> CoreResult<GroceryItem> {
        let item = GroceryItem {
            id: format!("local-{}", Uuid::new_v4()),
            pantry_id,
            name,
            qty_value: new_item.qty_value,
            qty_unit: new_item.qty_unit,
            notes: new_item.notes,
            category: Category::Other,
            icon: PENDING_ICON.to_string(),
            is_bought: false,
            added_by: crate::offline::GUEST_USER_ID.to_string(),
            created_at: Utc::now(),
        };
        self.state.apply(StateEvent::ItemPrepended(item.clone()));
        self.classify_and_patch(&item.id, &item.name).await;
        let latest = self.state.snapshot();
        Ok(latest.item(&item.id).cloned().unwrap_or(item))
    }

    /// Follow-up categorization. The add has already succeeded, so a
    /// failure here is logged, not surfaced.
    async fn classify_and_patch(&self, item_id: &str, item_name: &str) {
        let classification = self.classifier.classify(item_name).await;
        let patch = ItemPatch {
            category: Some(classification.category),
            icon: Some(classification.icon),
            ..Default::default()
        };
        if let Err(e) = self.update(item_id, patch).await {
            warn!("categorization update for {} failed: {}", item_id, e);
        }
    }

    /// Flip `is_bought`, remotely updating only that field.
    pub async fn toggle(&self, id: &str) -> CoreResult<()> {
        let snapshot = self.state.snapshot();
        let Some(prior) = snapshot.item(id).cloned() else {
            return Err(CoreError::NotFound(format!("item {}", id)));
        };

        let patch = ItemPatch {
            is_bought: Some(!prior.is_bought),
            ..Default::default()
        };
        self.state.apply(StateEvent::ItemPatched { id: id.to_string(), patch: patch.clone() });

        if snapshot.identity.is_none() {
            return Ok(());
        }
        if let Err(e) = self.store.update_item(id, &patch).await {
            // Restore the exact prior record, not a re-derived flip.
            self.state.apply(StateEvent::ItemRestored(prior));
            return Err(e.into());
        }
        Ok(())
    }

    /// Merge fields locally, send only the changed fields remotely.
    pub async fn update(&self, id: &str, patch: ItemPatch) -> CoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let snapshot = self.state.snapshot();
        let Some(prior) = snapshot.item(id).cloned() else {
            return Err(CoreError::NotFound(format!("item {}", id)));
        };

        self.state.apply(StateEvent::ItemPatched { id: id.to_string(), patch: patch.clone() });

        if snapshot.identity.is_none() {
            return Ok(());
        }
        if let Err(e) = self.store.update_item(id, &patch).await {
            self.state.apply(StateEvent::ItemRestored(prior));
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove locally, delete remotely, re-insert at the head on failure.
    pub async fn remove(&self, id: &str) -> CoreResult<()> {
        let snapshot = self.state.snapshot();
        let Some(prior) = snapshot.item(id).cloned() else {
            return Err(CoreError::NotFound(format!("item {}", id)));
        };

        self.state.apply(StateEvent::ItemRemoved(id.to_string()));

        if snapshot.identity.is_none() {
            return Ok(());
        }
        if let Err(e) = self.store.delete_item(id).await {
            self.state.apply(StateEvent::ItemPrepended(prior));
            return Err(e.into());
        }
        Ok(())
    }

    /// Bulk delete of bought items in the active pantry. Signed in, the
    /// local list is reconciled by the feed's delete events; guest mode
    /// filters locally.
    pub async fn clear_bought(&self) -> CoreResult<()> {
        let snapshot = self.state.snapshot();
        let Some(pantry_id) = snapshot.active_pantry_id.clone() else {
            return Err(CoreError::Validation("no active pantry".to_string()));
        };

        if snapshot.identity.is_none() {
            self.state.apply(StateEvent::BoughtCleared);
            return Ok(());
        }
        self.store.delete_bought(&pantry_id).await?;
        Ok(())
    }
}
