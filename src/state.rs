//! The reconciliation state tree and its pure reducer.
//!
//! Every mutation in the core is expressed as a [`StateEvent`] and applied
//! through [`StateContainer::apply`], which runs the pure [`reduce`]
//! function under one lock and publishes the new snapshot on a watch
//! channel. Collections are rebuilt, never mutated in place.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::watch;

use pantry_sync_store::{GroceryItem, ItemPatch, Member, Pantry, Role};

use crate::offline;

/// The signed-in user as the core tracks it. `role` is a convenience
/// default for display before memberships resolve; the authoritative role
/// is per-pantry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

/// The single state tree consumed by presentation.
///
/// Invariants: `items` and `members` only ever belong to the pantry named
/// by `active_pantry_id`, and a non-null `active_pantry_id` always
/// references an entry of `pantries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationState {
    pub identity: Option<Identity>,
    pub pantries: Vec<Pantry>,
    pub active_pantry_id: Option<String>,
    pub items: Vec<GroceryItem>,
    pub members: Vec<Member>,
    pub initialized: bool,
}

impl ReconciliationState {
    pub fn initial() -> Self {
        Self {
            identity: None,
            pantries: Vec::new(),
            active_pantry_id: None,
            items: Vec::new(),
            members: Vec::new(),
            initialized: false,
        }
    }

    pub fn active_pantry(&self) -> Option<&Pantry> {
        let active = self.active_pantry_id.as_deref()?;
        self.pantries.iter().find(|p| p.id == active)
    }

    pub fn item(&self, id: &str) -> Option<&GroceryItem> {
        self.items.iter().find(|i| i.id == id)
    }
}

/// Everything that can happen to the state tree.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// Startup finished without a session; the tree is usable as-is.
    Initialized,
    /// Replace the whole tree (guest snapshot load).
    Replaced(ReconciliationState),
    IdentityChanged(Option<Identity>),
    /// A fresh membership resolution. `desired_active` is kept when still
    /// present, otherwise the first remaining pantry (or none) takes over.
    PantriesResolved {
        pantries: Vec<Pantry>,
        desired_active: Option<String>,
    },
    /// Explicit switch to a pantry known to be present.
    ActivePantrySwitched(String),
    ItemsLoaded(Vec<GroceryItem>),
    /// Optimistic add or rollback of a remove: insert at the head.
    ItemPrepended(GroceryItem),
    /// Remote confirmation of an optimistic add.
    ItemConfirmed { temp_id: String, item: GroceryItem },
    /// Optimistic partial update.
    ItemPatched { id: String, patch: ItemPatch },
    /// Rollback of a failed update: restore the exact prior record.
    ItemRestored(GroceryItem),
    ItemRemoved(String),
    /// Feed events, id-keyed and idempotent.
    RemoteItemInserted(GroceryItem),
    RemoteItemUpdated(GroceryItem),
    RemoteItemDeleted(String),
    /// Local clear of bought items (guest mode only; signed-in clears are
    /// reconciled through the feed).
    BoughtCleared,
    MembersLoaded(Vec<Member>),
    SignedOut,
}

/// Pure transition function: `(prior state, event) -> next state`.
pub fn reduce(state: &ReconciliationState, event: StateEvent) -> ReconciliationState {
    let mut next = state.clone();
    match event {
        StateEvent::Initialized => {
            next.initialized = true;
        }
        StateEvent::Replaced(mut replacement) => {
            replacement.initialized = true;
            next = replacement;
        }
        StateEvent::IdentityChanged(identity) => {
            next.identity = identity;
        }
        StateEvent::PantriesResolved { pantries, desired_active } => {
            let active = desired_active
                .filter(|id| pantries.iter().any(|p| &p.id == id))
                .or_else(|| pantries.first().map(|p| p.id.clone()));
            if active != next.active_pantry_id {
                next.items = Vec::new();
                next.members = Vec::new();
            }
            next.pantries = pantries;
            next.active_pantry_id = active;
            next.initialized = true;
        }
        StateEvent::ActivePantrySwitched(id) => {
            if next.active_pantry_id.as_deref() != Some(id.as_str()) {
                next.active_pantry_id = Some(id);
                next.items = Vec::new();
                next.members = Vec::new();
            }
        }
        StateEvent::ItemsLoaded(items) => {
            next.items = items;
        }
        StateEvent::ItemPrepended(item) => {
            if !next.items.iter().any(|i| i.id == item.id) {
                let mut items = Vec::with_capacity(next.items.len() + 1);
                items.push(item);
                items.extend(next.items.iter().cloned());
                next.items = items;
            }
        }
        StateEvent::ItemConfirmed { temp_id, item } => {
            if next.items.iter().any(|i| i.id == item.id) {
                // The feed echo won the race; the optimistic entry just goes.
                next.items = next.items.iter().filter(|i| i.id != temp_id).cloned().collect();
            } else {
                next.items = next
                    .items
                    .iter()
                    .map(|i| if i.id == temp_id { item.clone() } else { i.clone() })
                    .collect();
            }
        }
        StateEvent::ItemPatched { id, patch } => {
            next.items = next
                .items
                .iter()
                .map(|i| {
                    if i.id == id {
                        let mut patched = i.clone();
                        patch.apply_to(&mut patched);
                        patched
                    } else {
                        i.clone()
                    }
                })
                .collect();
        }
        StateEvent::ItemRestored(item) => {
            next.items = next
                .items
                .iter()
                .map(|i| if i.id == item.id { item.clone() } else { i.clone() })
                .collect();
        }
        StateEvent::ItemRemoved(id) | StateEvent::RemoteItemDeleted(id) => {
            next.items = next.items.iter().filter(|i| i.id != id).cloned().collect();
        }
        StateEvent::RemoteItemInserted(item) => {
            if !next.items.iter().any(|i| i.id == item.id) {
                let mut items = Vec::with_capacity(next.items.len() + 1);
                items.push(item);
                items.extend(next.items.iter().cloned());
                next.items = items;
            }
        }
        StateEvent::RemoteItemUpdated(item) => {
            next.items = next
                .items
                .iter()
                .map(|i| if i.id == item.id { item.clone() } else { i.clone() })
                .collect();
        }
        StateEvent::BoughtCleared => {
            next.items = next.items.iter().filter(|i| !i.is_bought).cloned().collect();
        }
        StateEvent::MembersLoaded(members) => {
            next.members = members;
        }
        StateEvent::SignedOut => {
            next = offline::guest_baseline();
        }
    }
    next
}

/// Holds the state tree and publishes every change.
pub struct StateContainer {
    inner: RwLock<ReconciliationState>,
    watch_tx: watch::Sender<ReconciliationState>,
}

impl StateContainer {
    pub fn new(initial: ReconciliationState) -> Self {
        let (watch_tx, _) = watch::channel(initial.clone());
        Self { inner: RwLock::new(initial), watch_tx }
    }

    pub fn snapshot(&self) -> ReconciliationState {
        self.inner.read().unwrap().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ReconciliationState> {
        self.watch_tx.subscribe()
    }

    /// Apply one event and return the resulting snapshot.
    pub fn apply(&self, event: StateEvent) -> ReconciliationState {
        let mut guard = self.inner.write().unwrap();
        let next = reduce(&guard, event);
        *guard = next.clone();
        let _ = self.watch_tx.send(next.clone());
        next
    }
}
