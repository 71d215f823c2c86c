//! Client-side synchronization core for the SharedPantry shared grocery
//! list.
//!
//! Multiple users belonging to one or more pantries add, edit, toggle, and
//! remove grocery items; changes propagate to every member in near-real
//! time. This crate is the reconciliation engine behind that: an
//! optimistic, event-driven core that keeps one local state tree
//! consistent with the remote multi-tenant store while tolerating latency,
//! partial failures, and concurrent remote edits delivered out of band.
//!
//! The service boundaries live in their own crates and are injected as
//! trait handles:
//!
//! - [`pantry_sync_identity`]: sign in/up/out, session restore, session
//!   change events
//! - [`pantry_sync_store`]: typed rows and CRUD over the relational store
//! - [`pantry_sync_feed`]: change-notification subscriptions
//! - [`pantry_sync_classifier`]: item name to category and icon
//!
//! [`PantryClient`] wires them together and exposes the command set and a
//! read-only snapshot stream. Every mutation follows one rule: optimistic
//! local apply, remote call, rollback to the exact prior snapshot on
//! failure, id-keyed no-op merge on the remote echo.

mod client;
mod config;
mod error;
mod items;
mod membership;
mod offline;
mod pantry;
mod session;
mod state;

pub use client::PantryClient;
pub use config::{PantryConfig, DEFAULT_RESTORE_TIMEOUT};
pub use error::{ConflictKind, CoreError, CoreResult};
pub use items::{ItemSyncEngine, NewItem};
pub use membership::{MembershipResolver, DEFAULT_PANTRY_NAME};
pub use offline::{guest_baseline, GuestCache, GUEST_PANTRY_ID, STORAGE_KEY};
pub use pantry::PantryLifecycle;
pub use session::SessionManager;
pub use state::{reduce, Identity, ReconciliationState, StateContainer, StateEvent};

// Re-export the boundary vocabulary so consumers can stay on one crate.
pub use pantry_sync_classifier::{
    Classification, Classifier, FallbackClassifier, RemoteClassifier, FALLBACK_ICON, PENDING_ICON,
};
pub use pantry_sync_feed::{ChangeFeed, ChangeKind, FeedClient, FeedFilter, FeedSubscription, RowChange, SubscriptionGuard};
pub use pantry_sync_identity::{
    IdentityClient, IdentityError, IdentityService, Session, SessionEvent, SessionEventKind, User,
};
pub use pantry_sync_store::{
    Category, GroceryItem, ItemPatch, Member, Pantry, RemoteStore, RestStore, Role, StoreError,
};
