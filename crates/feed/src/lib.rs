//! Change-notification feed boundary for the SharedPantry sync core.
//!
//! Exposes the [`ChangeFeed`] trait: subscribe to insert/update/delete
//! notifications for one table, filtered by an equality predicate, and get
//! back a [`FeedSubscription`] whose handle owns the unsubscribe. Dropping
//! the handle tears the subscription down on every exit path, which is what
//! lets the sync core abandon a stale pantry's feed deterministically.
//!
//! [`FeedClient`] is the production implementation speaking the
//! Phoenix-style websocket protocol under `/realtime/v1/websocket`.

mod client;
mod error;
mod message;
mod subscription;

pub use client::{ConnectionState, FeedClient, FeedClientOptions};
pub use error::FeedError;
pub use message::{ChangeKind, FeedMessage, RowChange, WireEvent};
pub use subscription::{ChangeFeed, FeedFilter, FeedSubscription, SubscriptionGuard};
