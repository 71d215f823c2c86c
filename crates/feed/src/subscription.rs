use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::FeedError;
use crate::message::RowChange;

pub(crate) type ChannelMap = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<RowChange>>>>;
pub(crate) type SocketHandle = Arc<RwLock<Option<mpsc::Sender<Message>>>>;

/// Equality predicate scoping a subscription, e.g. `pantry_id = <id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub column: String,
    pub value: String,
}

impl FeedFilter {
    pub fn eq(column: &str, value: &str) -> Self {
        Self { column: column.to_string(), value: value.to_string() }
    }

    pub(crate) fn to_param(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }
}

/// A source of row-change subscriptions.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Install or clear the access token used when (re)connecting.
    async fn set_auth(&self, token: Option<String>);

    /// Open a subscription for one table, scoped by an equality filter.
    async fn subscribe(
        &self,
        table: &str,
        filter: FeedFilter,
    ) -> Result<FeedSubscription, FeedError>;
}

struct LiveGuard {
    channels: ChannelMap,
    socket: SocketHandle,
}

/// Owns the unsubscribe for one subscription. Dropping it removes the
/// topic's local routing entry and asks the server to leave the channel,
/// so teardown happens on every exit path.
pub struct SubscriptionGuard {
    topic: String,
    live: Option<LiveGuard>,
}

impl SubscriptionGuard {
    pub(crate) fn live(topic: String, channels: ChannelMap, socket: SocketHandle) -> Self {
        Self { topic, live: Some(LiveGuard { channels, socket }) }
    }

    /// A guard with nothing to release. In-process feeds (tests) use this.
    pub fn detached(topic: &str) -> Self {
        Self { topic: topic.to_string(), live: None }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Some(live) = self.live.take() else { return };

        if let Ok(mut channels) = live.channels.write() {
            channels.remove(&self.topic);
        }

        let socket = live.socket.read().ok().and_then(|guard| guard.clone());
        if let Some(socket_tx) = socket {
            let leave = serde_json::json!({
                "topic": self.topic,
                "event": "phx_leave",
                "payload": {},
                "ref": serde_json::Value::Null,
            });
            // The writer task may already be gone; that also unsubscribes.
            let _ = socket_tx.try_send(Message::Text(leave.to_string()));
        }
        debug!("left feed topic {}", self.topic);
    }
}

/// An active subscription: a stream of row changes plus the guard that
/// releases it.
pub struct FeedSubscription {
    events: mpsc::UnboundedReceiver<RowChange>,
    _guard: SubscriptionGuard,
}

impl FeedSubscription {
    pub fn new(events: mpsc::UnboundedReceiver<RowChange>, guard: SubscriptionGuard) -> Self {
        Self { events, _guard: guard }
    }

    /// Next change, or `None` once the feed side is gone.
    pub async fn next(&mut self) -> Option<RowChange> {
        self.events.recv().await
    }
}
