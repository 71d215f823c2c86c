use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::FeedError;
use crate::message::{FeedMessage, RowChange, WireEvent};
use crate::subscription::{ChangeFeed, ChannelMap, FeedFilter, FeedSubscription, SocketHandle, SubscriptionGuard};

/// Connection state of the feed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for [`FeedClient`].
#[derive(Debug, Clone)]
pub struct FeedClientOptions {
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for FeedClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Websocket implementation of [`ChangeFeed`].
///
/// One socket carries all subscriptions; each subscription is a Phoenix
/// channel joined with a `postgres_changes` config and routed by topic to
/// its subscriber. The socket is established lazily on first subscribe.
pub struct FeedClient {
    url: String,
    key: String,
    options: FeedClientOptions,
    next_ref: AtomicU32,
    channels: ChannelMap,
    socket: SocketHandle,
    state: Arc<StdRwLock<ConnectionState>>,
    state_change: broadcast::Sender<ConnectionState>,
    access_token: RwLock<Option<String>>,
    connect_lock: Mutex<()>,
}

impl FeedClient {
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, FeedClientOptions::default())
    }

    pub fn new_with_options(url: &str, key: &str, options: FeedClientOptions) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            options,
            next_ref: AtomicU32::new(1),
            channels: Arc::new(StdRwLock::new(HashMap::new())),
            socket: Arc::new(StdRwLock::new(None)),
            state: Arc::new(StdRwLock::new(ConnectionState::Disconnected)),
            state_change,
            access_token: RwLock::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn set_state(
        state: &Arc<StdRwLock<ConnectionState>>,
        state_change: &broadcast::Sender<ConnectionState>,
        next: ConnectionState,
    ) {
        let mut current = state.write().unwrap();
        if *current != next {
            debug!("feed state {:?} -> {:?}", *current, next);
            *current = next;
            let _ = state_change.send(next);
        }
    }

    async fn websocket_url(&self) -> Result<Url, FeedError> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(FeedError::Connection(format!("unsupported URL scheme: {}", other)))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| FeedError::Connection("failed to set websocket scheme".to_string()))?;

        let token = self.access_token.read().await.clone();
        let mut ws_url = url.join("/realtime/v1/websocket")?;
        {
            let mut pairs = ws_url.query_pairs_mut();
            pairs.append_pair("apikey", &self.key);
            pairs.append_pair("vsn", "2.0.0");
            if let Some(token) = token.as_deref() {
                pairs.append_pair("token", token);
            }
        }
        Ok(ws_url)
    }

    /// Establish the socket and spawn the reader/writer tasks. Idempotent:
    /// concurrent callers share one attempt.
    pub async fn connect(&self) -> Result<(), FeedError> {
        let _permit = self.connect_lock.lock().await;
        if self.connection_state() == ConnectionState::Connected {
            return Ok(());
        }

        Self::set_state(&self.state, &self.state_change, ConnectionState::Connecting);

        let ws_url = self.websocket_url().await?;
        info!("connecting feed socket");

        let connect_result = timeout(self.options.connect_timeout, connect_async(ws_url.as_str())).await;
        let ws_stream = match connect_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                Self::set_state(&self.state, &self.state_change, ConnectionState::Disconnected);
                return Err(FeedError::Connection(format!("websocket connect failed: {}", e)));
            }
            Err(_) => {
                Self::set_state(&self.state, &self.state_change, ConnectionState::Disconnected);
                return Err(FeedError::Connection("websocket connect timed out".to_string()));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
        *self.socket.write().unwrap() = Some(socket_tx.clone());

        // Writer: drain the internal queue into the socket.
        let writer_socket = self.socket.clone();
        let writer_state = self.state.clone();
        let writer_state_change = self.state_change.clone();
        tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    error!("feed send failed, closing socket: {}", e);
                    *writer_socket.write().unwrap() = None;
                    Self::set_state(&writer_state, &writer_state_change, ConnectionState::Disconnected);
                    socket_rx.close();
                    break;
                }
            }
            debug!("feed writer task finished");
        });

        // Reader: route incoming changes by topic, keep the heartbeat going.
        let reader_channels = self.channels.clone();
        let reader_socket = self.socket.clone();
        let reader_state = self.state.clone();
        let reader_state_change = self.state_change.clone();
        let heartbeat_interval = self.options.heartbeat_interval;
        let heartbeat_tx = socket_tx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<FeedMessage>(&text) {
                                    Ok(message) => Self::route(&reader_channels, message),
                                    Err(e) => {
                                        warn!("unparseable feed message: {} ({})", e, text);
                                    }
                                }
                            }
                            Some(Ok(msg)) if msg.is_close() => {
                                debug!("feed socket closed by remote");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("feed read error: {}", e);
                                break;
                            }
                            None => {
                                debug!("feed stream ended");
                                break;
                            }
                        }
                    }

                    _ = sleep(heartbeat_interval) => {
                        let heartbeat = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": serde_json::Value::Null,
                        });
                        if heartbeat_tx.send(Message::Text(heartbeat.to_string())).await.is_err() {
                            warn!("feed heartbeat failed, assuming connection lost");
                            break;
                        }
                    }
                }
            }
            *reader_socket.write().unwrap() = None;
            Self::set_state(&reader_state, &reader_state_change, ConnectionState::Disconnected);
        });

        Self::set_state(&self.state, &self.state_change, ConnectionState::Connected);
        Ok(())
    }

    fn route(channels: &ChannelMap, message: FeedMessage) {
        match message.event {
            WireEvent::PostgresChanges => {
                let Some(change) = RowChange::from_payload(&message.payload) else {
                    warn!("change payload without row on topic {}", message.topic);
                    return;
                };
                let sender = channels.read().unwrap().get(&message.topic).cloned();
                match sender {
                    // A closed receiver means the subscription is being torn
                    // down; the guard will remove the entry.
                    Some(tx) => {
                        let _ = tx.send(change);
                    }
                    None => debug!("change for unsubscribed topic {}", message.topic),
                }
            }
            WireEvent::PhoenixReply => {
                debug!("join reply on topic {}", message.topic);
            }
            WireEvent::PhoenixError => {
                error!("channel error on topic {}: {:?}", message.topic, message.payload);
            }
            WireEvent::PhoenixClose => {
                debug!("channel closed on topic {}", message.topic);
            }
            other => {
                debug!("ignoring feed event {:?} on topic {}", other, message.topic);
            }
        }
    }

    /// Drop the socket. Outstanding subscriptions stop receiving events.
    pub fn disconnect(&self) {
        if let Some(socket_tx) = self.socket.write().unwrap().take() {
            drop(socket_tx);
            info!("feed socket closed");
        }
        Self::set_state(&self.state, &self.state_change, ConnectionState::Disconnected);
    }
}

#[async_trait]
impl ChangeFeed for FeedClient {
    async fn set_auth(&self, token: Option<String>) {
        debug!("feed auth token {}", if token.is_some() { "set" } else { "cleared" });
        *self.access_token.write().await = token;
    }

    async fn subscribe(
        &self,
        table: &str,
        filter: FeedFilter,
    ) -> Result<FeedSubscription, FeedError> {
        if self.connection_state() != ConnectionState::Connected {
            self.connect().await?;
        }

        let topic = format!("{}:{}", table, filter.value);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.write().unwrap().insert(topic.clone(), tx);

        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {
                "config": {
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": table,
                        "filter": filter.to_param(),
                    }]
                }
            },
            "ref": self.next_ref(),
        });

        let socket_tx = self.socket.read().unwrap().clone();
        let Some(socket_tx) = socket_tx else {
            self.channels.write().unwrap().remove(&topic);
            return Err(FeedError::Connection("feed socket unavailable".to_string()));
        };
        socket_tx
            .send(Message::Text(join.to_string()))
            .await
            .map_err(|e| FeedError::Channel(format!("failed to send join: {}", e)))?;

        debug!("joined feed topic {}", topic);
        Ok(FeedSubscription::new(
            rx,
            SubscriptionGuard::live(topic, self.channels.clone(), self.socket.clone()),
        ))
    }
}
