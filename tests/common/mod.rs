//! In-memory fakes of the service boundaries, with failure injection and
//! gateable latency, plus a harness wiring them into a `PantryClient`.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use pantry_sync::{
    ChangeFeed, Classifier, FallbackClassifier, FeedFilter, FeedSubscription, IdentityError,
    IdentityService, ItemPatch, PantryClient, PantryConfig, ReconciliationState, RemoteStore,
    RowChange, Session, SessionEvent, SessionEventKind, StoreError, SubscriptionGuard, User,
};
use pantry_sync_feed::FeedError;
use pantry_sync_store::{ItemRow, MemberRow, MembershipJoinRow, NewItemRow, PantryRow, ProfileRow, Role};

pub fn session_for(user_id: &str, name: &str, email: &str) -> Session {
    Session {
        access_token: format!("token-{}", user_id),
        refresh_token: format!("refresh-{}", user_id),
        expires_in: 3600,
        token_type: "bearer".to_string(),
        user: User {
            id: user_id.to_string(),
            email: Some(email.to_string()),
            user_metadata: serde_json::json!({ "full_name": name }),
        },
    }
}

// --- identity fake ---

pub struct FakeIdentity {
    accounts: Mutex<HashMap<String, (String, Session)>>,
    restorable: Mutex<Option<Session>>,
    restore_delay: Mutex<Option<Duration>>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            accounts: Mutex::new(HashMap::new()),
            restorable: Mutex::new(None),
            restore_delay: Mutex::new(None),
            current: Mutex::new(None),
            events,
        })
    }

    pub fn add_account(&self, email: &str, password: &str, session: Session) {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), session));
    }

    pub fn set_restorable(&self, session: Session) {
        *self.restorable.lock().unwrap() = Some(session);
    }

    pub fn delay_restore(&self, delay: Duration) {
        *self.restore_delay.lock().unwrap() = Some(delay);
    }

    /// Push a raw session event, as the provider would.
    pub fn emit(&self, kind: SessionEventKind, session: Option<Session>) {
        let _ = self.events.send(SessionEvent { kind, session });
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError> {
        let delay = *self.restore_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let restorable = self.restorable.lock().unwrap().clone();
        match restorable {
            Some(session) => {
                *self.current.lock().unwrap() = Some(session.clone());
                self.emit(SessionEventKind::InitialSession, Some(session.clone()));
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let account = self.accounts.lock().unwrap().get(email).cloned();
        match account {
            Some((stored_password, session)) if stored_password == password => {
                *self.current.lock().unwrap() = Some(session.clone());
                self.emit(SessionEventKind::SignedIn, Some(session.clone()));
                Ok(session)
            }
            _ => Err(IdentityError::InvalidCredentials),
        }
    }

    async fn sign_up(&self, _: &str, _: &str, _: &str) -> Result<(), IdentityError> {
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        *self.current.lock().unwrap() = None;
        self.emit(SessionEventKind::SignedOut, None);
        Ok(())
    }

    async fn request_password_reset(&self, _: &str) -> Result<(), IdentityError> {
        Ok(())
    }

    async fn update_password(&self, _: &str) -> Result<(), IdentityError> {
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.current.lock().unwrap().clone()
    }

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

// --- store fake ---

#[derive(Default)]
struct FakeStoreData {
    pantries: Vec<PantryRow>,
    memberships: Vec<(String, String, Role)>,
    items: Vec<ItemRow>,
    profiles: Vec<ProfileRow>,
    next_id: u64,
}

pub struct FakeStore {
    data: Mutex<FakeStoreData>,
    failures: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<String, watch::Sender<bool>>>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(FakeStoreData::default()),
            failures: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn seed_pantry(&self, id: &str, name: &str, code: &str, owner: &str) {
        let mut data = self.data.lock().unwrap();
        data.pantries.push(PantryRow {
            id: id.to_string(),
            name: name.to_string(),
            invite_code: code.to_string(),
            created_by: owner.to_string(),
        });
    }

    pub fn seed_membership(&self, pantry_id: &str, user_id: &str, role: Role) {
        self.data.lock().unwrap().memberships.push((
            pantry_id.to_string(),
            user_id.to_string(),
            role,
        ));
    }

    pub fn seed_item(&self, id: &str, pantry_id: &str, name: &str, bought: bool) {
        let mut data = self.data.lock().unwrap();
        let created_at = chrono::Utc::now().to_rfc3339();
        data.items.push(ItemRow {
            id: id.to_string(),
            pantry_id: pantry_id.to_string(),
            user_id: "seed".to_string(),
            name: name.to_string(),
            category: "Other".to_string(),
            icon: "🛒".to_string(),
            qty_value: None,
            qty_unit: None,
            is_bought: bought,
            notes: None,
            created_at,
        });
    }

    pub fn seed_profile(&self, user_id: &str, full_name: &str) {
        self.data.lock().unwrap().profiles.push(ProfileRow {
            id: user_id.to_string(),
            full_name: Some(full_name.to_string()),
        });
    }

    /// Make every call to `op` fail until `unfail`.
    pub fn fail(&self, op: &'static str) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn unfail(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// Park calls to `key` until `release(key)`. Keys are either an op
    /// name (`"insert_item"`) or op:argument (`"items_for:p1"`).
    pub fn gate(&self, key: &str) {
        let (tx, _rx) = watch::channel(false);
        self.gates.lock().unwrap().insert(key.to_string(), tx);
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(key) {
            let _ = gate.send(true);
        }
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(o, _)| *o == op).count()
    }

    pub fn calls_with(&self, op: &'static str, arg: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, a)| *o == op && a == arg)
            .count()
    }

    pub fn item_row(&self, id: &str) -> Option<ItemRow> {
        self.data.lock().unwrap().items.iter().find(|i| i.id == id).cloned()
    }

    pub fn membership_rows(&self) -> Vec<(String, String, Role)> {
        self.data.lock().unwrap().memberships.clone()
    }

    async fn enter(&self, op: &'static str, arg: &str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push((op, arg.to_string()));

        let gate = {
            let gates = self.gates.lock().unwrap();
            gates
                .get(&format!("{}:{}", op, arg))
                .or_else(|| gates.get(op))
                .map(|tx| tx.subscribe())
        };
        if let Some(mut gate) = gate {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }

        if self.failures.lock().unwrap().contains(op) {
            return Err(StoreError::Api {
                message: format!("injected failure in {}", op),
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        Ok(())
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut data = self.data.lock().unwrap();
        data.next_id += 1;
        format!("{}-{}", prefix, data.next_id)
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn set_auth(&self, _token: Option<String>) {}

    async fn memberships_for(&self, user_id: &str) -> Result<Vec<MembershipJoinRow>, StoreError> {
        self.enter("memberships_for", user_id).await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .memberships
            .iter()
            .filter(|(_, uid, _)| uid == user_id)
            .map(|(pid, _, role)| MembershipJoinRow {
                role: *role,
                pantry: data.pantries.iter().find(|p| &p.id == pid).cloned(),
            })
            .collect())
    }

    async fn insert_pantry(&self, name: &str, owner_id: &str) -> Result<PantryRow, StoreError> {
        self.enter("insert_pantry", name).await?;
        let id = self.fresh_id("pantry");
        let row = PantryRow {
            id: id.clone(),
            name: name.to_string(),
            invite_code: format!("CODE-{}", id),
            created_by: owner_id.to_string(),
        };
        self.data.lock().unwrap().pantries.push(row.clone());
        Ok(row)
    }

    async fn pantry_by_invite_code(&self, code: &str) -> Result<Option<PantryRow>, StoreError> {
        self.enter("pantry_by_invite_code", code).await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .pantries
            .iter()
            .find(|p| p.invite_code.to_lowercase() == code.to_lowercase())
            .cloned())
    }

    async fn pantries_owned_by(&self, user_id: &str) -> Result<Vec<PantryRow>, StoreError> {
        self.enter("pantries_owned_by", user_id).await?;
        let data = self.data.lock().unwrap();
        Ok(data.pantries.iter().filter(|p| p.created_by == user_id).cloned().collect())
    }

    async fn delete_pantry(&self, pantry_id: &str, owner_id: &str) -> Result<(), StoreError> {
        self.enter("delete_pantry", pantry_id).await?;
        let mut data = self.data.lock().unwrap();
        let existed = data
            .pantries
            .iter()
            .any(|p| p.id == pantry_id && p.created_by == owner_id);
        if existed {
            data.pantries.retain(|p| p.id != pantry_id);
            // The cascade the core relies on.
            data.memberships.retain(|(pid, _, _)| pid != pantry_id);
            data.items.retain(|i| i.pantry_id != pantry_id);
        }
        Ok(())
    }

    async fn insert_membership(
        &self,
        pantry_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        self.enter("insert_membership", pantry_id).await?;
        self.data.lock().unwrap().memberships.push((
            pantry_id.to_string(),
            user_id.to_string(),
            role,
        ));
        Ok(())
    }

    async fn membership_exists(&self, pantry_id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.enter("membership_exists", pantry_id).await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .memberships
            .iter()
            .any(|(pid, uid, _)| pid == pantry_id && uid == user_id))
    }

    async fn delete_membership(&self, pantry_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.enter("delete_membership", pantry_id).await?;
        self.data
            .lock()
            .unwrap()
            .memberships
            .retain(|(pid, uid, _)| !(pid == pantry_id && uid == user_id));
        Ok(())
    }

    async fn delete_memberships_for(&self, user_id: &str) -> Result<(), StoreError> {
        self.enter("delete_memberships_for", user_id).await?;
        self.data.lock().unwrap().memberships.retain(|(_, uid, _)| uid != user_id);
        Ok(())
    }

    async fn members_of(&self, pantry_id: &str) -> Result<Vec<MemberRow>, StoreError> {
        self.enter("members_of", pantry_id).await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .memberships
            .iter()
            .filter(|(pid, _, _)| pid == pantry_id)
            .map(|(_, uid, role)| MemberRow { user_id: uid.clone(), role: *role })
            .collect())
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>, StoreError> {
        self.enter("profiles_by_ids", &ids.join(",")).await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .profiles
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.enter("delete_profile", user_id).await?;
        self.data.lock().unwrap().profiles.retain(|p| p.id != user_id);
        Ok(())
    }

    async fn items_for(&self, pantry_id: &str) -> Result<Vec<ItemRow>, StoreError> {
        self.enter("items_for", pantry_id).await?;
        let data = self.data.lock().unwrap();
        let mut rows: Vec<ItemRow> = data
            .items
            .iter()
            .filter(|i| i.pantry_id == pantry_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| {
            std::cmp::Reverse(
                chrono::DateTime::parse_from_rfc3339(&row.created_at)
                    .map(|t| t.timestamp_nanos_opt().unwrap_or(0))
                    .unwrap_or(0),
            )
        });
        Ok(rows)
    }

    async fn insert_item(&self, row: &NewItemRow) -> Result<ItemRow, StoreError> {
        self.enter("insert_item", &row.name).await?;
        let stored = ItemRow {
            id: self.fresh_id("item"),
            pantry_id: row.pantry_id.clone(),
            user_id: row.user_id.clone(),
            name: row.name.clone(),
            category: row.category.as_str().to_string(),
            icon: row.icon.clone(),
            qty_value: row.qty_value.clone(),
            qty_unit: row.qty_unit.clone(),
            is_bought: row.is_bought,
            notes: row.notes.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.data.lock().unwrap().items.push(stored.clone());
        Ok(stored)
    }

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<(), StoreError> {
        self.enter("update_item", item_id).await?;
        let mut data = self.data.lock().unwrap();
        if let Some(row) = data.items.iter_mut().find(|i| i.id == item_id) {
            if let Some(name) = &patch.name {
                row.name = name.clone();
            }
            if let Some(category) = patch.category {
                row.category = category.as_str().to_string();
            }
            if let Some(icon) = &patch.icon {
                row.icon = icon.clone();
            }
            if let Some(qty_value) = &patch.qty_value {
                row.qty_value = Some(qty_value.clone());
            }
            if let Some(qty_unit) = &patch.qty_unit {
                row.qty_unit = Some(qty_unit.clone());
            }
            if let Some(notes) = &patch.notes {
                row.notes = Some(notes.clone());
            }
            if let Some(is_bought) = patch.is_bought {
                row.is_bought = is_bought;
            }
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError> {
        self.enter("delete_item", item_id).await?;
        self.data.lock().unwrap().items.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn delete_bought(&self, pantry_id: &str) -> Result<(), StoreError> {
        self.enter("delete_bought", pantry_id).await?;
        self.data
            .lock()
            .unwrap()
            .items
            .retain(|i| !(i.pantry_id == pantry_id && i.is_bought));
        Ok(())
    }
}

// --- feed fake ---

pub struct FakeFeed {
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<RowChange>>>,
    topics: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            topics: Mutex::new(Vec::new()),
        })
    }

    /// Deliver a change to the matching subscription. Returns false when
    /// nothing (or nothing alive) is subscribed, i.e. a torn-down receiver.
    pub fn push(&self, table: &str, value: &str, change: RowChange) -> bool {
        let topic = format!("{}:{}", table, value);
        let sender = self.subscribers.lock().unwrap().get(&topic).cloned();
        match sender {
            Some(tx) => tx.send(change).is_ok(),
            None => false,
        }
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn set_auth(&self, _token: Option<String>) {}

    async fn subscribe(
        &self,
        table: &str,
        filter: FeedFilter,
    ) -> Result<FeedSubscription, FeedError> {
        let topic = format!("{}:{}", table, filter.value);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(topic.clone(), tx);
        self.topics.lock().unwrap().push(topic.clone());
        Ok(FeedSubscription::new(rx, SubscriptionGuard::detached(&topic)))
    }
}

// --- harness ---

pub struct Harness {
    pub client: Arc<PantryClient>,
    pub identity: Arc<FakeIdentity>,
    pub store: Arc<FakeStore>,
    pub feed: Arc<FakeFeed>,
}

pub fn harness() -> Harness {
    harness_with_config(PantryConfig::new("http://localhost:54321", "test-anon").unwrap())
}

pub fn harness_with_config(config: PantryConfig) -> Harness {
    let identity = FakeIdentity::new();
    let store = FakeStore::new();
    let feed = FakeFeed::new();
    let classifier: Arc<dyn Classifier> = Arc::new(FallbackClassifier);
    let client = Arc::new(PantryClient::with_services(
        identity.clone(),
        store.clone(),
        feed.clone(),
        classifier,
        config,
    ));
    Harness { client, identity, store, feed }
}

/// Poll the snapshot until `predicate` holds or two seconds pass.
pub async fn wait_for<F>(client: &PantryClient, predicate: F) -> ReconciliationState
where
    F: Fn(&ReconciliationState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = client.snapshot();
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached; state: {:?}", snapshot);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Seed one signed-in user owning one pantry, start the client, and log
/// in, waiting for the item list of the active pantry to load.
pub async fn signed_in_harness() -> Harness {
    let h = harness();
    h.store.seed_pantry("p1", "Home", "AB12", "u1");
    h.store.seed_membership("p1", "u1", Role::Administrator);
    h.identity
        .add_account("ana@example.com", "secret", session_for("u1", "Ana", "ana@example.com"));

    h.client.start().await;
    h.client.login("ana@example.com", "secret").await.unwrap();
    wait_for(&h.client, |s| {
        s.identity.is_some() && s.active_pantry_id.as_deref() == Some("p1")
    })
    .await;
    // The item load for p1 has completed once its feed subscription exists.
    wait_for_subscription(&h, "grocery_items:p1").await;
    h
}

pub async fn wait_for_subscription(h: &Harness, topic: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if h.feed.subscribed_topics().iter().any(|t| t == topic) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("no subscription for {}; topics: {:?}", topic, h.feed.subscribed_topics());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
