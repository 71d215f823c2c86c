use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{ItemPatch, Role};
use crate::query::TableQuery;
use crate::rows::{ItemRow, MemberRow, MembershipJoinRow, NewItemRow, PantryRow, ProfileRow};

/// Every query and mutation the sync core issues against the relational
/// store. One implementation speaks HTTP; tests substitute in-memory fakes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Install or clear the access token used for row-level security.
    async fn set_auth(&self, token: Option<String>);

    async fn memberships_for(&self, user_id: &str) -> Result<Vec<MembershipJoinRow>, StoreError>;
    async fn insert_pantry(&self, name: &str, owner_id: &str) -> Result<PantryRow, StoreError>;
    async fn pantry_by_invite_code(&self, code: &str) -> Result<Option<PantryRow>, StoreError>;
    async fn pantries_owned_by(&self, user_id: &str) -> Result<Vec<PantryRow>, StoreError>;
    /// Owner-scoped delete; the store cascades to members and items.
    async fn delete_pantry(&self, pantry_id: &str, owner_id: &str) -> Result<(), StoreError>;

    async fn insert_membership(
        &self,
        pantry_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), StoreError>;
    async fn membership_exists(&self, pantry_id: &str, user_id: &str) -> Result<bool, StoreError>;
    async fn delete_membership(&self, pantry_id: &str, user_id: &str) -> Result<(), StoreError>;
    async fn delete_memberships_for(&self, user_id: &str) -> Result<(), StoreError>;
    async fn members_of(&self, pantry_id: &str) -> Result<Vec<MemberRow>, StoreError>;

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>, StoreError>;
    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError>;

    /// Full item set of a pantry, newest first.
    async fn items_for(&self, pantry_id: &str) -> Result<Vec<ItemRow>, StoreError>;
    async fn insert_item(&self, row: &NewItemRow) -> Result<ItemRow, StoreError>;
    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<(), StoreError>;
    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError>;
    async fn delete_bought(&self, pantry_id: &str) -> Result<(), StoreError>;
}

/// HTTP implementation of [`RemoteStore`] over the `/rest/v1/` surface.
pub struct RestStore {
    base_url: String,
    api_key: String,
    http_client: Client,
    access_token: RwLock<Option<String>>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client,
            access_token: RwLock::new(None),
        }
    }

    async fn table(&self, name: &str) -> Result<TableQuery, StoreError> {
        let query = TableQuery::new(&self.base_url, &self.api_key, name, self.http_client.clone());
        match self.access_token.read().await.as_deref() {
            Some(token) => query.with_auth(token),
            None => Ok(query),
        }
    }

    fn first_row<T: serde::de::DeserializeOwned>(
        mut rows: Vec<Value>,
        context: &'static str,
    ) -> Result<T, StoreError> {
        if rows.is_empty() {
            return Err(StoreError::EmptyResult(context));
        }
        let row = rows.remove(0);
        serde_json::from_value(row).map_err(StoreError::Json)
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn set_auth(&self, token: Option<String>) {
        debug!("store auth token {}", if token.is_some() { "set" } else { "cleared" });
        *self.access_token.write().await = token;
    }

    async fn memberships_for(&self, user_id: &str) -> Result<Vec<MembershipJoinRow>, StoreError> {
        self.table("pantry_members")
            .await?
            .select("role,pantry:pantries(*)")
            .eq("user_id", user_id)
            .execute::<MembershipJoinRow>()
            .await
    }

    async fn insert_pantry(&self, name: &str, owner_id: &str) -> Result<PantryRow, StoreError> {
        let rows = self
            .table("pantries")
            .await?
            .insert(&json!({ "name": name, "created_by": owner_id }))
            .await?;
        Self::first_row(rows, "pantries insert")
    }

    async fn pantry_by_invite_code(&self, code: &str) -> Result<Option<PantryRow>, StoreError> {
        let rows = self
            .table("pantries")
            .await?
            .select("id,name,invite_code,created_by")
            .ilike("invite_code", code)
            .limit(1)
            .execute::<PantryRow>()
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn pantries_owned_by(&self, user_id: &str) -> Result<Vec<PantryRow>, StoreError> {
        self.table("pantries")
            .await?
            .select("id,name,invite_code,created_by")
            .eq("created_by", user_id)
            .execute::<PantryRow>()
            .await
    }

    async fn delete_pantry(&self, pantry_id: &str, owner_id: &str) -> Result<(), StoreError> {
        self.table("pantries")
            .await?
            .eq("id", pantry_id)
            .eq("created_by", owner_id)
            .delete()
            .await
    }

    async fn insert_membership(
        &self,
        pantry_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        self.table("pantry_members")
            .await?
            .insert(&json!({
                "pantry_id": pantry_id,
                "user_id": user_id,
                "role": role,
            }))
            .await?;
        Ok(())
    }

    async fn membership_exists(&self, pantry_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let rows = self
            .table("pantry_members")
            .await?
            .select("role")
            .eq("pantry_id", pantry_id)
            .eq("user_id", user_id)
            .execute::<Value>()
            .await?;
        Ok(!rows.is_empty())
    }

    async fn delete_membership(&self, pantry_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.table("pantry_members")
            .await?
            .eq("pantry_id", pantry_id)
            .eq("user_id", user_id)
            .delete()
            .await
    }

    async fn delete_memberships_for(&self, user_id: &str) -> Result<(), StoreError> {
        self.table("pantry_members")
            .await?
            .eq("user_id", user_id)
            .delete()
            .await
    }

    async fn members_of(&self, pantry_id: &str) -> Result<Vec<MemberRow>, StoreError> {
        self.table("pantry_members")
            .await?
            .select("user_id,role")
            .eq("pantry_id", pantry_id)
            .execute::<MemberRow>()
            .await
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.table("profiles")
            .await?
            .select("id,full_name")
            .in_list("id", ids)
            .execute::<ProfileRow>()
            .await
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.table("profiles").await?.eq("id", user_id).delete().await
    }

    async fn items_for(&self, pantry_id: &str) -> Result<Vec<ItemRow>, StoreError> {
        self.table("grocery_items")
            .await?
            .select("*")
            .eq("pantry_id", pantry_id)
            .order_desc("created_at")
            .execute::<ItemRow>()
            .await
    }

    async fn insert_item(&self, row: &NewItemRow) -> Result<ItemRow, StoreError> {
        let rows = self.table("grocery_items").await?.insert(row).await?;
        Self::first_row(rows, "grocery_items insert")
    }

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.table("grocery_items")
            .await?
            .eq("id", item_id)
            .update(patch)
            .await
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError> {
        self.table("grocery_items").await?.eq("id", item_id).delete().await
    }

    async fn delete_bought(&self, pantry_id: &str) -> Result<(), StoreError> {
        self.table("grocery_items")
            .await?
            .eq("pantry_id", pantry_id)
            .eq("is_bought", "true")
            .delete()
            .await
    }
}
