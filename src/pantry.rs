//! Pantry lifecycle: create, join by invite code, switch, leave, delete,
//! and member administration.

use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use pantry_sync_store::{Member, Pantry, RemoteStore, Role};

use crate::error::{ConflictKind, CoreError, CoreResult};
use crate::items::ItemSyncEngine;
use crate::membership::MembershipResolver;
use crate::state::{Identity, StateContainer, StateEvent};

pub struct PantryLifecycle {
    store: Arc<dyn RemoteStore>,
    state: Arc<StateContainer>,
    memberships: Arc<MembershipResolver>,
    items: Arc<ItemSyncEngine>,
}

impl PantryLifecycle {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        state: Arc<StateContainer>,
        memberships: Arc<MembershipResolver>,
        items: Arc<ItemSyncEngine>,
    ) -> Self {
        Self { store, state, memberships, items }
    }

    fn require_identity(&self) -> CoreResult<Identity> {
        self.state.snapshot().identity.ok_or(CoreError::NotAuthenticated)
    }

    /// Re-resolve memberships and apply them with `desired_active`,
    /// repointing the item engine at whatever ends up active.
    async fn refresh(&self, user_id: &str, desired_active: Option<String>) -> CoreResult<()> {
        let pantries = self.memberships.resolve(user_id).await?;
        let next = self.state.apply(StateEvent::PantriesResolved { pantries, desired_active });
        self.items.ensure_active(next.active_pantry_id);
        Ok(())
    }

    /// Create a pantry and switch to it. The duplicate-name check is a
    /// client-side guard over everything the caller can see, owned or
    /// joined; the store enforces no uniqueness.
    pub async fn create(&self, name: &str) -> CoreResult<Pantry> {
        let identity = self.require_identity()?;
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation("pantry name is required".to_string()));
        }
        let snapshot = self.state.snapshot();
        if snapshot
            .pantries
            .iter()
            .any(|p| p.name.to_lowercase() == trimmed.to_lowercase())
        {
            return Err(CoreError::Validation(format!(
                "you already have a pantry named \"{}\"",
                trimmed
            )));
        }

        let row = self.store.insert_pantry(trimmed, &identity.id).await?;
        self.store
            .insert_membership(&row.id, &identity.id, Role::Administrator)
            .await?;

        let created_id = row.id.clone();
        self.refresh(&identity.id, Some(created_id.clone())).await?;

        let latest = self.state.snapshot();
        Ok(latest
            .pantries
            .iter()
            .find(|p| p.id == created_id)
            .cloned()
            .unwrap_or(Pantry {
                id: row.id,
                name: row.name,
                invite_code: row.invite_code,
                owner_id: row.created_by,
                viewer_role: Role::Administrator,
            }))
    }

    /// Join a pantry by invite code (case-insensitive). Membership is
    /// checked locally for fast feedback, then re-verified remotely to
    /// close the race between check and insert.
    pub async fn join_by_code(&self, code: &str) -> CoreResult<Pantry> {
        let identity = self.require_identity()?;
        let code = code.trim();
        if code.is_empty() {
            return Err(CoreError::Validation("invite code is required".to_string()));
        }

        let Some(row) = self.store.pantry_by_invite_code(code).await? else {
            return Err(CoreError::NotFound(format!("no pantry for invite code \"{}\"", code)));
        };

        if row.created_by == identity.id {
            return Err(CoreError::Conflict(ConflictKind::AlreadyOwner));
        }
        let snapshot = self.state.snapshot();
        if snapshot.pantries.iter().any(|p| p.id == row.id) {
            return Err(CoreError::Conflict(ConflictKind::AlreadyMember));
        }
        if self.store.membership_exists(&row.id, &identity.id).await? {
            return Err(CoreError::Conflict(ConflictKind::AlreadyMember));
        }

        self.store
            .insert_membership(&row.id, &identity.id, Role::Member)
            .await?;

        let joined_id = row.id.clone();
        self.refresh(&identity.id, Some(joined_id.clone())).await?;

        let latest = self.state.snapshot();
        Ok(latest
            .pantries
            .iter()
            .find(|p| p.id == joined_id)
            .cloned()
            .unwrap_or(Pantry {
                id: row.id,
                name: row.name,
                invite_code: row.invite_code,
                owner_id: row.created_by,
                viewer_role: Role::Member,
            }))
    }

    /// Pure state transition to another visible pantry. Items and members
    /// are cleared synchronously, before any fetch for the new pantry can
    /// resolve.
    pub fn switch(&self, pantry_id: &str) -> CoreResult<()> {
        let snapshot = self.state.snapshot();
        if snapshot.active_pantry_id.as_deref() == Some(pantry_id) {
            return Ok(());
        }
        if !snapshot.pantries.iter().any(|p| p.id == pantry_id) {
            return Err(CoreError::NotFound(format!("pantry {}", pantry_id)));
        }
        let next = self.state.apply(StateEvent::ActivePantrySwitched(pantry_id.to_string()));
        self.items.ensure_active(next.active_pantry_id);
        Ok(())
    }

    /// Remove the caller's own membership. Any role may leave.
    pub async fn leave(&self, pantry_id: &str) -> CoreResult<()> {
        let identity = self.require_identity()?;
        self.store.delete_membership(pantry_id, &identity.id).await?;

        let desired = self.state.snapshot().active_pantry_id;
        self.refresh(&identity.id, desired).await
    }

    /// Owner-only delete; the store cascades to items and memberships.
    pub async fn delete(&self, pantry_id: &str) -> CoreResult<()> {
        let identity = self.require_identity()?;
        let snapshot = self.state.snapshot();
        let Some(pantry) = snapshot.pantries.iter().find(|p| p.id == pantry_id) else {
            return Err(CoreError::NotFound(format!("pantry {}", pantry_id)));
        };
        if pantry.owner_id != identity.id {
            return Err(CoreError::Validation("only the owner can delete a pantry".to_string()));
        }

        self.store.delete_pantry(pantry_id, &identity.id).await?;

        let desired = snapshot.active_pantry_id;
        self.refresh(&identity.id, desired).await
    }

    /// Fetch membership rows, then display names in a second pass. A
    /// failed name lookup degrades to a placeholder instead of failing
    /// the listing.
    pub async fn list_members(&self, pantry_id: &str) -> CoreResult<Vec<Member>> {
        let member_rows = self.store.members_of(pantry_id).await?;
        if member_rows.is_empty() {
            self.state.apply(StateEvent::MembersLoaded(Vec::new()));
            return Ok(Vec::new());
        }

        let ids: Vec<String> = member_rows.iter().map(|m| m.user_id.clone()).collect();
        let profiles = match self.store.profiles_by_ids(&ids).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!("profile lookup failed, using placeholder names: {}", e);
                Vec::new()
            }
        };
        let names: HashMap<String, Option<String>> =
            profiles.into_iter().map(|p| (p.id, p.full_name)).collect();

        let me = self.state.snapshot().identity;
        let members: Vec<Member> = member_rows
            .into_iter()
            .map(|row| {
                let profile_name = names.get(&row.user_id).and_then(|n| n.clone());
                let name = profile_name
                    .or_else(|| {
                        me.as_ref()
                            .filter(|i| i.id == row.user_id)
                            .map(|i| i.display_name.clone())
                    })
                    .unwrap_or_else(|| {
                        let short: String = row.user_id.chars().take(4).collect();
                        format!("User {}", short)
                    });
                Member { id: row.user_id, name, role: row.role }
            })
            .collect();

        self.state.apply(StateEvent::MembersLoaded(members.clone()));
        Ok(members)
    }

    /// Administrator removes a member. Self-removal goes through `leave`
    /// or `delete` instead.
    pub async fn remove_member(&self, pantry_id: &str, user_id: &str) -> CoreResult<()> {
        let identity = self.require_identity()?;
        if user_id == identity.id {
            return Err(CoreError::Validation(
                "leave or delete the pantry to remove yourself".to_string(),
            ));
        }
        let snapshot = self.state.snapshot();
        let Some(pantry) = snapshot.pantries.iter().find(|p| p.id == pantry_id) else {
            return Err(CoreError::NotFound(format!("pantry {}", pantry_id)));
        };
        if pantry.viewer_role != Role::Administrator {
            return Err(CoreError::Validation(
                "only administrators can remove members".to_string(),
            ));
        }

        self.store.delete_membership(pantry_id, user_id).await?;
        self.list_members(pantry_id).await?;
        Ok(())
    }
}
