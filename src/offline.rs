//! Guest-mode fallback storage: a flat JSON snapshot of the state tree,
//! written on every change while no identity is established.

use log::warn;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pantry_sync_store::{Pantry, Role};

use crate::state::ReconciliationState;

/// Fixed key the snapshot is stored under.
pub const STORAGE_KEY: &str = "shared_pantry_data_v1";

pub const GUEST_PANTRY_ID: &str = "local-pantry";
pub const GUEST_PANTRY_NAME: &str = "SharedPantry";
pub const GUEST_INVITE_CODE: &str = "HOME";
pub const GUEST_USER_ID: &str = "guest";

/// The state a guest starts from: one local pantry, nothing loaded.
pub fn guest_baseline() -> ReconciliationState {
    let mut state = ReconciliationState::initial();
    state.pantries = vec![Pantry {
        id: GUEST_PANTRY_ID.to_string(),
        name: GUEST_PANTRY_NAME.to_string(),
        invite_code: GUEST_INVITE_CODE.to_string(),
        owner_id: GUEST_USER_ID.to_string(),
        viewer_role: Role::Administrator,
    }];
    state.active_pantry_id = Some(GUEST_PANTRY_ID.to_string());
    state.initialized = true;
    state
}

/// File-backed snapshot store for guest mode.
pub struct GuestCache {
    path: PathBuf,
}

impl GuestCache {
    pub fn new(dir: &Path) -> Self {
        Self { path: dir.join(format!("{}.json", STORAGE_KEY)) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved snapshot, if present and readable. An unreadable
    /// snapshot is discarded, never partially applied.
    pub fn load(&self) -> Option<ReconciliationState> {
        let body = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<ReconciliationState>(&body) {
            Ok(mut state) => {
                // Guest snapshots never carry an identity.
                state.identity = None;
                state.initialized = true;
                Some(state)
            }
            Err(e) => {
                warn!("discarding unreadable guest snapshot: {}", e);
                None
            }
        }
    }

    pub fn save(&self, state: &ReconciliationState) -> io::Result<()> {
        let body = serde_json::to_string(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, body)
    }
}
