use std::fmt;
use thiserror::Error;

use pantry_sync_feed::FeedError;
use pantry_sync_identity::IdentityError;
use pantry_sync_store::StoreError;

/// What a conflicting operation collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyOwner,
    AlreadyMember,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::AlreadyOwner => f.write_str("AlreadyOwner"),
            ConflictKind::AlreadyMember => f.write_str("AlreadyMember"),
        }
    }
}

/// Failure taxonomy surfaced by every command.
///
/// Validation and conflict failures are rejected before any remote call and
/// leave state untouched. Remote failures during optimistic mutations are
/// recovered by rollback before they surface. Nothing here is fatal.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("authentication failed: {0}")]
    Auth(#[from] IdentityError),

    #[error("remote store failure: {0}")]
    Remote(#[from] StoreError),

    #[error("change feed failure: {0}")]
    Feed(#[from] FeedError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
