//! Relational store boundary for the SharedPantry sync core.
//!
//! This crate owns the typed domain model (pantries, memberships, grocery
//! items), the raw wire-row shapes returned by the remote store, and the
//! mapping between the two. All row conversion happens here, at the
//! boundary, and fails loudly on unexpected shapes instead of defaulting.
//!
//! The [`RemoteStore`] trait names every query and mutation the sync core
//! issues; [`RestStore`] is the production implementation speaking the
//! PostgREST-style HTTP surface under `/rest/v1/`.

mod error;
mod models;
mod query;
mod remote;
mod rows;

pub use error::StoreError;
pub use models::{Category, GroceryItem, ItemPatch, Member, Pantry, Role};
pub use query::TableQuery;
pub use remote::{RemoteStore, RestStore};
pub use rows::{map_item, map_membership, ItemRow, MemberRow, MembershipJoinRow, NewItemRow, PantryRow, ProfileRow};
