//! Raw wire-row shapes and their validating conversions into the typed
//! model. Conversion failures are decode errors, never silent defaults.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Category, GroceryItem, Pantry, Role};

/// Row of the `pantries` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PantryRow {
    pub id: String,
    pub name: String,
    pub invite_code: String,
    pub created_by: String,
}

/// Row of the membership query joined to its pantry record
/// (`select role, pantry:pantries(*)`). A missing pantry marks a dangling
/// membership row whose pantry no longer exists.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipJoinRow {
    pub role: Role,
    pub pantry: Option<PantryRow>,
}

/// Row of the `pantry_members` table as fetched for member listings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemberRow {
    pub user_id: String,
    pub role: Role,
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub full_name: Option<String>,
}

/// Row of the `grocery_items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: String,
    pub pantry_id: String,
    pub user_id: String,
    pub name: String,
    pub category: String,
    pub icon: String,
    pub qty_value: Option<String>,
    pub qty_unit: Option<String>,
    pub is_bought: bool,
    pub notes: Option<String>,
    pub created_at: String,
}

/// Insert payload for `grocery_items`. `id` and `created_at` are assigned
/// by the store.
#[derive(Debug, Clone, Serialize)]
pub struct NewItemRow {
    pub pantry_id: String,
    pub user_id: String,
    pub name: String,
    pub category: Category,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty_unit: Option<String>,
    pub is_bought: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Convert an item row into the typed model.
pub fn map_item(row: ItemRow) -> Result<GroceryItem, StoreError> {
    let category = Category::from_wire(&row.category).ok_or_else(|| {
        StoreError::Decode(format!("unknown category '{}' on item {}", row.category, row.id))
    })?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map_err(|e| {
            StoreError::Decode(format!("bad created_at '{}' on item {}: {}", row.created_at, row.id, e))
        })?
        .with_timezone(&chrono::Utc);

    Ok(GroceryItem {
        id: row.id,
        pantry_id: row.pantry_id,
        name: row.name,
        qty_value: row.qty_value,
        qty_unit: row.qty_unit,
        notes: row.notes,
        category,
        icon: row.icon,
        is_bought: row.is_bought,
        added_by: row.user_id,
        created_at,
    })
}

/// Convert a membership join row into a viewer-scoped pantry. Returns
/// `None` for dangling rows whose pantry record is gone.
pub fn map_membership(row: MembershipJoinRow) -> Option<Pantry> {
    let pantry = row.pantry?;
    Some(Pantry {
        id: pantry.id,
        name: pantry.name,
        invite_code: pantry.invite_code,
        owner_id: pantry.created_by,
        viewer_role: row.role,
    })
}
