use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-pantry role of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Administrator,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::Member => "Member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of grocery categories. `Other` is the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Produce,
    Dairy,
    Bakery,
    #[serde(rename = "Meat & Seafood")]
    MeatAndSeafood,
    Frozen,
    Pantry,
    Household,
    Beverages,
    Snacks,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Produce,
        Category::Dairy,
        Category::Bakery,
        Category::MeatAndSeafood,
        Category::Frozen,
        Category::Pantry,
        Category::Household,
        Category::Beverages,
        Category::Snacks,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Produce => "Produce",
            Category::Dairy => "Dairy",
            Category::Bakery => "Bakery",
            Category::MeatAndSeafood => "Meat & Seafood",
            Category::Frozen => "Frozen",
            Category::Pantry => "Pantry",
            Category::Household => "Household",
            Category::Beverages => "Beverages",
            Category::Snacks => "Snacks",
            Category::Other => "Other",
        }
    }

    /// Strict parse of a wire value. Used at the store boundary, where an
    /// unknown category is a decode failure, not a silent default.
    pub fn from_wire(value: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.as_str() == value)
    }

    /// Lenient parse for classifier output: anything unrecognized is `Other`.
    pub fn parse_lenient(value: &str) -> Category {
        Category::from_wire(value.trim()).unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named shared grocery list, as seen by one identity.
///
/// `viewer_role` is derived from that identity's membership row, not a
/// property of the pantry itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pantry {
    pub id: String,
    pub name: String,
    pub invite_code: String,
    pub owner_id: String,
    pub viewer_role: Role,
}

/// A resolved member of a pantry, display name included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// A grocery item belonging to exactly one pantry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroceryItem {
    pub id: String,
    pub pantry_id: String,
    pub name: String,
    pub qty_value: Option<String>,
    pub qty_unit: Option<String>,
    pub notes: Option<String>,
    pub category: Category,
    pub icon: String,
    pub is_bought: bool,
    pub added_by: String,
    pub created_at: DateTime<Utc>,
}

/// Partial update of a grocery item. Only set fields are sent to the
/// remote store, so concurrent edits to unrelated fields are not clobbered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_bought: Option<bool>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.icon.is_none()
            && self.qty_value.is_none()
            && self.qty_unit.is_none()
            && self.notes.is_none()
            && self.is_bought.is_none()
    }

    /// Merge the set fields into `item`.
    pub fn apply_to(&self, item: &mut GroceryItem) {
        if let Some(name) = &self.name {
            item.name = name.clone();
        }
        if let Some(category) = self.category {
            item.category = category;
        }
        if let Some(icon) = &self.icon {
            item.icon = icon.clone();
        }
        if let Some(qty_value) = &self.qty_value {
            item.qty_value = Some(qty_value.clone());
        }
        if let Some(qty_unit) = &self.qty_unit {
            item.qty_unit = Some(qty_unit.clone());
        }
        if let Some(notes) = &self.notes {
            item.notes = Some(notes.clone());
        }
        if let Some(is_bought) = self.is_bought {
            item.is_bought = is_bought;
        }
    }
}
