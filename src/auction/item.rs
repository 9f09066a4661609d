// Items, tiers, and the auction pool.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: csv::Error,
    },

    #[error("duplicate item id: {item_id}")]
    DuplicateItem { item_id: String },

    #[error("duplicate tier id: {tier_id}")]
    DuplicateTier { tier_id: String },

    #[error("item {item_id} references unknown tier {tier_id}")]
    UnknownTier { item_id: String, tier_id: String },
}

/// A pricing/category bucket for items. The base price is the minimum bid
/// floor and the default sale price for items in the tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub tier_id: String,
    pub name: String,
    pub base_price: i64,
    /// Display ordering for tier lists and the default tier sequence.
    pub sort_order: u32,
    /// Display color (hex string, passed through to clients untouched).
    pub color: String,
}

/// A single auctionable item (a player, in the sports-draft case).
///
/// Immutable once the auction starts; administrative edits happen outside
/// the running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: String,
    pub name: String,
    /// Tier reference; items without a tier are auctioned in the trailing
    /// block of every strategy.
    pub tier_id: Option<String>,
    /// Item-level base price, used as the sale default when the item has
    /// no tier.
    pub base_price: i64,
    /// Role tags (e.g. "GK", "DEF"); free-form, display only.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

// ---------------------------------------------------------------------------
// CSV import rows
// ---------------------------------------------------------------------------

/// Raw tiers.csv row: tier_id,name,base_price,sort_order,color
#[derive(Debug, Deserialize)]
struct TierRow {
    tier_id: String,
    name: String,
    base_price: i64,
    sort_order: u32,
    color: String,
}

/// Raw items.csv row: item_id,name,tier_id,base_price,roles,notes
///
/// `tier_id` may be empty (untiered item). `roles` is a semicolon-separated
/// list so the file stays a plain single-value-per-column CSV.
#[derive(Debug, Deserialize)]
struct ItemRow {
    item_id: String,
    name: String,
    tier_id: Option<String>,
    base_price: i64,
    #[serde(default)]
    roles: String,
    #[serde(default)]
    notes: String,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// The static pool of items and tiers the auction runs over. Built once at
/// startup from the imported data and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Pool {
    items: Vec<Item>,
    tiers: Vec<Tier>,
    item_index: HashMap<String, usize>,
    tier_index: HashMap<String, usize>,
}

impl Pool {
    /// Build a pool, rejecting duplicate ids and dangling tier references.
    pub fn new(items: Vec<Item>, tiers: Vec<Tier>) -> Result<Self, PoolError> {
        let mut tier_index = HashMap::with_capacity(tiers.len());
        for (i, tier) in tiers.iter().enumerate() {
            if tier_index.insert(tier.tier_id.clone(), i).is_some() {
                return Err(PoolError::DuplicateTier {
                    tier_id: tier.tier_id.clone(),
                });
            }
        }

        let mut item_index = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if item_index.insert(item.item_id.clone(), i).is_some() {
                return Err(PoolError::DuplicateItem {
                    item_id: item.item_id.clone(),
                });
            }
            if let Some(tier_id) = &item.tier_id {
                if !tier_index.contains_key(tier_id) {
                    return Err(PoolError::UnknownTier {
                        item_id: item.item_id.clone(),
                        tier_id: tier_id.clone(),
                    });
                }
            }
        }

        Ok(Pool {
            items,
            tiers,
            item_index,
            tier_index,
        })
    }

    /// Load the pool from an items CSV and a tiers CSV.
    pub fn from_csv_files(
        items_path: impl AsRef<Path>,
        tiers_path: impl AsRef<Path>,
    ) -> Result<Self, PoolError> {
        let tiers = load_tiers(tiers_path)?;
        let items = load_items(items_path)?;
        Pool::new(items, tiers)
    }

    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.item_index.get(item_id).map(|&i| &self.items[i])
    }

    pub fn tier(&self, tier_id: &str) -> Option<&Tier> {
        self.tier_index.get(tier_id).map(|&i| &self.tiers[i])
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Tiers in display order (ascending `sort_order`).
    pub fn tiers_sorted(&self) -> Vec<&Tier> {
        let mut sorted: Vec<&Tier> = self.tiers.iter().collect();
        sorted.sort_by_key(|t| t.sort_order);
        sorted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The default sale price for an item: its tier's base price, or the
    /// item's own base price when it has no tier. Unknown items price at 0
    /// (they cannot appear in a queue generated from this pool anyway).
    pub fn default_price(&self, item_id: &str) -> i64 {
        match self.item(item_id) {
            Some(item) => match item.tier_id.as_deref().and_then(|t| self.tier(t)) {
                Some(tier) => tier.base_price,
                None => item.base_price,
            },
            None => 0,
        }
    }

    /// The tier id of an item, if it has one.
    pub fn tier_of(&self, item_id: &str) -> Option<&str> {
        self.item(item_id).and_then(|i| i.tier_id.as_deref())
    }
}

fn load_tiers(path: impl AsRef<Path>) -> Result<Vec<Tier>, PoolError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| PoolError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut tiers = Vec::new();
    for row in reader.deserialize::<TierRow>() {
        let row = row.map_err(|e| PoolError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        tiers.push(Tier {
            tier_id: row.tier_id,
            name: row.name,
            base_price: row.base_price,
            sort_order: row.sort_order,
            color: row.color,
        });
    }
    Ok(tiers)
}

fn load_items(path: impl AsRef<Path>) -> Result<Vec<Item>, PoolError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| PoolError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut items = Vec::new();
    for row in reader.deserialize::<ItemRow>() {
        let row = row.map_err(|e| PoolError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let roles: Vec<String> = row
            .roles
            .split(';')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        // Treat an empty tier column the same as an absent one.
        let tier_id = row.tier_id.filter(|t| !t.is_empty());
        items.push(Item {
            item_id: row.item_id,
            name: row.name,
            tier_id,
            base_price: row.base_price,
            roles,
            notes: row.notes,
        });
    }
    Ok(items)
}
