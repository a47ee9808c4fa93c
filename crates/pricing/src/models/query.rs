use serde::{Deserialize, Serialize};

/// Economy category an item belongs to.
///
/// Bulk-table sources publish one price table per category, so the category
/// determines which table a query is served from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ItemCategory {
    Currency,
    Fragment,
    DivinationCard,
    SkillGem,
    UniqueWeapon,
    UniqueArmour,
    UniqueAccessory,
    UniqueFlask,
    UniqueJewel,
    UniqueMap,
    Essence,
    Fossil,
    Oil,
    Incubator,
}

/// A normalized price lookup request.
///
/// `item_key` is produced upstream by the item parser and is treated as an
/// opaque, stable string here; it is the cache and rate-limit partition key.
/// By convention the key is `|`-separated with the item's display name as
/// the leading segment (followed by base type, rarity, links and influences).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PriceQuery {
    /// Normalized item key (name + base + rarity + links + influences).
    pub item_key: String,

    /// Economy category the item belongs to.
    pub category: ItemCategory,
}

impl PriceQuery {
    /// Create a new query.
    pub fn new(item_key: impl Into<String>, category: ItemCategory) -> Self {
        Self {
            item_key: item_key.into(),
            category,
        }
    }

    /// The item's display name - the leading segment of the key.
    pub fn display_name(&self) -> &str {
        self.item_key.split('|').next().unwrap_or_default()
    }
}
