//! Item rarity lookup used as the fallback candidate source for renewals.

use crate::content::CatalogData;
use crate::types::{ItemId, RarityTier};
use std::collections::BTreeMap;

/// Static item metadata supplied by the content pipeline.
pub trait ItemCatalog: Send + Sync + std::fmt::Debug {
    /// Rarity of an item, or `None` if the catalog does not know it.
    fn item_rarity(&self, item_id: &str) -> Option<RarityTier>;

    /// Every catalog item of the given rarity.
    fn candidates_for(&self, tier: RarityTier) -> Vec<ItemId>;
}

/// Catalog built from the content file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    rarities: BTreeMap<ItemId, RarityTier>,
    by_tier: BTreeMap<RarityTier, Vec<ItemId>>,
}

impl StaticCatalog {
    pub fn new(data: &CatalogData) -> Self {
        let mut by_tier: BTreeMap<RarityTier, Vec<ItemId>> = BTreeMap::new();
        for (item, tier) in &data.items {
            by_tier.entry(*tier).or_default().push(item.clone());
        }
        Self {
            rarities: data.items.clone(),
            by_tier,
        }
    }

    pub fn len(&self) -> usize {
        self.rarities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rarities.is_empty()
    }
}

impl ItemCatalog for StaticCatalog {
    fn item_rarity(&self, item_id: &str) -> Option<RarityTier> {
        self.rarities.get(item_id).copied()
    }

    fn candidates_for(&self, tier: RarityTier) -> Vec<ItemId> {
        self.by_tier.get(&tier).cloned().unwrap_or_default()
    }
}
