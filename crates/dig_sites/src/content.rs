//! Authored content: zone configurations, live event definitions and the
//! item catalog. Loaded once at startup and never mutated.

use crate::error::{ContentError, ContentResult};
use crate::types::{EventId, ItemId, RarityTier, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Currency and experience granted on zone completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRewards {
    #[serde(default)]
    pub currency: u32,
    #[serde(default)]
    pub experience: u32,
}

/// Reward amounts for the first completion vs. every later renewal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRewardTable {
    #[serde(default)]
    pub first_completion: ZoneRewards,
    #[serde(default)]
    pub renewal: ZoneRewards,
}

/// Static configuration of a dig zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: ZoneId,
    pub display_name: String,
    /// Higher priority wins when a player stands in overlapping zones
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub recommended_level: u32,
    #[serde(default)]
    pub base_items: Vec<ItemId>,
    #[serde(default)]
    pub hidden_items: Vec<ItemId>,
    /// Always included at the front of every renewed set
    #[serde(default)]
    pub pinned_items: Vec<ItemId>,
    /// Rarity tiers drawn on each renewal, in order. Tiers may repeat.
    #[serde(default)]
    pub renewal_tiers: Vec<RarityTier>,
    /// Candidate items per tier. Tiers missing here fall back to the catalog.
    #[serde(default)]
    pub candidates: BTreeMap<RarityTier, Vec<ItemId>>,
    #[serde(default)]
    pub exclude_base_items: bool,
    #[serde(default)]
    pub exclude_lower_priority: bool,
    pub renewal_cooldown_ms: u64,
    #[serde(default)]
    pub rewards: ZoneRewardTable,
    /// Dig spots present when the zone is registered
    #[serde(default)]
    pub shiny_spots: Vec<String>,
}

/// Inclusive cooldown window rolled between live events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl CooldownRange {
    pub fn fixed(ms: u64) -> Self {
        Self { min_ms: ms, max_ms: ms }
    }

    pub fn validate(&self, owner: &str) -> ContentResult<()> {
        if self.min_ms > self.max_ms {
            return Err(ContentError::InvalidCooldown {
                owner: owner.to_string(),
                min_ms: self.min_ms,
                max_ms: self.max_ms,
            });
        }
        Ok(())
    }
}

/// Text and art shown to players for one lifecycle phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub color_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseNotifications {
    #[serde(default)]
    pub preview: NotificationTemplate,
    #[serde(default)]
    pub active: NotificationTemplate,
    #[serde(default)]
    pub ending_soon: NotificationTemplate,
    #[serde(default)]
    pub ended: NotificationTemplate,
}

/// An asset spawned for the duration of a live event. Assets bound to a
/// zone become that zone's shiny spots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub asset: String,
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
}

/// A time-boxed live event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: EventId,
    pub display_name: String,
    pub weight: f64,
    pub preview_duration_ms: u64,
    pub active_duration_ms: u64,
    pub ending_soon_duration_ms: u64,
    /// Overrides the scheduler's default cooldown after this event ends
    #[serde(default)]
    pub cooldown: Option<CooldownRange>,
    #[serde(default)]
    pub assets: Vec<AssetRef>,
    #[serde(default)]
    pub notifications: PhaseNotifications,
    /// Zones registered while the event is active
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

/// Item id to rarity table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub items: BTreeMap<ItemId, RarityTier>,
}

/// Everything loaded from a content file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPack {
    #[serde(default)]
    pub catalog: CatalogData,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub events: Vec<EventDefinition>,
}

impl ContentPack {
    /// Loads and validates a JSON content file.
    pub async fn load_from_file(path: &Path) -> ContentResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ContentError::Read(path.to_path_buf(), e))?;
        let pack: ContentPack =
            serde_json::from_str(&raw).map_err(|e| ContentError::Parse(path.to_path_buf(), e))?;
        pack.validate()?;

        info!(
            "📦 Loaded content from {}: {} zones, {} events, {} catalog items",
            path.display(),
            pack.zones.len(),
            pack.events.len(),
            pack.catalog.items.len()
        );
        Ok(pack)
    }

    /// Rejects content the runtime cannot hold consistently and logs
    /// softer authoring mistakes that only degrade renewals.
    pub fn validate(&self) -> ContentResult<()> {
        let mut zone_ids = HashSet::new();
        for zone in self.zones.iter().chain(self.events.iter().flat_map(|e| e.zones.iter())) {
            if !zone_ids.insert(zone.id.as_str()) {
                return Err(ContentError::DuplicateZone(zone.id.clone()));
            }
            self.check_zone_candidates(zone);
        }

        let mut event_ids = HashSet::new();
        for event in &self.events {
            if !event_ids.insert(event.id.as_str()) {
                return Err(ContentError::DuplicateEvent(event.id.clone()));
            }
            if !event.weight.is_finite() || event.weight < 0.0 {
                return Err(ContentError::InvalidWeight {
                    owner: event.id.clone(),
                    weight: event.weight,
                });
            }
            if event.ending_soon_duration_ms > event.active_duration_ms {
                return Err(ContentError::InvalidEndingSoon(event.id.clone()));
            }
            if let Some(range) = &event.cooldown {
                range.validate(&event.id)?;
            }
            for asset in &event.assets {
                if let Some(zone_id) = &asset.zone_id {
                    if !event.zones.iter().any(|z| &z.id == zone_id) {
                        warn!(
                            "Event {} binds asset {} to zone {} which the event does not spawn",
                            event.id, asset.asset, zone_id
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn check_zone_candidates(&self, zone: &ZoneConfig) {
        for tier in &zone.renewal_tiers {
            let authored = zone.candidates.get(tier).filter(|c| !c.is_empty());
            let has_catalog_items = self.catalog.items.values().any(|r| r == tier);
            if authored.is_none() && !has_catalog_items {
                warn!("Zone {} draws rarity {} but no candidates exist for it", zone.id, tier);
            }
        }

        for (tier, items) in &zone.candidates {
            for item in items {
                match self.catalog.items.get(item) {
                    None => warn!("Zone {} lists unknown item {}", zone.id, item),
                    Some(rarity) if rarity != tier => warn!(
                        "Zone {} lists item {} under rarity {} but the catalog says {}",
                        zone.id, item, tier, rarity
                    ),
                    Some(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn zone(id: &str, priority: i32) -> ZoneConfig {
        ZoneConfig {
            id: id.to_string(),
            display_name: format!("Zone {id}"),
            priority,
            recommended_level: 1,
            base_items: vec![],
            hidden_items: vec![],
            pinned_items: vec![],
            renewal_tiers: vec![],
            candidates: BTreeMap::new(),
            exclude_base_items: false,
            exclude_lower_priority: false,
            renewal_cooldown_ms: 60_000,
            rewards: ZoneRewardTable::default(),
            shiny_spots: vec![],
        }
    }

    pub fn items(prefix: &str, n: usize) -> Vec<ItemId> {
        (0..n).map(|i| format!("{prefix}_{i}")).collect()
    }

    pub fn event(id: &str, weight: f64) -> EventDefinition {
        EventDefinition {
            id: id.to_string(),
            display_name: format!("Event {id}"),
            weight,
            preview_duration_ms: 1_000,
            active_duration_ms: 10_000,
            ending_soon_duration_ms: 2_000,
            cooldown: None,
            assets: vec![],
            notifications: PhaseNotifications::default(),
            zones: vec![],
        }
    }
}
