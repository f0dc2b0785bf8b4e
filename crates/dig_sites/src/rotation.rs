//! Per-player reward rotation for dig zones.
//!
//! Every rarity tier of a zone is a shuffle-bag: items are drawn without
//! replacement and the bag only refills once it is empty, so each candidate
//! of a tier shows up once before any of them repeats. On top of that, a
//! draw avoids the items of the immediately preceding renewal whenever the
//! bag still offers something else.

use crate::catalog::ItemCatalog;
use crate::content::{ZoneConfig, ZoneRewards};
use crate::error::{RotationError, RotationResult};
use crate::rng::RotationRng;
use crate::storage::RotationStore;
use crate::types::{ItemId, PlayerId, RarityTier, Timestamp, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Rotation state of one zone for one player. Persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerZoneRotationState {
    #[serde(default)]
    pub current_items: Vec<ItemId>,
    /// Parallel to `current_items`
    #[serde(default)]
    pub found_flags: Vec<bool>,
    /// 0 when no renewal is scheduled
    #[serde(default)]
    pub cooldown_end_time: Timestamp,
    /// Set once the first-completion reward has been granted
    #[serde(default)]
    pub reward_accepted: bool,
    /// Items not yet drawn from each tier's bag
    #[serde(default)]
    pub remaining_pools: BTreeMap<RarityTier, Vec<ItemId>>,
}

impl PlayerZoneRotationState {
    pub fn is_consistent(&self) -> bool {
        self.current_items.len() == self.found_flags.len()
    }

    /// True when every item of a non-empty set has been found.
    pub fn is_complete(&self) -> bool {
        !self.found_flags.is_empty() && self.found_flags.iter().all(|f| *f)
    }

    pub fn is_found(&self, item_id: &str) -> bool {
        self.current_items
            .iter()
            .zip(&self.found_flags)
            .any(|(item, found)| item == item_id && *found)
    }

    pub fn cooldown_remaining(&self, now: Timestamp) -> u64 {
        self.cooldown_end_time.saturating_sub(now)
    }
}

/// Result of one renewal draw, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renewal {
    pub items: Vec<ItemId>,
    /// Working pools of every tier touched by this renewal
    pub pools: BTreeMap<RarityTier, Vec<ItemId>>,
    /// Tier slots that produced no item
    pub skipped_slots: usize,
}

/// Reward granted when a zone's set is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReward {
    pub rewards: ZoneRewards,
    pub first_completion: bool,
}

/// Outcome of marking an item as found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundOutcome {
    AlreadyFound,
    Found,
    Completed(CompletionReward),
}

/// Candidate list of a tier for a zone: the authored list, or the catalog's
/// list for that rarity when the zone authors none. Duplicates removed.
pub fn static_candidates(zone: &ZoneConfig, catalog: &dyn ItemCatalog, tier: RarityTier) -> Vec<ItemId> {
    let source = match zone.candidates.get(&tier) {
        Some(authored) if !authored.is_empty() => authored.clone(),
        _ => catalog.candidates_for(tier),
    };

    let mut unique = Vec::with_capacity(source.len());
    for item in source {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

fn seed_pool(
    zone: &ZoneConfig,
    catalog: &dyn ItemCatalog,
    prior: Option<&PlayerZoneRotationState>,
    tier: RarityTier,
) -> Vec<ItemId> {
    let statics = static_candidates(zone, catalog, tier);
    let carried: Vec<ItemId> = prior
        .and_then(|p| p.remaining_pools.get(&tier))
        .map(|pool| pool.iter().filter(|i| statics.contains(i)).cloned().collect())
        .unwrap_or_default();

    if carried.is_empty() {
        statics
    } else {
        carried
    }
}

/// Draws a fresh reward set for a zone.
///
/// Pure apart from the RNG; persisting the result is the caller's job.
/// A tier that repeats and empties its bag partway through the renewal
/// refills from the static candidates before drawing its next slot.
pub fn draw_renewal(
    zone: &ZoneConfig,
    catalog: &dyn ItemCatalog,
    prior: Option<&PlayerZoneRotationState>,
    rng: &mut RotationRng,
) -> Renewal {
    let mut items: Vec<ItemId> = Vec::with_capacity(zone.pinned_items.len() + zone.renewal_tiers.len());
    for pinned in &zone.pinned_items {
        if !items.contains(pinned) {
            items.push(pinned.clone());
        }
    }

    let mut working: BTreeMap<RarityTier, Vec<ItemId>> = BTreeMap::new();
    let mut skipped_slots = 0;

    for &tier in &zone.renewal_tiers {
        let pool = working
            .entry(tier)
            .or_insert_with(|| seed_pool(zone, catalog, prior, tier));

        // Bag ran dry partway through a renewal that repeats this tier
        if pool.is_empty() {
            *pool = static_candidates(zone, catalog, tier);
        }

        if pool.is_empty() {
            error!("Zone {} has no candidates for rarity {}, skipping slot", zone.id, tier);
            skipped_slots += 1;
            continue;
        }

        let exclude_dupes: Vec<ItemId> = pool.iter().filter(|i| !items.contains(i)).cloned().collect();
        let exclude_last: Vec<ItemId> = match prior {
            Some(p) => exclude_dupes
                .iter()
                .filter(|i| !p.current_items.contains(i))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        // Avoiding the previous set is best-effort
        let candidates = if exclude_last.is_empty() { &exclude_dupes } else { &exclude_last };

        let Some(pick) = rng.choose(candidates.as_slice()).cloned() else {
            warn!(
                "Zone {} rarity {} pool only holds items already in this set, skipping slot",
                zone.id, tier
            );
            skipped_slots += 1;
            continue;
        };

        pool.retain(|i| *i != pick);
        items.push(pick);
    }

    Renewal {
        items,
        pools: working,
        skipped_slots,
    }
}

/// Owns every player's rotation state and is the only writer of it.
#[derive(Debug)]
pub struct ZoneRotationEngine {
    store: Arc<dyn RotationStore>,
    catalog: Arc<dyn ItemCatalog>,
    rng: RotationRng,
    states: HashMap<PlayerId, HashMap<ZoneId, PlayerZoneRotationState>>,
}

impl ZoneRotationEngine {
    pub fn new(store: Arc<dyn RotationStore>, catalog: Arc<dyn ItemCatalog>, rng: RotationRng) -> Self {
        Self {
            store,
            catalog,
            rng,
            states: HashMap::new(),
        }
    }

    /// Cached state, if it has been loaded or computed this session.
    pub fn state(&self, player: PlayerId, zone_id: &str) -> Option<&PlayerZoneRotationState> {
        self.states.get(&player).and_then(|zones| zones.get(zone_id))
    }

    /// Loads a player's state for a zone, consulting the store on a cache miss.
    ///
    /// Records failing the integrity check are discarded.
    pub async fn load(
        &mut self,
        player: PlayerId,
        zone: &ZoneConfig,
    ) -> RotationResult<Option<&PlayerZoneRotationState>> {
        let cached = self
            .states
            .get(&player)
            .map_or(false, |zones| zones.contains_key(&zone.id));

        if !cached {
            let Some(mut state) = self.store.get(player, &zone.id).await? else {
                return Ok(None);
            };

            if !state.is_consistent() {
                warn!(
                    "Discarding inconsistent rotation state of {} in {}: {} items, {} flags",
                    player,
                    zone.id,
                    state.current_items.len(),
                    state.found_flags.len()
                );
                return Ok(None);
            }

            for (tier, pool) in state.remaining_pools.iter_mut() {
                let statics = static_candidates(zone, self.catalog.as_ref(), *tier);
                pool.retain(|item| statics.contains(item));
            }

            self.states.entry(player).or_default().insert(zone.id.clone(), state);
        }

        Ok(self.state(player, &zone.id))
    }

    /// Draws a new set for the zone and persists it.
    ///
    /// On a storage failure nothing changes, neither cached nor persisted.
    pub async fn renew(
        &mut self,
        player: PlayerId,
        zone: &ZoneConfig,
        now: Timestamp,
    ) -> RotationResult<&PlayerZoneRotationState> {
        let prior = self.load(player, zone).await?.cloned();
        let renewal = draw_renewal(zone, self.catalog.as_ref(), prior.as_ref(), &mut self.rng);

        if renewal.skipped_slots > 0 {
            warn!(
                "Renewal of {} for {} drew {} of {} slots",
                zone.id,
                player,
                zone.renewal_tiers.len() - renewal.skipped_slots,
                zone.renewal_tiers.len()
            );
        }

        let mut remaining_pools = prior
            .as_ref()
            .map(|p| p.remaining_pools.clone())
            .unwrap_or_default();
        remaining_pools.extend(renewal.pools);

        let state = PlayerZoneRotationState {
            found_flags: vec![false; renewal.items.len()],
            current_items: renewal.items,
            cooldown_end_time: now + zone.renewal_cooldown_ms,
            reward_accepted: prior.map_or(false, |p| p.reward_accepted),
            remaining_pools,
        };

        self.commit(player, &zone.id, state).await?;
        debug!("Renewed {} for {}", zone.id, player);
        Ok(self
            .state(player, &zone.id)
            .ok_or_else(|| RotationError::NoState { player, zone_id: zone.id.clone() })?)
    }

    /// Loads the zone's state, running an initial renewal if the player has
    /// none. Returns whether a renewal happened.
    pub async fn ensure(&mut self, player: PlayerId, zone: &ZoneConfig, now: Timestamp) -> RotationResult<bool> {
        if self.load(player, zone).await?.is_some() {
            return Ok(false);
        }
        self.renew(player, zone, now).await?;
        Ok(true)
    }

    /// Marks an item of the current set as found, granting the completion
    /// reward when it was the last one.
    pub async fn mark_found(
        &mut self,
        player: PlayerId,
        zone: &ZoneConfig,
        item_id: &str,
    ) -> RotationResult<FoundOutcome> {
        let mut state = self
            .load(player, zone)
            .await?
            .cloned()
            .ok_or_else(|| RotationError::NoState { player, zone_id: zone.id.clone() })?;

        if !state.current_items.iter().any(|i| i == item_id) {
            return Err(RotationError::ItemNotInRotation {
                zone_id: zone.id.clone(),
                item_id: item_id.to_string(),
            });
        }

        let Some(index) = state
            .current_items
            .iter()
            .zip(&state.found_flags)
            .position(|(item, found)| item == item_id && !*found)
        else {
            return Ok(FoundOutcome::AlreadyFound);
        };

        state.found_flags[index] = true;
        let outcome = if state.is_complete() {
            FoundOutcome::Completed(Self::claim_reward(zone, &mut state))
        } else {
            FoundOutcome::Found
        };

        self.commit(player, &zone.id, state).await?;
        Ok(outcome)
    }

    /// Marks the whole current set found and grants the reward.
    pub async fn complete(&mut self, player: PlayerId, zone: &ZoneConfig) -> RotationResult<CompletionReward> {
        let mut state = self
            .load(player, zone)
            .await?
            .cloned()
            .ok_or_else(|| RotationError::NoState { player, zone_id: zone.id.clone() })?;

        state.found_flags.iter_mut().for_each(|f| *f = true);
        let reward = Self::claim_reward(zone, &mut state);

        self.commit(player, &zone.id, state).await?;
        Ok(reward)
    }

    /// Zone ids the player has persisted state for, registered or not.
    pub async fn persisted_zones(&self, player: PlayerId) -> RotationResult<Vec<ZoneId>> {
        Ok(self.store.zones(player).await?)
    }

    /// Persisted cooldown of a zone that may no longer be registered.
    pub async fn persisted_cooldown(&self, player: PlayerId, zone_id: &str) -> RotationResult<Option<Timestamp>> {
        if let Some(state) = self.state(player, zone_id) {
            return Ok(Some(state.cooldown_end_time));
        }
        Ok(self.store.get(player, zone_id).await?.map(|s| s.cooldown_end_time))
    }

    /// Drops cached state for a player. Persisted state is untouched.
    pub fn forget_player(&mut self, player: PlayerId) {
        self.states.remove(&player);
    }

    fn claim_reward(zone: &ZoneConfig, state: &mut PlayerZoneRotationState) -> CompletionReward {
        let first_completion = !state.reward_accepted;
        state.reward_accepted = true;
        CompletionReward {
            rewards: if first_completion {
                zone.rewards.first_completion
            } else {
                zone.rewards.renewal
            },
            first_completion,
        }
    }

    async fn commit(&mut self, player: PlayerId, zone_id: &str, state: PlayerZoneRotationState) -> RotationResult<()> {
        self.store.set(player, zone_id, &state).await?;
        self.states
            .entry(player)
            .or_default()
            .insert(zone_id.to_string(), state);
        Ok(())
    }
}
