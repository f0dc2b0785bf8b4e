//! Tracks which zones each online player stands in and keeps their reward
//! sets fresh.
//!
//! Renewals are driven by an at-least-once queue: an entry is only
//! rescheduled after its renewal succeeded. Entries whose zone is not
//! registered (for example a live event zone that has despawned) stay in
//! the queue and are retried every tick for as long as the player is online.

use crate::content::ZoneRewards;
use crate::error::{RotationError, RotationResult};
use crate::notifications::{Notification, NotificationHub};
use crate::registry::{ZoneRegistry, ZoneRuntime};
use crate::rotation::{CompletionReward, FoundOutcome, ZoneRotationEngine};
use crate::types::{ItemId, PlayerId, Timestamp, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

/// One item of the active zone's current set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneItemStatus {
    pub item_id: ItemId,
    pub is_found: bool,
}

/// What the UI shows for the zone a player is standing in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveZoneSummary {
    pub id: ZoneId,
    pub display_name: String,
    pub level: u32,
    pub items: Vec<ZoneItemStatus>,
    /// Reward the next completion pays
    pub rewards: ZoneRewards,
    pub completed: bool,
    pub renewal_cooldown_remaining_ms: u64,
}

/// A renewal waiting for its cooldown to pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRenewal {
    pub zone_id: ZoneId,
    pub due_at: Timestamp,
    /// Failed attempts since the entry became due
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct PlayerSession {
    /// Entry order matters for priority ties
    occupancy: Vec<ZoneId>,
    pending: Vec<PendingRenewal>,
}

/// Per-player occupancy and renewal driver.
#[derive(Debug)]
pub struct PlayerZoneTracker {
    registry: ZoneRegistry,
    engine: ZoneRotationEngine,
    notifications: NotificationHub,
    sessions: HashMap<PlayerId, PlayerSession>,
}

impl PlayerZoneTracker {
    pub fn new(registry: ZoneRegistry, engine: ZoneRotationEngine, notifications: NotificationHub) -> Self {
        Self {
            registry,
            engine,
            notifications,
            sessions: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &ZoneRotationEngine {
        &self.engine
    }

    pub fn is_online(&self, player: PlayerId) -> bool {
        self.sessions.contains_key(&player)
    }

    /// Online players in a stable order.
    pub fn online_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self.sessions.keys().copied().collect();
        players.sort();
        players
    }

    pub fn occupancy(&self, player: PlayerId) -> Vec<ZoneId> {
        self.sessions
            .get(&player)
            .map(|s| s.occupancy.clone())
            .unwrap_or_default()
    }

    pub fn pending_renewals(&self, player: PlayerId) -> Vec<PendingRenewal> {
        self.sessions
            .get(&player)
            .map(|s| s.pending.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // Player lifecycle
    // ========================================================================

    /// Starts tracking a player: makes sure a rotation exists for every
    /// registered zone and queues renewals for every persisted cooldown.
    pub async fn on_player_join(&mut self, player: PlayerId, now: Timestamp) {
        if self.sessions.contains_key(&player) {
            debug!("Player {} already tracked", player);
            return;
        }
        self.sessions.insert(player, PlayerSession::default());
        info!("👤 Tracking dig zones for player {}", player);

        let mut zone_ids: BTreeSet<ZoneId> = self.registry.zone_ids().into_iter().collect();
        for zone_id in &zone_ids {
            let Some(config) = self.registry.config(zone_id) else {
                continue;
            };
            if let Err(e) = self.engine.ensure(player, &config, now).await {
                error!("Failed to prepare zone {} for {}: {}", zone_id, player, e);
            }
        }

        match self.engine.persisted_zones(player).await {
            Ok(persisted) => zone_ids.extend(persisted),
            Err(e) => error!("Failed to list persisted zones for {}: {}", player, e),
        }

        for zone_id in zone_ids {
            match self.engine.persisted_cooldown(player, &zone_id).await {
                Ok(Some(due_at)) if due_at > 0 => self.schedule_renewal(player, &zone_id, due_at),
                Ok(_) => {}
                Err(e) => error!("Failed to read cooldown of {} for {}: {}", zone_id, player, e),
            }
        }
    }

    /// Forgets a player's occupancy, pending renewals and cached rotation
    /// state in one step. Persisted state is kept for the next login.
    pub fn on_player_leave(&mut self, player: PlayerId) {
        if self.sessions.remove(&player).is_some() {
            self.engine.forget_player(player);
            info!("👋 Stopped tracking dig zones for player {}", player);
        }
    }

    // ========================================================================
    // Occupancy
    // ========================================================================

    /// Records that a player entered a zone. Entering a zone the player is
    /// already in does nothing.
    pub async fn on_zone_enter(&mut self, player: PlayerId, zone_id: &str, now: Timestamp) {
        let Some(config) = self.registry.config(zone_id) else {
            warn!("Player {} entered unregistered zone {}", player, zone_id);
            return;
        };

        if !self.sessions.contains_key(&player) {
            self.on_player_join(player, now).await;
        }

        let Some(session) = self.sessions.get_mut(&player) else {
            return;
        };
        if session.occupancy.iter().any(|z| z == zone_id) {
            debug!("Player {} already inside {}", player, zone_id);
            return;
        }
        session.occupancy.push(zone_id.to_string());

        match self.engine.ensure(player, &config, now).await {
            Ok(true) => {
                if let Some(state) = self.engine.state(player, zone_id) {
                    let (due_at, items) = (state.cooldown_end_time, state.current_items.clone());
                    self.schedule_renewal(player, zone_id, due_at);
                    self.notifications.send(
                        player,
                        Notification::ZoneRenewed {
                            zone_id: zone_id.to_string(),
                            items,
                        },
                    );
                }
            }
            Ok(false) => {}
            Err(e) => error!("Initial renewal of {} for {} failed: {}", zone_id, player, e),
        }

        self.notifications.send(
            player,
            Notification::ZoneEntered {
                zone_id: zone_id.to_string(),
            },
        );
        self.push_summary(player, now);
    }

    /// Records that a player left a zone. Leaving a zone the player is not
    /// in does nothing.
    pub fn on_zone_exit(&mut self, player: PlayerId, zone_id: &str, now: Timestamp) {
        let Some(session) = self.sessions.get_mut(&player) else {
            return;
        };
        let before = session.occupancy.len();
        session.occupancy.retain(|z| z != zone_id);
        if session.occupancy.len() == before {
            return;
        }

        self.notifications.send(
            player,
            Notification::ZoneExited {
                zone_id: zone_id.to_string(),
            },
        );
        self.push_summary(player, now);
    }

    /// Removes a zone from every player's occupancy. Used when a live event
    /// zone is about to be unregistered.
    pub fn evict_zone(&mut self, zone_id: &str, now: Timestamp) {
        let occupants: Vec<PlayerId> = self
            .online_players()
            .into_iter()
            .filter(|p| {
                self.sessions
                    .get(p)
                    .map_or(false, |s| s.occupancy.iter().any(|z| z == zone_id))
            })
            .collect();

        for player in occupants {
            self.on_zone_exit(player, zone_id, now);
        }
    }

    fn occupied_zones(&self, player: PlayerId) -> Vec<ZoneRuntime> {
        self.sessions
            .get(&player)
            .map(|s| s.occupancy.iter().filter_map(|id| self.registry.get(id)).collect())
            .unwrap_or_default()
    }

    /// Highest-priority occupied zone. On a priority tie the zone entered
    /// first wins.
    pub fn resolve_active_zone(&self, player: PlayerId) -> Option<ZoneRuntime> {
        let mut active: Option<ZoneRuntime> = None;
        for zone in self.occupied_zones(player) {
            let replace = match &active {
                None => true,
                Some(current) => zone.priority() > current.priority(),
            };
            if replace {
                active = Some(zone);
            }
        }
        active
    }

    /// Walks occupied zones from the highest priority down, feeding each
    /// into `collect`, and stops below the first priority level containing a
    /// zone that excludes lower priorities.
    fn walk_visible(&self, player: PlayerId, mut collect: impl FnMut(&ZoneRuntime, &mut Vec<ItemId>)) -> Vec<ItemId> {
        let zones = self.occupied_zones(player);
        let mut priorities: Vec<i32> = zones.iter().map(|z| z.priority()).collect();
        priorities.sort_unstable_by(|a, b| b.cmp(a));
        priorities.dedup();

        let mut items = Vec::new();
        for priority in priorities {
            let mut stop = false;
            for zone in zones.iter().filter(|z| z.priority() == priority) {
                collect(zone, &mut items);
                stop |= zone.config.exclude_lower_priority;
            }
            if stop {
                break;
            }
        }
        items
    }

    fn push_unique(items: &mut Vec<ItemId>, new: &[ItemId]) {
        for item in new {
            if !items.contains(item) {
                items.push(item.clone());
            }
        }
    }

    /// Hidden items the player can currently see, highest priority first.
    pub fn resolve_visible_items(&self, player: PlayerId) -> Vec<ItemId> {
        self.walk_visible(player, |zone, items| Self::push_unique(items, &zone.config.hidden_items))
    }

    /// Base and current rotation items of the visible zones.
    pub fn visible_category_items(&self, player: PlayerId) -> Vec<ItemId> {
        self.walk_visible(player, |zone, items| {
            if !zone.config.exclude_base_items {
                Self::push_unique(items, &zone.config.base_items);
            }
            if let Some(state) = self.engine.state(player, zone.id()) {
                Self::push_unique(items, &state.current_items);
            }
        })
    }

    pub fn active_zone_summary(&self, player: PlayerId, now: Timestamp) -> Option<ActiveZoneSummary> {
        let zone = self.resolve_active_zone(player)?;
        let config = &zone.config;
        let state = self.engine.state(player, zone.id());

        let items = state
            .map(|s| {
                s.current_items
                    .iter()
                    .zip(&s.found_flags)
                    .map(|(item_id, found)| ZoneItemStatus {
                        item_id: item_id.clone(),
                        is_found: *found,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let reward_accepted = state.map_or(false, |s| s.reward_accepted);
        Some(ActiveZoneSummary {
            id: config.id.clone(),
            display_name: config.display_name.clone(),
            level: config.recommended_level,
            items,
            rewards: if reward_accepted {
                config.rewards.renewal
            } else {
                config.rewards.first_completion
            },
            completed: state.map_or(false, |s| s.is_complete()),
            renewal_cooldown_remaining_ms: state.map_or(0, |s| s.cooldown_remaining(now)),
        })
    }

    fn push_summary(&self, player: PlayerId, now: Timestamp) {
        self.notifications
            .send(player, Notification::ZoneSummary(self.active_zone_summary(player, now)));
    }

    // ========================================================================
    // Renewals
    // ========================================================================

    fn schedule_renewal(&mut self, player: PlayerId, zone_id: &str, due_at: Timestamp) {
        let Some(session) = self.sessions.get_mut(&player) else {
            return;
        };
        match session.pending.iter_mut().find(|p| p.zone_id == zone_id) {
            Some(entry) => {
                entry.due_at = due_at;
                entry.attempts = 0;
            }
            None => session.pending.push(PendingRenewal {
                zone_id: zone_id.to_string(),
                due_at,
                attempts: 0,
            }),
        }
    }

    /// Renews every rotation whose cooldown has passed. Failed renewals stay
    /// queued and are retried next tick.
    pub async fn tick(&mut self, now: Timestamp) {
        let mut due: Vec<(PlayerId, ZoneId)> = Vec::new();
        for player in self.online_players() {
            if let Some(session) = self.sessions.get(&player) {
                due.extend(
                    session
                        .pending
                        .iter()
                        .filter(|p| p.due_at <= now)
                        .map(|p| (player, p.zone_id.clone())),
                );
            }
        }

        for (player, zone_id) in due {
            let result = match self.registry.config(&zone_id) {
                Some(config) => self
                    .engine
                    .renew(player, &config, now)
                    .await
                    .map(|state| (state.cooldown_end_time, state.current_items.clone())),
                None => Err(RotationError::ZoneNotRegistered(zone_id.clone())),
            };

            match result {
                Ok((next_due, items)) => {
                    self.schedule_renewal(player, &zone_id, next_due);
                    self.notifications.send(
                        player,
                        Notification::ZoneRenewed {
                            zone_id: zone_id.clone(),
                            items,
                        },
                    );
                    if self.occupancy(player).contains(&zone_id) {
                        self.push_summary(player, now);
                    }
                }
                Err(e) => self.record_failed_attempt(player, &zone_id, &e),
            }
        }
    }

    fn record_failed_attempt(&mut self, player: PlayerId, zone_id: &str, err: &RotationError) {
        let Some(entry) = self
            .sessions
            .get_mut(&player)
            .and_then(|s| s.pending.iter_mut().find(|p| p.zone_id == zone_id))
        else {
            return;
        };

        entry.attempts += 1;
        if entry.attempts == 1 {
            warn!("Renewal of {} for {} failed, will retry: {}", zone_id, player, err);
        } else {
            debug!(
                "Renewal of {} for {} still failing after {} attempts: {}",
                zone_id, player, entry.attempts, err
            );
        }
    }

    // ========================================================================
    // Digging and completion
    // ========================================================================

    /// Marks an item found in the player's active zone.
    pub async fn record_dig(&mut self, player: PlayerId, item_id: &str, now: Timestamp) -> RotationResult<FoundOutcome> {
        let zone = self
            .resolve_active_zone(player)
            .ok_or(RotationError::NoActiveZone(player))?;

        let outcome = self.engine.mark_found(player, &zone.config, item_id).await?;
        match outcome {
            FoundOutcome::AlreadyFound => return Ok(outcome),
            FoundOutcome::Found => {}
            FoundOutcome::Completed(reward) => {
                info!("🏆 Player {} completed {} (first: {})", player, zone.id(), reward.first_completion);
                self.notifications.send(
                    player,
                    Notification::ZoneCompleted {
                        zone_id: zone.id().to_string(),
                        reward,
                    },
                );
            }
        }

        self.notifications.send(
            player,
            Notification::ItemFound {
                zone_id: zone.id().to_string(),
                item_id: item_id.to_string(),
            },
        );
        self.push_summary(player, now);
        Ok(outcome)
    }

    /// Completes a zone for a player regardless of what they found.
    pub async fn force_complete_zone(
        &mut self,
        player: PlayerId,
        zone_id: &str,
        now: Timestamp,
    ) -> RotationResult<CompletionReward> {
        let config = self
            .registry
            .config(zone_id)
            .ok_or_else(|| RotationError::ZoneNotRegistered(zone_id.to_string()))?;

        if self.engine.ensure(player, &config, now).await? {
            if let Some(due_at) = self.engine.state(player, zone_id).map(|s| s.cooldown_end_time) {
                self.schedule_renewal(player, zone_id, due_at);
            }
        }
        let reward = self.engine.complete(player, &config).await?;

        info!("🛠️ Force-completed {} for {}", zone_id, player);
        self.notifications.send(
            player,
            Notification::ZoneCompleted {
                zone_id: zone_id.to_string(),
                reward,
            },
        );
        self.push_summary(player, now);
        Ok(reward)
    }
}
