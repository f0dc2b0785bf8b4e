//! Wires the rotation engine, zone tracker and event scheduler together.
//!
//! Everything is constructed once here and driven through `&mut self`, so
//! callbacks run strictly in call order and nothing needs a lock.

use crate::catalog::StaticCatalog;
use crate::content::ContentPack;
use crate::error::{RotationResult, SchedulerError};
use crate::notifications::{Envelope, NotificationEligibility, NotificationHub};
use crate::registry::{ZoneKind, ZoneRegistry, ZoneRuntime};
use crate::rng::RotationRng;
use crate::rotation::{CompletionReward, FoundOutcome, ZoneRotationEngine};
use crate::scheduler::{EventPhase, EventScheduler, SchedulerOverrides, SchedulerSettings};
use crate::spawner::AssetSpawner;
use crate::storage::RotationStore;
use crate::tracker::{ActiveZoneSummary, PlayerZoneTracker};
use crate::types::{EventId, ItemId, PlayerId, Timestamp, ZoneId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

/// Tuning for a service instance.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub scheduler: SchedulerSettings,
    /// Fixed seed for reproducible draws; entropy when unset
    pub rng_seed: Option<u64>,
}

/// Collaborators supplied by the host.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RotationStore>,
    pub spawner: Arc<dyn AssetSpawner>,
    pub eligibility: Arc<dyn NotificationEligibility>,
}

/// Snapshot for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub phase: EventPhase,
    pub current_event: Option<EventId>,
    pub next_transition_in_ms: u64,
    pub online_players: usize,
    pub registered_zones: Vec<ZoneId>,
}

#[derive(Debug)]
pub struct DigSiteService {
    tracker: PlayerZoneTracker,
    scheduler: EventScheduler,
}

impl DigSiteService {
    /// Builds the service and returns the receiving end of its notifications.
    pub fn new(
        content: ContentPack,
        config: ServiceConfig,
        collaborators: Collaborators,
        now: Timestamp,
    ) -> (Self, UnboundedReceiver<Envelope>) {
        let (rotation_rng, scheduler_rng) = match config.rng_seed {
            Some(seed) => (RotationRng::new(seed), RotationRng::new(seed.wrapping_add(1))),
            None => (RotationRng::from_entropy(), RotationRng::from_entropy()),
        };

        let registry = ZoneRegistry::new();
        for zone in content.zones {
            registry.register(ZoneRuntime::new(Arc::new(zone), ZoneKind::Static));
        }

        let (hub, receiver) = NotificationHub::channel();
        let catalog = Arc::new(StaticCatalog::new(&content.catalog));
        let engine = ZoneRotationEngine::new(collaborators.store, catalog, rotation_rng);
        let tracker = PlayerZoneTracker::new(registry.clone(), engine, hub.clone());
        let scheduler = EventScheduler::new(
            content.events,
            config.scheduler,
            collaborators.spawner,
            collaborators.eligibility,
            hub,
            registry.clone(),
            scheduler_rng,
            now,
        );

        info!("⛏️ Dig site service started with {} static zones", registry.len());
        (Self { tracker, scheduler }, receiver)
    }

    pub fn tracker(&self) -> &PlayerZoneTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// One simulation step: the scheduler first, so zones it registers or
    /// removes are visible to the tracker's renewals in the same tick.
    pub async fn tick(&mut self, now: Timestamp) {
        self.scheduler.tick(now, &mut self.tracker).await;
        self.tracker.tick(now).await;
    }

    pub async fn player_join(&mut self, player: PlayerId, now: Timestamp) {
        self.tracker.on_player_join(player, now).await;
        self.scheduler.on_player_join(player, now);
    }

    pub fn player_leave(&mut self, player: PlayerId) {
        self.tracker.on_player_leave(player);
    }

    /// Joins the player first when this is the first time they are seen.
    pub async fn zone_enter(&mut self, player: PlayerId, zone_id: &str, now: Timestamp) {
        if !self.tracker.is_online(player) && self.tracker.registry().contains(zone_id) {
            self.player_join(player, now).await;
        }
        self.tracker.on_zone_enter(player, zone_id, now).await;
    }

    pub fn zone_exit(&mut self, player: PlayerId, zone_id: &str, now: Timestamp) {
        self.tracker.on_zone_exit(player, zone_id, now);
    }

    pub async fn dig(&mut self, player: PlayerId, item_id: &str, now: Timestamp) -> RotationResult<FoundOutcome> {
        self.tracker.record_dig(player, item_id, now).await
    }

    pub fn active_zone_summary(&self, player: PlayerId, now: Timestamp) -> Option<ActiveZoneSummary> {
        self.tracker.active_zone_summary(player, now)
    }

    pub fn visible_hidden_items(&self, player: PlayerId) -> Vec<ItemId> {
        self.tracker.resolve_visible_items(player)
    }

    pub fn visible_category_items(&self, player: PlayerId) -> Vec<ItemId> {
        self.tracker.visible_category_items(player)
    }

    // Operator hooks

    pub async fn force_complete_zone(
        &mut self,
        player: PlayerId,
        zone_id: &str,
        now: Timestamp,
    ) -> RotationResult<CompletionReward> {
        self.tracker.force_complete_zone(player, zone_id, now).await
    }

    pub fn force_event(&mut self, event_id: &str) -> Result<(), SchedulerError> {
        self.scheduler.force_event(event_id)
    }

    pub fn overrides_mut(&mut self) -> &mut SchedulerOverrides {
        self.scheduler.overrides_mut()
    }

    pub async fn force_advance(&mut self, now: Timestamp) {
        self.scheduler.force_advance(now, &mut self.tracker).await;
    }

    pub fn status(&self, now: Timestamp) -> ServiceStatus {
        ServiceStatus {
            phase: self.scheduler.phase(),
            current_event: self.scheduler.current_event().map(|e| e.id.clone()),
            next_transition_in_ms: self.scheduler.next_transition().saturating_sub(now),
            online_players: self.tracker.online_players().len(),
            registered_zones: self.tracker.registry().zone_ids(),
        }
    }
}
