//! Live event scheduler.
//!
//! Runs one event at a time through
//! `Idle -> Preview -> Spawning -> Active -> EndingSoon -> Ended -> Despawning -> Idle`.
//! Each tick moves the machine by at most one phase, so a long gap between
//! ticks is caught up over the following ticks instead of skipping phases.
//!
//! Spawning and despawning are suspend points: the in-flight future lives
//! inside the lifecycle variant and is polled once per tick. While it is
//! pending no other transition can happen.

use crate::content::{CooldownRange, EventDefinition, NotificationTemplate};
use crate::error::{ContentError, ContentResult, SchedulerError, SpawnResult};
use crate::notifications::{EventNotification, Notification, NotificationEligibility, NotificationHub};
use crate::registry::{ZoneKind, ZoneRegistry, ZoneRuntime};
use crate::rng::RotationRng;
use crate::spawner::{AssetHandle, AssetKind, AssetSpawner};
use crate::tracker::PlayerZoneTracker;
use crate::types::{EventId, PlayerId, Timestamp};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, error, info, warn};

/// Publicly visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventPhase {
    Idle,
    Preview,
    Spawning,
    Active,
    EndingSoon,
    Ended,
    Despawning,
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventPhase::Idle => "idle",
            EventPhase::Preview => "preview",
            EventPhase::Spawning => "spawning",
            EventPhase::Active => "active",
            EventPhase::EndingSoon => "ending soon",
            EventPhase::Ended => "ended",
            EventPhase::Despawning => "despawning",
        };
        f.write_str(name)
    }
}

type SpawnTask = BoxFuture<'static, SpawnResult<Vec<AssetHandle>>>;
type DespawnTask = BoxFuture<'static, SpawnResult<()>>;

enum Lifecycle {
    Idle,
    Preview,
    Spawning(SpawnTask),
    Active,
    EndingSoon,
    Ended,
    Despawning(DespawnTask),
}

impl Lifecycle {
    fn phase(&self) -> EventPhase {
        match self {
            Lifecycle::Idle => EventPhase::Idle,
            Lifecycle::Preview => EventPhase::Preview,
            Lifecycle::Spawning(_) => EventPhase::Spawning,
            Lifecycle::Active => EventPhase::Active,
            Lifecycle::EndingSoon => EventPhase::EndingSoon,
            Lifecycle::Ended => EventPhase::Ended,
            Lifecycle::Despawning(_) => EventPhase::Despawning,
        }
    }
}

/// Scheduler tuning loaded from the server config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Weight of "no event this round" in the selection draw
    pub no_event_weight: f64,
    /// Time between an event ending and its assets being despawned
    pub despawn_delay_ms: u64,
    /// Delay before the first selection after startup
    pub initial_delay_ms: u64,
    /// Cooldown used when neither an override nor the event sets one
    pub default_cooldown: CooldownRange,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            no_event_weight: 0.0,
            despawn_delay_ms: 5_000,
            initial_delay_ms: 30_000,
            default_cooldown: CooldownRange {
                min_ms: 600_000,
                max_ms: 1_200_000,
            },
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> ContentResult<()> {
        if !self.no_event_weight.is_finite() || self.no_event_weight < 0.0 {
            return Err(ContentError::InvalidWeight {
                owner: "scheduler".to_string(),
                weight: self.no_event_weight,
            });
        }
        self.default_cooldown.validate("scheduler")
    }
}

/// Operator overrides. Each set value wins over content and settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerOverrides {
    /// Runs this event at the next selection, bypassing the draw
    pub forced_event: Option<EventId>,
    pub cooldown_ms: Option<u64>,
    pub preview_ms: Option<u64>,
    pub active_ms: Option<u64>,
    pub ending_soon_ms: Option<u64>,
}

/// Ids of the events that can win a weighted draw. Zero-weight events stay
/// reachable through [`EventScheduler::force_event`] only.
fn drawable_ids(events: &[Arc<EventDefinition>]) -> Vec<EventId> {
    events.iter().filter(|e| e.weight > 0.0).map(|e| e.id.clone()).collect()
}

/// Draws one entry from `{no event} ∪ events`.
///
/// Returns the index into `event_weights`, or `None` when "no event" wins
/// or every weight is zero.
pub fn weighted_pick(no_event_weight: f64, event_weights: &[f64], rng: &mut RotationRng) -> Option<usize> {
    let mut weights = Vec::with_capacity(event_weights.len() + 1);
    weights.push(no_event_weight);
    weights.extend_from_slice(event_weights);

    match rng.choose_weighted(&weights) {
        Some(0) | None => None,
        Some(index) => Some(index - 1),
    }
}

pub struct EventScheduler {
    events: Vec<Arc<EventDefinition>>,
    settings: SchedulerSettings,
    overrides: SchedulerOverrides,
    spawner: Arc<dyn AssetSpawner>,
    eligibility: Arc<dyn NotificationEligibility>,
    notifications: NotificationHub,
    registry: ZoneRegistry,
    rng: RotationRng,

    lifecycle: Lifecycle,
    current: Option<Arc<EventDefinition>>,
    /// Held back from the next draw after a pool refill
    last_event: Option<EventId>,
    assets: Vec<AssetHandle>,
    next_transition: Timestamp,
    active_ends_at: Timestamp,
    /// Events not yet run in this rotation
    remaining: Vec<EventId>,
}

impl fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventScheduler")
            .field("phase", &self.lifecycle.phase())
            .field("current", &self.current.as_ref().map(|e| &e.id))
            .field("next_transition", &self.next_transition)
            .field("remaining", &self.remaining)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

impl EventScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: Vec<EventDefinition>,
        settings: SchedulerSettings,
        spawner: Arc<dyn AssetSpawner>,
        eligibility: Arc<dyn NotificationEligibility>,
        notifications: NotificationHub,
        registry: ZoneRegistry,
        rng: RotationRng,
        now: Timestamp,
    ) -> Self {
        let events: Vec<Arc<EventDefinition>> = events.into_iter().map(Arc::new).collect();
        let remaining = drawable_ids(&events);
        let next_transition = now + settings.initial_delay_ms;

        info!(
            "📅 Event scheduler ready with {} events, first selection in {}ms",
            events.len(),
            settings.initial_delay_ms
        );

        Self {
            events,
            settings,
            overrides: SchedulerOverrides::default(),
            spawner,
            eligibility,
            notifications,
            registry,
            rng,
            lifecycle: Lifecycle::Idle,
            current: None,
            last_event: None,
            assets: Vec::new(),
            next_transition,
            active_ends_at: 0,
            remaining,
        }
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    pub fn phase(&self) -> EventPhase {
        self.lifecycle.phase()
    }

    pub fn current_event(&self) -> Option<&EventDefinition> {
        self.current.as_deref()
    }

    pub fn assets(&self) -> &[AssetHandle] {
        &self.assets
    }

    pub fn next_transition(&self) -> Timestamp {
        self.next_transition
    }

    pub fn remaining_pool(&self) -> &[EventId] {
        &self.remaining
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn overrides(&self) -> &SchedulerOverrides {
        &self.overrides
    }

    /// Time left until the running event ends.
    pub fn remaining_active_ms(&self, now: Timestamp) -> Option<u64> {
        match self.phase() {
            EventPhase::Active | EventPhase::EndingSoon => Some(self.active_ends_at.saturating_sub(now)),
            _ => None,
        }
    }

    fn event(&self, id: &str) -> Option<Arc<EventDefinition>> {
        self.events.iter().find(|e| e.id == id).cloned()
    }

    // ========================================================================
    // Operator hooks
    // ========================================================================

    /// Makes `event_id` the next event to run.
    pub fn force_event(&mut self, event_id: &str) -> Result<(), SchedulerError> {
        if self.event(event_id).is_none() {
            return Err(SchedulerError::UnknownEvent(event_id.to_string()));
        }
        info!("🛠️ Forcing event {} to run next", event_id);
        self.overrides.forced_event = Some(event_id.to_string());
        Ok(())
    }

    pub fn set_overrides(&mut self, overrides: SchedulerOverrides) {
        self.overrides = overrides;
    }

    pub fn overrides_mut(&mut self) -> &mut SchedulerOverrides {
        &mut self.overrides
    }

    /// Treats the current deadline as reached and advances one phase now.
    pub async fn force_advance(&mut self, now: Timestamp, tracker: &mut PlayerZoneTracker) {
        if matches!(self.phase(), EventPhase::Spawning | EventPhase::Despawning) {
            warn!("Cannot force-advance while assets are {}", self.phase());
            return;
        }
        self.next_transition = now;
        self.tick(now, tracker).await;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Sends the running event's remaining time to a player who just joined.
    pub fn on_player_join(&self, player: PlayerId, now: Timestamp) {
        if self.phase() != EventPhase::Active {
            return;
        }
        let Some(event) = &self.current else {
            return;
        };
        if !self.eligibility.is_eligible(&player) {
            return;
        }

        self.notifications.send(
            player,
            Notification::Event(EventNotification::from_template(
                &event.id,
                EventPhase::Active,
                &event.notifications.active,
                self.remaining_active_ms(now),
            )),
        );
    }

    /// Advances the lifecycle by at most one phase.
    pub async fn tick(&mut self, now: Timestamp, tracker: &mut PlayerZoneTracker) {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Idle) {
            Lifecycle::Spawning(mut task) => {
                match futures::poll!(&mut task) {
                    Poll::Pending => self.lifecycle = Lifecycle::Spawning(task),
                    Poll::Ready(result) => self.finish_spawn(result, now, tracker),
                }
                return;
            }
            Lifecycle::Despawning(mut task) => {
                match futures::poll!(&mut task) {
                    Poll::Pending => self.lifecycle = Lifecycle::Despawning(task),
                    Poll::Ready(result) => self.finish_despawn(result, now),
                }
                return;
            }
            other => self.lifecycle = other,
        }

        if now < self.next_transition {
            return;
        }

        match self.phase() {
            EventPhase::Idle => self.select_next(now, tracker),
            EventPhase::Preview => self.begin_spawn(now, tracker).await,
            EventPhase::Active => self.begin_ending_soon(now, tracker),
            EventPhase::EndingSoon => self.end_event(now, tracker),
            EventPhase::Ended => self.begin_despawn(now).await,
            EventPhase::Spawning | EventPhase::Despawning => {}
        }
    }

    fn select_next(&mut self, now: Timestamp, tracker: &PlayerZoneTracker) {
        let Some(event) = self.draw_next() else {
            let cooldown = self.roll_cooldown(None);
            self.next_transition = now + cooldown;
            info!("💤 No event this round, next selection in {}ms", cooldown);
            return;
        };

        let (preview, _, _) = self.durations(&event);
        self.next_transition = now + preview;
        self.lifecycle = Lifecycle::Preview;
        info!("🎪 Event {} selected, starting in {}ms", event.id, preview);

        self.broadcast(&event, EventPhase::Preview, &event.notifications.preview, None, tracker);
        self.current = Some(event);
    }

    /// Draws the next event from the pool, or `None` for a quiet round.
    fn draw_next(&mut self) -> Option<Arc<EventDefinition>> {
        if let Some(forced) = self.overrides.forced_event.take() {
            self.remaining.retain(|id| *id != forced);
            return self.event(&forced);
        }
        if self.events.is_empty() {
            return None;
        }

        // Zero-weight events never win a draw, so they do not hold the pool open
        if self.remaining.is_empty() {
            self.remaining = drawable_ids(&self.events);
            debug!("Event pool refilled with {} events", self.remaining.len());
        }

        let mut eligible: Vec<Arc<EventDefinition>> = self
            .remaining
            .iter()
            .filter(|id| self.last_event.as_ref() != Some(*id))
            .filter_map(|id| self.event(id))
            .collect();
        if eligible.is_empty() {
            eligible = self.remaining.iter().filter_map(|id| self.event(id)).collect();
        }

        let weights: Vec<f64> = eligible.iter().map(|e| e.weight).collect();
        let picked = weighted_pick(self.settings.no_event_weight, &weights, &mut self.rng)?;
        let event = Arc::clone(&eligible[picked]);
        self.remaining.retain(|id| *id != event.id);
        Some(event)
    }

    async fn begin_spawn(&mut self, now: Timestamp, tracker: &mut PlayerZoneTracker) {
        let Some(event) = self.current.clone() else {
            warn!("Preview without a selected event, returning to idle");
            self.enter_idle(now);
            return;
        };

        info!("🏗️ Spawning assets for event {}", event.id);
        let spawner = Arc::clone(&self.spawner);
        let mut task: SpawnTask = async move { spawner.spawn(&event).await }.boxed();

        match futures::poll!(&mut task) {
            Poll::Pending => self.lifecycle = Lifecycle::Spawning(task),
            Poll::Ready(result) => self.finish_spawn(result, now, tracker),
        }
    }

    fn finish_spawn(&mut self, result: SpawnResult<Vec<AssetHandle>>, now: Timestamp, tracker: &PlayerZoneTracker) {
        let Some(event) = self.current.clone() else {
            self.enter_idle(now);
            return;
        };

        let handles = match result {
            Ok(handles) => handles,
            Err(e) => {
                error!("Abandoning event {}: {}", event.id, e);
                self.last_event = Some(event.id.clone());
                self.enter_idle(now);
                return;
            }
        };

        for zone in &event.zones {
            self.registry.register(ZoneRuntime::new(
                Arc::new(zone.clone()),
                ZoneKind::LiveEvent {
                    event_id: event.id.clone(),
                },
            ));
        }
        for handle in &handles {
            if let AssetKind::ShinySpot { zone_id } = &handle.kind {
                if !self.registry.add_shiny_spot(zone_id, handle.id.to_string()) {
                    warn!("Event {} spawned a shiny spot for unknown zone {}", event.id, zone_id);
                }
            }
        }
        self.assets = handles;

        let (_, active, ending_soon) = self.durations(&event);
        self.active_ends_at = now + active;
        self.next_transition = now + (active - ending_soon);
        self.lifecycle = Lifecycle::Active;
        info!("🚀 Event {} is live for {}ms", event.id, active);

        self.broadcast(&event, EventPhase::Active, &event.notifications.active, Some(active), tracker);
    }

    fn begin_ending_soon(&mut self, now: Timestamp, tracker: &PlayerZoneTracker) {
        let Some(event) = self.current.clone() else {
            self.enter_idle(now);
            return;
        };

        let (_, _, ending_soon) = self.durations(&event);
        self.next_transition = now + ending_soon;
        self.lifecycle = Lifecycle::EndingSoon;
        info!("⏳ Event {} ending soon", event.id);

        self.broadcast(
            &event,
            EventPhase::EndingSoon,
            &event.notifications.ending_soon,
            self.remaining_active_ms(now),
            tracker,
        );
    }

    fn end_event(&mut self, now: Timestamp, tracker: &mut PlayerZoneTracker) {
        let Some(event) = self.current.clone() else {
            self.enter_idle(now);
            return;
        };

        for zone in &event.zones {
            tracker.evict_zone(&zone.id, now);
            self.registry.unregister(&zone.id);
        }

        self.last_event = Some(event.id.clone());
        self.next_transition = now + self.settings.despawn_delay_ms;
        self.lifecycle = Lifecycle::Ended;
        info!("🏁 Event {} ended", event.id);

        self.broadcast(&event, EventPhase::Ended, &event.notifications.ended, None, tracker);
    }

    async fn begin_despawn(&mut self, now: Timestamp) {
        let handles = std::mem::take(&mut self.assets);
        debug!("Despawning {} event assets", handles.len());
        let spawner = Arc::clone(&self.spawner);
        let mut task: DespawnTask = async move { spawner.despawn(handles).await }.boxed();

        match futures::poll!(&mut task) {
            Poll::Pending => self.lifecycle = Lifecycle::Despawning(task),
            Poll::Ready(result) => self.finish_despawn(result, now),
        }
    }

    fn finish_despawn(&mut self, result: SpawnResult<()>, now: Timestamp) {
        if let Err(e) = result {
            error!("Event asset despawn failed: {}", e);
        }
        self.enter_idle(now);
    }

    /// Clears the current event and waits out its cooldown.
    fn enter_idle(&mut self, now: Timestamp) {
        let event = self.current.take();
        let cooldown = self.roll_cooldown(event.as_deref());
        self.next_transition = now + cooldown;
        self.lifecycle = Lifecycle::Idle;
        debug!("Next event selection in {}ms", cooldown);
    }

    /// Override, then the event's own range, then the default range.
    fn roll_cooldown(&mut self, event: Option<&EventDefinition>) -> u64 {
        if let Some(ms) = self.overrides.cooldown_ms {
            return ms;
        }
        let range = event
            .and_then(|e| e.cooldown)
            .unwrap_or(self.settings.default_cooldown);
        self.rng.gen_range_u64(range.min_ms, range.max_ms)
    }

    /// Preview, active and ending-soon durations after overrides. The
    /// ending-soon window never exceeds the active duration.
    fn durations(&self, event: &EventDefinition) -> (u64, u64, u64) {
        let preview = self.overrides.preview_ms.unwrap_or(event.preview_duration_ms);
        let active = self.overrides.active_ms.unwrap_or(event.active_duration_ms);
        let ending_soon = self
            .overrides
            .ending_soon_ms
            .unwrap_or(event.ending_soon_duration_ms)
            .min(active);
        (preview, active, ending_soon)
    }

    fn broadcast(
        &self,
        event: &EventDefinition,
        phase: EventPhase,
        template: &NotificationTemplate,
        remaining_ms: Option<u64>,
        tracker: &PlayerZoneTracker,
    ) {
        let mut sent = 0;
        for player in tracker.online_players() {
            if !self.eligibility.is_eligible(&player) {
                continue;
            }
            self.notifications.send(
                player,
                Notification::Event(EventNotification::from_template(&event.id, phase, template, remaining_ms)),
            );
            sent += 1;
        }
        debug!("Event {} {} notification sent to {} players", event.id, phase, sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::content::fixtures::{event, zone};
    use crate::content::AssetRef;
    use crate::error::SpawnError;
    use crate::notifications::{AlwaysEligible, Envelope};
    use crate::rotation::ZoneRotationEngine;
    use crate::spawner::TimedAssetSpawner;
    use crate::storage::InMemoryRotationStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    const FAR: Timestamp = 1_000_000_000;

    /// Spawns stay pending until `released` is set. Despawns wait on
    /// `despawn_released` when one is given.
    #[derive(Debug, Default)]
    struct GatedSpawner {
        released: Arc<AtomicBool>,
        despawn_released: Option<Arc<AtomicBool>>,
    }

    async fn wait_for(flag: Arc<AtomicBool>) {
        futures::future::poll_fn(move |_| {
            if flag.load(Ordering::SeqCst) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    #[async_trait]
    impl AssetSpawner for GatedSpawner {
        async fn spawn(&self, event: &EventDefinition) -> SpawnResult<Vec<AssetHandle>> {
            wait_for(Arc::clone(&self.released)).await;
            Ok(event.assets.iter().map(AssetHandle::for_asset).collect())
        }

        async fn despawn(&self, _handles: Vec<AssetHandle>) -> SpawnResult<()> {
            if let Some(flag) = &self.despawn_released {
                wait_for(Arc::clone(flag)).await;
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FailingSpawner;

    #[async_trait]
    impl AssetSpawner for FailingSpawner {
        async fn spawn(&self, event: &EventDefinition) -> SpawnResult<Vec<AssetHandle>> {
            Err(SpawnError::Spawn(event.id.clone(), "no room".into()))
        }

        async fn despawn(&self, _handles: Vec<AssetHandle>) -> SpawnResult<()> {
            Err(SpawnError::Despawn("nothing to remove".into()))
        }
    }

    struct Harness {
        scheduler: EventScheduler,
        tracker: PlayerZoneTracker,
        rx: UnboundedReceiver<Envelope>,
    }

    impl Harness {
        fn new(
            events: Vec<EventDefinition>,
            settings: SchedulerSettings,
            spawner: Arc<dyn AssetSpawner>,
            eligibility: Arc<dyn NotificationEligibility>,
        ) -> Self {
            let registry = ZoneRegistry::new();
            let (hub, rx) = NotificationHub::channel();
            let engine = ZoneRotationEngine::new(
                Arc::new(InMemoryRotationStore::new()),
                Arc::new(StaticCatalog::default()),
                RotationRng::new(1),
            );
            let tracker = PlayerZoneTracker::new(registry.clone(), engine, hub.clone());
            let scheduler = EventScheduler::new(
                events,
                settings,
                spawner,
                eligibility,
                hub,
                registry,
                RotationRng::new(17),
                0,
            );
            Self { scheduler, tracker, rx }
        }

        fn simple(events: Vec<EventDefinition>) -> Self {
            Self::new(
                events,
                quick_settings(),
                Arc::new(TimedAssetSpawner::default()),
                Arc::new(AlwaysEligible),
            )
        }

        async fn step(&mut self, now: Timestamp) -> EventPhase {
            self.scheduler.tick(now, &mut self.tracker).await;
            self.scheduler.phase()
        }

        fn drain_events(&mut self) -> Vec<(PlayerId, EventNotification)> {
            let mut out = Vec::new();
            while let Ok(envelope) = self.rx.try_recv() {
                if let Notification::Event(n) = envelope.notification {
                    out.push((envelope.player, n));
                }
            }
            out
        }

        /// Ticks with large gaps, returning the id of every event that
        /// entered preview.
        async fn run_selections(&mut self, count: usize) -> Vec<EventId> {
            let mut picked = Vec::new();
            let mut now = 0;
            while picked.len() < count {
                now += FAR;
                let before = self.scheduler.phase();
                let after = self.step(now).await;
                if before == EventPhase::Idle && after == EventPhase::Preview {
                    picked.push(self.scheduler.current_event().unwrap().id.clone());
                }
            }
            picked
        }
    }

    fn quick_settings() -> SchedulerSettings {
        SchedulerSettings {
            no_event_weight: 0.0,
            default_cooldown: CooldownRange::fixed(5_000),
            despawn_delay_ms: 1_000,
            initial_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_tick_advances_one_phase_at_a_time() {
        let mut h = Harness::simple(vec![event("solo", 1.0)]);

        let mut phases = Vec::new();
        for k in 1..=6 {
            phases.push(h.step(FAR * k).await);
        }

        assert_eq!(
            phases,
            vec![
                EventPhase::Preview,
                EventPhase::Active,
                EventPhase::EndingSoon,
                EventPhase::Ended,
                EventPhase::Idle,
                EventPhase::Preview,
            ]
        );
    }

    #[tokio::test]
    async fn test_deadlines_gate_transitions() {
        let mut h = Harness::simple(vec![event("solo", 1.0)]);

        assert_eq!(h.step(0).await, EventPhase::Preview);
        assert_eq!(h.scheduler.next_transition(), 1_000);
        assert_eq!(h.step(999).await, EventPhase::Preview);

        assert_eq!(h.step(1_000).await, EventPhase::Active);
        assert_eq!(h.scheduler.next_transition(), 1_000 + 10_000 - 2_000);
        assert_eq!(h.scheduler.remaining_active_ms(3_000), Some(8_000));

        assert_eq!(h.step(9_000).await, EventPhase::EndingSoon);
        assert_eq!(h.scheduler.next_transition(), 11_000);

        assert_eq!(h.step(11_000).await, EventPhase::Ended);
        assert_eq!(h.scheduler.next_transition(), 12_000);

        assert_eq!(h.step(12_000).await, EventPhase::Idle);
        assert_eq!(h.scheduler.next_transition(), 17_000);
        assert!(h.scheduler.current_event().is_none());
    }

    #[test]
    fn test_weighted_pick_matches_weights() {
        let mut rng = RotationRng::new(2024);
        let weights = [1.0, 3.0, 6.0];
        let trials = 100_000;
        let mut counts = [0usize; 3];

        for _ in 0..trials {
            let index = weighted_pick(0.0, &weights, &mut rng).unwrap();
            counts[index] += 1;
        }

        for (count, expected) in counts.iter().zip([0.1, 0.3, 0.6]) {
            let observed = *count as f64 / trials as f64;
            assert!((observed - expected).abs() < 0.01, "observed {observed}, expected {expected}");
        }
    }

    #[test]
    fn test_no_event_weight_competes_in_the_draw() {
        let mut rng = RotationRng::new(9);
        assert_eq!(weighted_pick(1.0, &[0.0, 0.0], &mut rng), None);
        assert_eq!(weighted_pick(0.0, &[0.0], &mut rng), None);
        assert_eq!(weighted_pick(0.0, &[0.0, 2.0], &mut rng), Some(1));

        let quiet = (0..10_000)
            .filter(|_| weighted_pick(1.0, &[1.0], &mut rng).is_none())
            .count();
        assert!((4_500..5_500).contains(&quiet));
    }

    #[tokio::test]
    async fn test_pool_runs_every_event_before_repeating() {
        let mut h = Harness::simple(vec![event("a", 1.0), event("b", 5.0), event("c", 1.0)]);
        let picked = h.run_selections(30).await;

        for window in picked.windows(2) {
            assert_ne!(window[0], window[1], "immediate repeat in {:?}", picked);
        }
        for rotation in picked.chunks(3) {
            let mut ids = rotation.to_vec();
            ids.sort();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn test_zero_weight_events_do_not_stall_the_pool() {
        let mut h = Harness::simple(vec![event("a", 1.0), event("z", 0.0)]);
        assert_eq!(h.scheduler.remaining_pool(), &["a".to_string()]);

        assert_eq!(h.run_selections(5).await, vec!["a"; 5]);
        assert!(!h.scheduler.remaining_pool().contains(&"z".to_string()));
    }

    #[tokio::test]
    async fn test_single_event_repeats() {
        let mut h = Harness::simple(vec![event("solo", 1.0)]);
        assert_eq!(h.run_selections(3).await, vec!["solo", "solo", "solo"]);
    }

    #[tokio::test]
    async fn test_quiet_rounds_use_default_cooldown() {
        let mut settings = quick_settings();
        settings.no_event_weight = 1.0;
        let mut h = Harness::new(
            vec![event("never", 0.0)],
            settings,
            Arc::new(TimedAssetSpawner::default()),
            Arc::new(AlwaysEligible),
        );

        assert_eq!(h.step(100).await, EventPhase::Idle);
        assert_eq!(h.scheduler.next_transition(), 5_100);
        assert!(h.scheduler.current_event().is_none());
    }

    #[tokio::test]
    async fn test_forced_event_bypasses_the_draw() {
        let mut h = Harness::simple(vec![event("common", 10.0), event("rare", 0.0)]);

        assert!(matches!(
            h.scheduler.force_event("missing"),
            Err(SchedulerError::UnknownEvent(_))
        ));
        h.scheduler.force_event("rare").unwrap();

        assert_eq!(h.step(0).await, EventPhase::Preview);
        assert_eq!(h.scheduler.current_event().unwrap().id, "rare");
        assert!(h.scheduler.overrides().forced_event.is_none());
        assert_eq!(h.scheduler.remaining_pool(), &["common".to_string()]);
    }

    #[tokio::test]
    async fn test_cooldown_override_beats_event_range() {
        let mut ev = event("storm", 1.0);
        ev.cooldown = Some(CooldownRange::fixed(50_000));
        let mut h = Harness::simple(vec![ev]);

        for k in 1..=5 {
            h.step(FAR * k).await;
        }
        assert_eq!(h.scheduler.phase(), EventPhase::Idle);
        assert_eq!(h.scheduler.next_transition(), FAR * 5 + 50_000);

        h.scheduler.overrides_mut().cooldown_ms = Some(1_234);
        for k in 6..=10 {
            h.step(FAR * k).await;
        }
        assert_eq!(h.scheduler.phase(), EventPhase::Idle);
        assert_eq!(h.scheduler.next_transition(), FAR * 10 + 1_234);
    }

    #[tokio::test]
    async fn test_duration_overrides() {
        let mut h = Harness::simple(vec![event("storm", 1.0)]);
        h.scheduler.set_overrides(SchedulerOverrides {
            preview_ms: Some(10),
            active_ms: Some(500),
            ending_soon_ms: Some(9_999),
            ..Default::default()
        });

        h.step(0).await;
        assert_eq!(h.scheduler.next_transition(), 10);
        h.step(10).await;
        // Ending-soon is clamped to the active duration
        assert_eq!(h.scheduler.next_transition(), 10);
        assert_eq!(h.step(10).await, EventPhase::EndingSoon);
        assert_eq!(h.scheduler.next_transition(), 510);
    }

    #[tokio::test]
    async fn test_pending_spawn_defers_transitions() {
        let mut ev = event("meteor", 1.0);
        ev.zones.push(zone("crater", 9));
        ev.assets.push(AssetRef {
            asset: "glint".into(),
            zone_id: Some("crater".into()),
        });

        let spawner = Arc::new(GatedSpawner::default());
        let released = Arc::clone(&spawner.released);
        let mut h = Harness::new(vec![ev], quick_settings(), spawner, Arc::new(AlwaysEligible));

        assert_eq!(h.step(FAR).await, EventPhase::Preview);
        assert_eq!(h.step(FAR * 2).await, EventPhase::Spawning);
        for k in 3..6 {
            assert_eq!(h.step(FAR * k).await, EventPhase::Spawning);
        }
        assert!(!h.tracker.registry().contains("crater"));

        h.scheduler.force_advance(FAR * 6, &mut h.tracker).await;
        assert_eq!(h.scheduler.phase(), EventPhase::Spawning);

        released.store(true, Ordering::SeqCst);
        assert_eq!(h.step(FAR * 7).await, EventPhase::Active);
        assert_eq!(h.scheduler.next_transition(), FAR * 7 + 8_000);

        let crater = h.tracker.registry().get("crater").unwrap();
        assert!(crater.is_live_event());
        assert_eq!(crater.shiny_spots, vec![h.scheduler.assets()[0].id.to_string()]);
    }

    #[tokio::test]
    async fn test_pending_despawn_defers_transitions() {
        let despawn_released = Arc::new(AtomicBool::new(false));
        let spawner = Arc::new(GatedSpawner {
            released: Arc::new(AtomicBool::new(true)),
            despawn_released: Some(Arc::clone(&despawn_released)),
        });
        let mut h = Harness::new(vec![event("storm", 1.0)], quick_settings(), spawner, Arc::new(AlwaysEligible));

        assert_eq!(h.step(FAR).await, EventPhase::Preview);
        assert_eq!(h.step(FAR * 2).await, EventPhase::Active);
        assert_eq!(h.step(FAR * 3).await, EventPhase::EndingSoon);
        assert_eq!(h.step(FAR * 4).await, EventPhase::Ended);
        assert_eq!(h.step(FAR * 5).await, EventPhase::Despawning);
        for k in 6..9 {
            assert_eq!(h.step(FAR * k).await, EventPhase::Despawning);
        }

        h.scheduler.force_advance(FAR * 9, &mut h.tracker).await;
        assert_eq!(h.scheduler.phase(), EventPhase::Despawning);
        assert_eq!(h.scheduler.current_event().unwrap().id, "storm");

        despawn_released.store(true, Ordering::SeqCst);
        assert_eq!(h.step(FAR * 10).await, EventPhase::Idle);
        assert!(h.scheduler.current_event().is_none());
        assert_eq!(h.scheduler.next_transition(), FAR * 10 + 5_000);
    }

    #[tokio::test]
    async fn test_spawn_failure_abandons_the_event() {
        let mut ev = event("meteor", 1.0);
        ev.zones.push(zone("crater", 9));
        let mut h = Harness::new(
            vec![ev],
            quick_settings(),
            Arc::new(FailingSpawner),
            Arc::new(AlwaysEligible),
        );

        h.step(0).await;
        assert_eq!(h.step(1_000).await, EventPhase::Idle);
        assert!(h.scheduler.current_event().is_none());
        assert_eq!(h.scheduler.next_transition(), 6_000);
        assert!(!h.tracker.registry().contains("crater"));
    }

    #[tokio::test]
    async fn test_event_end_evicts_and_unregisters_zones() {
        let mut ev = event("meteor", 1.0);
        ev.zones.push(zone("crater", 9));
        let mut h = Harness::simple(vec![ev]);
        let player = PlayerId::new();
        h.tracker.on_player_join(player, 0).await;

        h.step(0).await;
        h.step(1_000).await;
        assert!(h.tracker.registry().contains("crater"));

        h.tracker.on_zone_enter(player, "crater", 2_000).await;
        assert_eq!(h.tracker.resolve_active_zone(player).unwrap().id(), "crater");

        h.step(9_000).await;
        assert_eq!(h.step(11_000).await, EventPhase::Ended);
        assert!(h.tracker.occupancy(player).is_empty());
        assert!(!h.tracker.registry().contains("crater"));
        assert!(h.tracker.resolve_active_zone(player).is_none());
    }

    #[tokio::test]
    async fn test_notifications_respect_eligibility() {
        let onboarded = PlayerId::new();
        let newcomer = PlayerId::new();
        let eligibility: Arc<dyn NotificationEligibility> = Arc::new(move |p: &PlayerId| *p == onboarded);

        let mut ev = event("meteor", 1.0);
        ev.notifications.preview.message = "Something approaches".into();
        ev.notifications.active.color_ref = Some("gold".into());
        let mut h = Harness::new(vec![ev], quick_settings(), Arc::new(TimedAssetSpawner::default()), eligibility);

        h.tracker.on_player_join(onboarded, 0).await;
        h.tracker.on_player_join(newcomer, 0).await;

        h.step(0).await;
        let sent = h.drain_events();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, onboarded);
        assert_eq!(sent[0].1.phase, EventPhase::Preview);
        assert_eq!(sent[0].1.message, "Something approaches");

        h.step(1_000).await;
        let sent = h.drain_events();
        assert_eq!(sent[0].1.phase, EventPhase::Active);
        assert_eq!(sent[0].1.remaining_ms, Some(10_000));
        assert_eq!(sent[0].1.color_ref.as_deref(), Some("gold"));

        let mut per_phase: HashMap<EventPhase, usize> = HashMap::new();
        for k in [9_000, 11_000] {
            h.step(k).await;
            for (_, n) in h.drain_events() {
                *per_phase.entry(n.phase).or_default() += 1;
            }
        }
        assert_eq!(per_phase.get(&EventPhase::EndingSoon), Some(&1));
        assert_eq!(per_phase.get(&EventPhase::Ended), Some(&1));
    }

    #[tokio::test]
    async fn test_late_joiner_gets_remaining_time() {
        let mut h = Harness::simple(vec![event("meteor", 1.0)]);
        h.step(0).await;

        let early = PlayerId::new();
        h.scheduler.on_player_join(early, 500);
        assert!(h.drain_events().is_empty());

        h.step(1_000).await;
        h.drain_events();

        let late = PlayerId::new();
        h.scheduler.on_player_join(late, 4_000);
        let sent = h.drain_events();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, late);
        assert_eq!(sent[0].1.remaining_ms, Some(7_000));
    }

    #[tokio::test]
    async fn test_force_advance_skips_the_wait() {
        let mut settings = quick_settings();
        settings.initial_delay_ms = 60_000;
        let mut h = Harness::new(
            vec![event("storm", 1.0)],
            settings,
            Arc::new(TimedAssetSpawner::default()),
            Arc::new(AlwaysEligible),
        );

        assert_eq!(h.step(10).await, EventPhase::Idle);
        h.scheduler.force_advance(10, &mut h.tracker).await;
        assert_eq!(h.scheduler.phase(), EventPhase::Preview);
    }

    #[tokio::test]
    async fn test_failed_despawn_still_returns_to_idle() {
        let mut h = Harness::simple(vec![event("storm", 1.0)]);
        h.step(0).await;
        h.step(1_000).await;
        h.step(9_000).await;
        h.step(11_000).await;

        h.scheduler.spawner = Arc::new(FailingSpawner);
        assert_eq!(h.step(12_000).await, EventPhase::Idle);
    }

    #[test]
    fn test_settings_validation() {
        assert!(SchedulerSettings::default().validate().is_ok());

        let mut settings = SchedulerSettings::default();
        settings.no_event_weight = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = SchedulerSettings::default();
        settings.default_cooldown = CooldownRange { min_ms: 2, max_ms: 1 };
        assert!(settings.validate().is_err());
    }
}
