//! # Dig Sites
//!
//! Per-player reward rotation for dig zones and a scheduler for time-boxed
//! live events that add extra zones to the world while they run.
//!
//! ## Components
//!
//! - [`ZoneRotationEngine`] draws duplicate-free, rarity-tiered reward sets
//!   from per-tier shuffle-bags and persists them per player.
//! - [`PlayerZoneTracker`] knows which zones every online player stands in,
//!   picks the active zone by priority and renews rotations when their
//!   cooldowns run out.
//! - [`EventScheduler`] picks live events by weight, walks them through
//!   preview, active and ending phases, and registers or removes their
//!   zones in the shared [`ZoneRegistry`].
//!
//! [`DigSiteService`] builds all three once and routes host callbacks to
//! them in call order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dig_sites::*;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let content = ContentPack::load_from_file(Path::new("content/dig_sites.json")).await?;
//!     let collaborators = Collaborators {
//!         store: Arc::new(InMemoryRotationStore::new()),
//!         spawner: Arc::new(TimedAssetSpawner::new(Duration::from_millis(250))),
//!         eligibility: Arc::new(AlwaysEligible),
//!     };
//!
//!     let now = current_timestamp();
//!     let (mut service, mut notifications) =
//!         DigSiteService::new(content, ServiceConfig::default(), collaborators, now);
//!
//!     let player = PlayerId::new();
//!     service.player_join(player, now).await;
//!     service.zone_enter(player, "sunny_beach", now).await;
//!     service.tick(current_timestamp()).await;
//!
//!     while let Ok(envelope) = notifications.try_recv() {
//!         println!("{:?}", envelope.notification);
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod content;
pub mod error;
pub mod notifications;
pub mod registry;
pub mod rng;
pub mod rotation;
pub mod scheduler;
pub mod service;
pub mod spawner;
pub mod storage;
pub mod tracker;
pub mod types;

pub use catalog::{ItemCatalog, StaticCatalog};
pub use content::{
    AssetRef, CatalogData, ContentPack, CooldownRange, EventDefinition, NotificationTemplate, PhaseNotifications,
    ZoneConfig, ZoneRewardTable, ZoneRewards,
};
pub use error::{ContentError, RotationError, SchedulerError, SpawnError, StorageError};
pub use notifications::{AlwaysEligible, Envelope, EventNotification, Notification, NotificationEligibility};
pub use registry::{ZoneKind, ZoneRegistry, ZoneRuntime};
pub use rng::RotationRng;
pub use rotation::{CompletionReward, FoundOutcome, PlayerZoneRotationState, ZoneRotationEngine};
pub use scheduler::{EventPhase, EventScheduler, SchedulerOverrides, SchedulerSettings};
pub use service::{Collaborators, DigSiteService, ServiceConfig, ServiceStatus};
pub use spawner::{AssetHandle, AssetKind, AssetSpawner, TimedAssetSpawner};
pub use storage::{InMemoryRotationStore, JsonRotationStore, RotationStore, SAVE_FORMAT_VERSION};
pub use tracker::{ActiveZoneSummary, PlayerZoneTracker, ZoneItemStatus};
pub use types::{current_timestamp, EventId, ItemId, PlayerId, RarityTier, Timestamp, ZoneId};
