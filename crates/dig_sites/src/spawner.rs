//! World asset spawning for live events.
//!
//! The hosting simulation owns the actual entities; this module only sees
//! handles. Spawns and despawns are asynchronous and may take several ticks.

use crate::content::{AssetRef, EventDefinition};
use crate::error::SpawnResult;
use crate::types::ZoneId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    /// Decoration with no gameplay effect
    Prop,
    /// Dig spot attached to an event zone
    ShinySpot { zone_id: ZoneId },
}

/// A spawned world asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHandle {
    pub id: Uuid,
    pub asset_ref: String,
    pub kind: AssetKind,
}

impl AssetHandle {
    pub fn for_asset(asset: &AssetRef) -> Self {
        let kind = match &asset.zone_id {
            Some(zone_id) => AssetKind::ShinySpot {
                zone_id: zone_id.clone(),
            },
            None => AssetKind::Prop,
        };
        Self {
            id: Uuid::new_v4(),
            asset_ref: asset.asset.clone(),
            kind,
        }
    }
}

/// Spawn/despawn provider of the hosting simulation.
#[async_trait]
pub trait AssetSpawner: Send + Sync + std::fmt::Debug {
    /// Spawn every asset of an event
    async fn spawn(&self, event: &EventDefinition) -> SpawnResult<Vec<AssetHandle>>;

    /// Remove previously spawned assets
    async fn despawn(&self, handles: Vec<AssetHandle>) -> SpawnResult<()>;
}

/// Spawner that creates handles after a fixed delay, standing in for a
/// real world when running the server standalone.
#[derive(Debug, Clone, Default)]
pub struct TimedAssetSpawner {
    latency: Duration,
}

impl TimedAssetSpawner {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    async fn wait(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl AssetSpawner for TimedAssetSpawner {
    async fn spawn(&self, event: &EventDefinition) -> SpawnResult<Vec<AssetHandle>> {
        self.wait().await;
        let handles: Vec<AssetHandle> = event.assets.iter().map(AssetHandle::for_asset).collect();
        debug!("Spawned {} assets for event {}", handles.len(), event.id);
        Ok(handles)
    }

    async fn despawn(&self, handles: Vec<AssetHandle>) -> SpawnResult<()> {
        self.wait().await;
        debug!("Despawned {} assets", handles.len());
        Ok(())
    }
}
