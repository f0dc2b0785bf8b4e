//! Registry of zones that currently exist in the world.
//!
//! Static zones are registered once at startup. Live event zones are
//! registered by the event scheduler while their event is active and
//! removed when it ends. The registry is a cheap-clone handle so the
//! tracker and the scheduler can share it.

use crate::content::ZoneConfig;
use crate::types::{EventId, ZoneId};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Where a zone comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneKind {
    /// Authored into the world, never removed
    Static,
    /// Exists only while its live event is active
    LiveEvent { event_id: EventId },
}

/// A zone instance in the world.
#[derive(Debug, Clone)]
pub struct ZoneRuntime {
    pub config: Arc<ZoneConfig>,
    pub kind: ZoneKind,
    pub shiny_spots: Vec<String>,
}

impl ZoneRuntime {
    pub fn new(config: Arc<ZoneConfig>, kind: ZoneKind) -> Self {
        let shiny_spots = config.shiny_spots.clone();
        Self {
            config,
            kind,
            shiny_spots,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn is_live_event(&self) -> bool {
        match self.kind {
            ZoneKind::Static => false,
            ZoneKind::LiveEvent { .. } => true,
        }
    }
}

/// Shared handle to the zones currently registered.
#[derive(Debug, Clone, Default)]
pub struct ZoneRegistry {
    zones: Arc<DashMap<ZoneId, ZoneRuntime>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a zone. Zone ids are unique; a clash is logged and the
    /// existing zone kept.
    pub fn register(&self, zone: ZoneRuntime) -> bool {
        let id = zone.id().to_string();
        if self.zones.contains_key(&id) {
            error!("Zone {} is already registered, ignoring duplicate", id);
            return false;
        }
        debug!("Registered zone {} ({:?})", id, zone.kind);
        self.zones.insert(id, zone);
        true
    }

    pub fn unregister(&self, zone_id: &str) -> Option<ZoneRuntime> {
        let removed = self.zones.remove(zone_id).map(|(_, zone)| zone);
        if removed.is_some() {
            debug!("Unregistered zone {}", zone_id);
        }
        removed
    }

    pub fn get(&self, zone_id: &str) -> Option<ZoneRuntime> {
        self.zones.get(zone_id).map(|zone| zone.clone())
    }

    pub fn config(&self, zone_id: &str) -> Option<Arc<ZoneConfig>> {
        self.zones.get(zone_id).map(|zone| Arc::clone(&zone.config))
    }

    pub fn contains(&self, zone_id: &str) -> bool {
        self.zones.contains_key(zone_id)
    }

    /// Sorted so callers iterate deterministically.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        let mut ids: Vec<ZoneId> = self.zones.iter().map(|z| z.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn add_shiny_spot(&self, zone_id: &str, spot: String) -> bool {
        match self.zones.get_mut(zone_id) {
            Some(mut zone) => {
                if !zone.shiny_spots.contains(&spot) {
                    zone.shiny_spots.push(spot);
                }
                true
            }
            None => false,
        }
    }
}
