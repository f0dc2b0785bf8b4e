//! Per-player rotation state persistence.
//!
//! Each player owns one record holding the rotation state of every zone
//! they have been observed in. Records carry a save-format tag; a record
//! written under a different format is discarded and reinitialized.

use crate::error::{StorageError, StorageResult};
use crate::rotation::PlayerZoneRotationState;
use crate::types::{PlayerId, ZoneId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{fs as tokio_fs, io::AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Bump when the persisted layout changes incompatibly.
pub const SAVE_FORMAT_VERSION: u32 = 1;

/// Persisted rotation data for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRotationFile {
    pub save_format: u32,
    #[serde(default)]
    pub zones: BTreeMap<ZoneId, PlayerZoneRotationState>,
}

impl Default for PlayerRotationFile {
    fn default() -> Self {
        Self {
            save_format: SAVE_FORMAT_VERSION,
            zones: BTreeMap::new(),
        }
    }
}

impl PlayerRotationFile {
    /// Parses a stored record, resetting it when the format tag does not
    /// match or the contents fail to deserialize.
    pub fn from_json(player: PlayerId, raw: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding unreadable rotation record for {}: {}", player, e);
                return Self::default();
            }
        };

        let format = value.get("save_format").and_then(|v| v.as_u64());
        if format != Some(SAVE_FORMAT_VERSION as u64) {
            warn!(
                "Resetting rotation record for {}: save format {:?}, expected {}",
                player, format, SAVE_FORMAT_VERSION
            );
            return Self::default();
        }

        match serde_json::from_value(value) {
            Ok(file) => file,
            Err(e) => {
                warn!("Discarding malformed rotation record for {}: {}", player, e);
                Self::default()
            }
        }
    }
}

/// Persistence provider for rotation state.
#[async_trait]
pub trait RotationStore: Send + Sync + std::fmt::Debug {
    /// Load the state of one zone for a player
    async fn get(&self, player: PlayerId, zone_id: &str) -> StorageResult<Option<PlayerZoneRotationState>>;

    /// Save the state of one zone for a player
    async fn set(&self, player: PlayerId, zone_id: &str, state: &PlayerZoneRotationState) -> StorageResult<()>;

    /// Every zone id the player has persisted state for
    async fn zones(&self, player: PlayerId) -> StorageResult<Vec<ZoneId>>;
}

/// Volatile store, used by tests and by servers without a data directory.
#[derive(Debug, Default)]
pub struct InMemoryRotationStore {
    players: DashMap<PlayerId, PlayerRotationFile>,
    fail_writes: AtomicBool,
}

impl InMemoryRotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RotationStore for InMemoryRotationStore {
    async fn get(&self, player: PlayerId, zone_id: &str) -> StorageResult<Option<PlayerZoneRotationState>> {
        let state = self.players.get(&player).and_then(|file| {
            if file.save_format != SAVE_FORMAT_VERSION {
                return None;
            }
            file.zones.get(zone_id).cloned()
        });
        Ok(state)
    }

    async fn set(&self, player: PlayerId, zone_id: &str, state: &PlayerZoneRotationState) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::FileWrite(
                PathBuf::from("memory"),
                io::Error::new(io::ErrorKind::Other, "writes disabled"),
            ));
        }

        let mut file = self.players.entry(player).or_default();
        if file.save_format != SAVE_FORMAT_VERSION {
            *file = PlayerRotationFile::default();
        }
        file.zones.insert(zone_id.to_string(), state.clone());
        Ok(())
    }

    async fn zones(&self, player: PlayerId) -> StorageResult<Vec<ZoneId>> {
        Ok(self
            .players
            .get(&player)
            .filter(|file| file.save_format == SAVE_FORMAT_VERSION)
            .map(|file| file.zones.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// JSON file store, one file per player.
#[derive(Debug)]
pub struct JsonRotationStore {
    directory: PathBuf,
}

impl JsonRotationStore {
    /// Creates the store, creating the directory if needed.
    pub async fn new(directory: PathBuf) -> StorageResult<Self> {
        tokio_fs::create_dir_all(&directory)
            .await
            .map_err(|e| StorageError::DirectoryCreate(directory.clone(), e))?;
        Ok(Self { directory })
    }

    fn player_path(&self, player: PlayerId) -> PathBuf {
        self.directory.join(format!("{}.rotation.json", player))
    }

    #[instrument(skip(self))]
    async fn read_file(&self, player: PlayerId) -> StorageResult<PlayerRotationFile> {
        let path = self.player_path(player);
        match tokio_fs::read_to_string(&path).await {
            Ok(raw) => Ok(PlayerRotationFile::from_json(player, &raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PlayerRotationFile::default()),
            Err(e) => Err(StorageError::FileRead(path, e)),
        }
    }

    #[instrument(skip(self, file))]
    async fn write_file(&self, player: PlayerId, file: &PlayerRotationFile) -> StorageResult<()> {
        let path = self.player_path(player);
        let temp_path = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(file).map_err(|e| StorageError::Serialization(player, e))?;

        let mut handle = tokio_fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;
        handle
            .write_all(json.as_bytes())
            .await
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;
        handle
            .sync_all()
            .await
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;

        // Atomic rename
        tokio_fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::FileRename(temp_path, path.clone(), e))?;

        debug!("Saved rotation record for {}", player);
        Ok(())
    }
}

#[async_trait]
impl RotationStore for JsonRotationStore {
    async fn get(&self, player: PlayerId, zone_id: &str) -> StorageResult<Option<PlayerZoneRotationState>> {
        let file = self.read_file(player).await?;
        Ok(file.zones.get(zone_id).cloned())
    }

    async fn set(&self, player: PlayerId, zone_id: &str, state: &PlayerZoneRotationState) -> StorageResult<()> {
        let mut file = self.read_file(player).await?;
        file.zones.insert(zone_id.to_string(), state.clone());
        self.write_file(player, &file).await
    }

    async fn zones(&self, player: PlayerId) -> StorageResult<Vec<ZoneId>> {
        let file = self.read_file(player).await?;
        Ok(file.zones.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_state() -> PlayerZoneRotationState {
        let mut state = PlayerZoneRotationState::default();
        state.current_items = vec!["shell".into(), "pearl".into()];
        state.found_flags = vec![true, false];
        state.cooldown_end_time = 12_345;
        state.remaining_pools.insert(1, vec!["pebble".into()]);
        state
    }

    #[tokio::test]
    async fn test_json_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let player = PlayerId::new();

        let store = JsonRotationStore::new(dir.path().to_path_buf()).await.unwrap();
        store.set(player, "beach", &sample_state()).await.unwrap();
        store.set(player, "cave", &PlayerZoneRotationState::default()).await.unwrap();

        let reopened = JsonRotationStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.get(player, "beach").await.unwrap(), Some(sample_state()));
        assert_eq!(reopened.zones(player).await.unwrap(), vec!["beach".to_string(), "cave".to_string()]);
        assert_eq!(reopened.get(PlayerId::new(), "beach").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_store_resets_on_format_mismatch() {
        let dir = TempDir::new().unwrap();
        let player = PlayerId::new();
        let store = JsonRotationStore::new(dir.path().to_path_buf()).await.unwrap();

        let stale = serde_json::json!({
            "save_format": SAVE_FORMAT_VERSION + 1,
            "zones": { "beach": { "current_items": ["shell"], "found_flags": [false] } }
        });
        tokio::fs::write(store.player_path(player), stale.to_string()).await.unwrap();

        assert_eq!(store.get(player, "beach").await.unwrap(), None);
        assert!(store.zones(player).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_discards_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let player = PlayerId::new();
        let store = JsonRotationStore::new(dir.path().to_path_buf()).await.unwrap();

        tokio::fs::write(store.player_path(player), "{ not json").await.unwrap();
        assert_eq!(store.get(player, "beach").await.unwrap(), None);

        store.set(player, "beach", &sample_state()).await.unwrap();
        assert_eq!(store.get(player, "beach").await.unwrap(), Some(sample_state()));
    }

    #[tokio::test]
    async fn test_memory_store_write_failure() {
        let store = InMemoryRotationStore::new();
        let player = PlayerId::new();

        store.set_fail_writes(true);
        assert!(store.set(player, "beach", &sample_state()).await.is_err());
        assert_eq!(store.get(player, "beach").await.unwrap(), None);

        store.set_fail_writes(false);
        store.set(player, "beach", &sample_state()).await.unwrap();
        assert_eq!(store.zones(player).await.unwrap(), vec!["beach".to_string()]);
    }
}
