//! Error types for the dig site subsystem.
//!
//! Nothing here is fatal to the host process: callers log these and keep
//! the last good state.

use crate::types::{EventId, ItemId, PlayerId, ZoneId};
use std::{io::Error as IoError, path::PathBuf};
use thiserror::Error;

/// Rotation state persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write to file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to serialize rotation state for player {0}: {1}")]
    Serialization(PlayerId, serde_json::Error),
}

/// Content loading and validation errors
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Failed to read content file {0}: {1}")]
    Read(PathBuf, IoError),

    #[error("Failed to parse content file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("Duplicate zone id: {0}")]
    DuplicateZone(ZoneId),

    #[error("Duplicate event id: {0}")]
    DuplicateEvent(EventId),

    #[error("Invalid cooldown range on {owner}: min {min_ms}ms exceeds max {max_ms}ms")]
    InvalidCooldown {
        owner: String,
        min_ms: u64,
        max_ms: u64,
    },

    #[error("Invalid selection weight {weight} on {owner}")]
    InvalidWeight { owner: String, weight: f64 },

    #[error("Event {0} ending-soon window exceeds its active duration")]
    InvalidEndingSoon(EventId),
}

/// Reward rotation errors
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Zone not registered: {0}")]
    ZoneNotRegistered(ZoneId),

    #[error("Player {player} has no rotation state for zone {zone_id}")]
    NoState { player: PlayerId, zone_id: ZoneId },

    #[error("Item {item_id} is not part of the current set for zone {zone_id}")]
    ItemNotInRotation { zone_id: ZoneId, item_id: ItemId },

    #[error("Player {0} is not inside any zone")]
    NoActiveZone(PlayerId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Asset spawn/despawn errors
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Failed to spawn assets for event {0}: {1}")]
    Spawn(EventId, String),

    #[error("Failed to despawn assets: {0}")]
    Despawn(String),
}

/// Event scheduler operator errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown event: {0}")]
    UnknownEvent(EventId),
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type ContentResult<T> = Result<T, ContentError>;
pub type RotationResult<T> = Result<T, RotationError>;
pub type SpawnResult<T> = Result<T, SpawnError>;
