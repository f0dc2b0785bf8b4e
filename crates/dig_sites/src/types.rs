//! Core identifier and time types shared by every dig site component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type ZoneId = String;
pub type ItemId = String;
pub type EventId = String;

/// Rarity bucket of a reward item. Higher values are rarer.
pub type RarityTier = u8;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Unique identifier for a player in the world.
///
/// Wraps a UUID so player ids cannot be mixed up with zone or item ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a player ID from its string representation.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current wall-clock time in milliseconds.
pub fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_round_trips_through_string() {
        let id = PlayerId::new();
        let parsed = PlayerId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_player_id_rejects_garbage() {
        assert!(PlayerId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_current_timestamp_is_after_2020() {
        assert!(current_timestamp() > 1_577_836_800_000);
    }
}
