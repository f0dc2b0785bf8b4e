//! Notifications pushed to players and to collaborating systems (quest
//! tracking, UI). Delivered over an unbounded tokio channel so producers
//! never block the tick.

use crate::content::NotificationTemplate;
use crate::rotation::CompletionReward;
use crate::scheduler::EventPhase;
use crate::tracker::ActiveZoneSummary;
use crate::types::{EventId, ItemId, PlayerId, ZoneId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Live event phase announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNotification {
    pub event_id: EventId,
    pub phase: EventPhase,
    pub message: String,
    pub image_ref: Option<String>,
    pub color_ref: Option<String>,
    /// Time left until the event ends, when it is running
    pub remaining_ms: Option<u64>,
}

impl EventNotification {
    pub fn from_template(
        event_id: &str,
        phase: EventPhase,
        template: &NotificationTemplate,
        remaining_ms: Option<u64>,
    ) -> Self {
        Self {
            event_id: event_id.to_string(),
            phase,
            message: template.message.clone(),
            image_ref: template.image_ref.clone(),
            color_ref: template.color_ref.clone(),
            remaining_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    ZoneEntered { zone_id: ZoneId },
    ZoneExited { zone_id: ZoneId },
    /// Active zone view after any occupancy or rotation change. `None`
    /// when the player is in no zone.
    ZoneSummary(Option<ActiveZoneSummary>),
    ZoneRenewed { zone_id: ZoneId, items: Vec<ItemId> },
    ItemFound { zone_id: ZoneId, item_id: ItemId },
    ZoneCompleted { zone_id: ZoneId, reward: CompletionReward },
    Event(EventNotification),
}

/// A notification addressed to one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub player: PlayerId,
    pub notification: Notification,
}

/// Sending half of the notification channel.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: mpsc::UnboundedSender<Envelope>,
}

impl NotificationHub {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, player: PlayerId, notification: Notification) {
        if self.sender.send(Envelope { player, notification }).is_err() {
            debug!("Notification for {} dropped, no receiver", player);
        }
    }
}

/// Decides whether a player should see live event announcements.
pub trait NotificationEligibility: Send + Sync {
    fn is_eligible(&self, player: &PlayerId) -> bool;
}

impl<F> NotificationEligibility for F
where
    F: Fn(&PlayerId) -> bool + Send + Sync,
{
    fn is_eligible(&self, player: &PlayerId) -> bool {
        self(player)
    }
}

/// Every player is eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEligible;

impl NotificationEligibility for AlwaysEligible {
    fn is_eligible(&self, _player: &PlayerId) -> bool {
        true
    }
}
