//! End-to-end tests driving the dig site service the way a host would:
//! join, enter zones, dig, tick through a live event, restart.

use dig_sites::*;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn content() -> ContentPack {
    let raw = json!({
        "catalog": { "items": {
            "shell": 1, "pebble": 1, "driftwood": 1,
            "pearl": 3, "amber": 3,
            "meteorite": 4, "stardust": 4
        }},
        "zones": [{
            "id": "sunny_beach",
            "display_name": "Sunny Beach",
            "priority": 1,
            "recommended_level": 2,
            "base_items": ["shovel"],
            "hidden_items": ["message_bottle"],
            "renewal_tiers": [1, 1, 3],
            "candidates": { "1": ["shell", "pebble", "driftwood"], "3": ["pearl", "amber"] },
            "renewal_cooldown_ms": 60000,
            "rewards": {
                "first_completion": { "currency": 100, "experience": 40 },
                "renewal": { "currency": 20, "experience": 10 }
            }
        }],
        "events": [{
            "id": "meteor_shower",
            "display_name": "Meteor Shower",
            "weight": 1.0,
            "preview_duration_ms": 1000,
            "active_duration_ms": 10000,
            "ending_soon_duration_ms": 2000,
            "assets": [
                { "asset": "falling_star" },
                { "asset": "glint", "zone_id": "meteor_crater" }
            ],
            "notifications": {
                "preview": { "message": "Stars are gathering" },
                "active": { "message": "Meteors are falling!", "color_ref": "orange" }
            },
            "zones": [{
                "id": "meteor_crater",
                "display_name": "Meteor Crater",
                "priority": 10,
                "exclude_lower_priority": true,
                "hidden_items": ["star_core"],
                "renewal_tiers": [4],
                "renewal_cooldown_ms": 30000
            }]
        }]
    });

    let pack: ContentPack = serde_json::from_value(raw).unwrap();
    pack.validate().unwrap();
    pack
}

fn config() -> ServiceConfig {
    ServiceConfig {
        scheduler: SchedulerSettings {
            no_event_weight: 0.0,
            default_cooldown: CooldownRange::fixed(3_600_000),
            despawn_delay_ms: 1_000,
            initial_delay_ms: 5_000,
        },
        rng_seed: Some(7),
    }
}

fn collaborators(store: Arc<dyn RotationStore>) -> Collaborators {
    Collaborators {
        store,
        spawner: Arc::new(TimedAssetSpawner::default()),
        eligibility: Arc::new(AlwaysEligible),
    }
}

async fn json_service(dir: &Path, now: Timestamp) -> (DigSiteService, UnboundedReceiver<Envelope>) {
    let store = JsonRotationStore::new(dir.to_path_buf()).await.unwrap();
    DigSiteService::new(content(), config(), collaborators(Arc::new(store)), now)
}

fn drain(rx: &mut UnboundedReceiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

#[tokio::test]
async fn test_completion_survives_restart_and_renews() {
    let dir = TempDir::new().unwrap();
    let player = PlayerId::new();

    let (mut service, mut rx) = json_service(dir.path(), 1_000).await;
    service.player_join(player, 1_000).await;
    service.zone_enter(player, "sunny_beach", 1_000).await;

    let summary = service.active_zone_summary(player, 1_000).unwrap();
    assert_eq!(summary.display_name, "Sunny Beach");
    assert_eq!(summary.level, 2);
    assert_eq!(summary.items.len(), 3);
    assert_eq!(summary.rewards.currency, 100);
    assert_eq!(summary.renewal_cooldown_remaining_ms, 60_000);

    let category = service.visible_category_items(player);
    assert!(category.contains(&"shovel".to_string()));
    assert!(summary.items.iter().all(|i| category.contains(&i.item_id)));
    assert_eq!(service.visible_hidden_items(player), vec!["message_bottle".to_string()]);

    let mut last = FoundOutcome::Found;
    for item in &summary.items {
        last = service.dig(player, &item.item_id, 2_000).await.unwrap();
    }
    assert!(matches!(last, FoundOutcome::Completed(r) if r.first_completion && r.rewards.currency == 100));
    assert!(drain(&mut rx).iter().any(|e| matches!(
        &e.notification,
        Notification::ZoneCompleted { zone_id, reward } if zone_id == "sunny_beach" && reward.rewards.experience == 40
    )));

    let finished_items: Vec<ItemId> = summary.items.iter().map(|i| i.item_id.clone()).collect();
    drop(service);

    // A fresh process picks up exactly where the player left off
    let (mut service, _rx) = json_service(dir.path(), 30_000).await;
    service.player_join(player, 30_000).await;
    service.zone_enter(player, "sunny_beach", 30_000).await;

    let resumed = service.active_zone_summary(player, 30_000).unwrap();
    assert!(resumed.completed);
    assert_eq!(
        resumed.items.iter().map(|i| i.item_id.clone()).collect::<Vec<_>>(),
        finished_items
    );
    assert_eq!(resumed.rewards.currency, 20);
    assert_eq!(resumed.renewal_cooldown_remaining_ms, 31_000);

    service.tick(61_000).await;
    let renewed = service.active_zone_summary(player, 61_000).unwrap();
    assert!(!renewed.completed);
    assert!(renewed.items.iter().all(|i| !i.is_found));
    assert_ne!(
        renewed.items.iter().map(|i| i.item_id.clone()).collect::<Vec<_>>(),
        finished_items
    );
    assert_eq!(renewed.renewal_cooldown_remaining_ms, 60_000);
}

#[tokio::test]
async fn test_live_event_zone_lifecycle() {
    let store: Arc<dyn RotationStore> = Arc::new(InMemoryRotationStore::new());
    let (mut service, mut rx) = DigSiteService::new(content(), config(), collaborators(store), 0);
    let player = PlayerId::new();

    service.player_join(player, 0).await;
    service.zone_enter(player, "sunny_beach", 0).await;

    service.tick(5_000).await;
    let status = service.status(5_000);
    assert_eq!(status.phase, EventPhase::Preview);
    assert_eq!(status.current_event.as_deref(), Some("meteor_shower"));
    assert_eq!(status.registered_zones, vec!["sunny_beach".to_string()]);

    service.tick(6_000).await;
    assert_eq!(service.status(6_000).phase, EventPhase::Active);
    let crater = service.tracker().registry().get("meteor_crater").unwrap();
    assert!(crater.is_live_event());
    assert_eq!(crater.shiny_spots.len(), 1);

    service.zone_enter(player, "meteor_crater", 6_500).await;
    let summary = service.active_zone_summary(player, 6_500).unwrap();
    assert_eq!(summary.id, "meteor_crater");
    assert_eq!(summary.items.len(), 1);
    assert!(["meteorite", "stardust"].contains(&summary.items[0].item_id.as_str()));
    assert_eq!(service.visible_hidden_items(player), vec!["star_core".to_string()]);

    drain(&mut rx);
    let late = PlayerId::new();
    service.player_join(late, 7_000).await;
    let catch_up: Vec<EventNotification> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.player == late)
        .filter_map(|e| match e.notification {
            Notification::Event(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(catch_up.len(), 1);
    assert_eq!(catch_up[0].phase, EventPhase::Active);
    assert_eq!(catch_up[0].remaining_ms, Some(9_000));
    assert_eq!(catch_up[0].color_ref.as_deref(), Some("orange"));

    // First seen walking into a zone still gets the running event
    let wanderer = PlayerId::new();
    service.zone_enter(wanderer, "meteor_crater", 7_000).await;
    assert!(service.tracker().is_online(wanderer));
    let wanderer_events: Vec<EventNotification> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.player == wanderer)
        .filter_map(|e| match e.notification {
            Notification::Event(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(wanderer_events.len(), 1);
    assert_eq!(wanderer_events[0].phase, EventPhase::Active);
    assert_eq!(wanderer_events[0].remaining_ms, Some(9_000));

    service.tick(14_000).await;
    assert_eq!(service.status(14_000).phase, EventPhase::EndingSoon);
    service.tick(16_000).await;
    assert_eq!(service.status(16_000).phase, EventPhase::Ended);

    assert_eq!(service.tracker().occupancy(player), vec!["sunny_beach".to_string()]);
    assert_eq!(service.active_zone_summary(player, 16_000).unwrap().id, "sunny_beach");
    assert_eq!(service.visible_hidden_items(player), vec!["message_bottle".to_string()]);
    assert!(drain(&mut rx).iter().any(|e| e.player == player
        && e.notification
            == Notification::ZoneExited {
                zone_id: "meteor_crater".into()
            }));

    service.tick(17_000).await;
    let status = service.status(17_000);
    assert_eq!(status.phase, EventPhase::Idle);
    assert!(status.current_event.is_none());
    assert_eq!(status.next_transition_in_ms, 3_600_000);

    // The crater's renewal stays queued while the zone is gone
    service.tick(40_000).await;
    service.tick(41_000).await;
    let crater_entry = service
        .tracker()
        .pending_renewals(player)
        .into_iter()
        .find(|p| p.zone_id == "meteor_crater")
        .unwrap();
    assert_eq!(crater_entry.due_at, 36_500);
    assert_eq!(crater_entry.attempts, 2);
}

#[tokio::test]
async fn test_operator_hooks() {
    let store: Arc<dyn RotationStore> = Arc::new(InMemoryRotationStore::new());
    let (mut service, _rx) = DigSiteService::new(content(), config(), collaborators(store), 0);
    let player = PlayerId::new();
    service.player_join(player, 0).await;

    let reward = service.force_complete_zone(player, "sunny_beach", 10).await.unwrap();
    assert!(reward.first_completion);
    assert!(matches!(
        service.force_complete_zone(player, "meteor_crater", 10).await,
        Err(RotationError::ZoneNotRegistered(_))
    ));

    assert!(service.force_event("nope").is_err());
    service.force_event("meteor_shower").unwrap();
    service.overrides_mut().active_ms = Some(4_000);
    service.overrides_mut().ending_soon_ms = Some(1_000);

    service.force_advance(20).await;
    assert_eq!(service.status(20).phase, EventPhase::Preview);
    service.force_advance(30).await;
    assert_eq!(service.status(30).phase, EventPhase::Active);
    assert_eq!(service.status(30).next_transition_in_ms, 3_000);

    service.player_leave(player);
    assert_eq!(service.status(30).online_players, 0);
}
