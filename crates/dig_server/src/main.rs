//! Standalone host for dig zone rotations and live events.
//!
//! Loads content and configuration, then drives the dig site service on a
//! fixed tick. Player and operator actions come from the stdin console.

mod cli;
mod config;
mod console;
mod logging;
mod signals;

use anyhow::{anyhow, bail};
use cli::CliArgs;
use config::{AppConfig, StorageBackend};
use console::{ConsoleCommand, OverrideField};
use dig_sites::{
    current_timestamp, AlwaysEligible, Collaborators, ContentPack, DigSiteService, Envelope, FoundOutcome,
    InMemoryRotationStore, JsonRotationStore, PlayerId, RotationStore, ServiceConfig, TimedAssetSpawner, Timestamp,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

// ============================================================================
// Player aliases
// ============================================================================

/// Console aliases for player ids. A UUID alias is used as the id itself.
#[derive(Debug, Default)]
struct PlayerDirectory {
    aliases: HashMap<String, PlayerId>,
}

impl PlayerDirectory {
    fn resolve(&mut self, alias: &str) -> PlayerId {
        *self
            .aliases
            .entry(alias.to_string())
            .or_insert_with(|| PlayerId::from_str(alias).unwrap_or_else(|_| PlayerId::new()))
    }

    fn lookup(&self, alias: &str) -> anyhow::Result<PlayerId> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| anyhow!("Unknown player '{alias}', join first"))
    }
}

// ============================================================================
// Application
// ============================================================================

pub struct Application {
    config: AppConfig,
    service: DigSiteService,
    notifications: Option<UnboundedReceiver<Envelope>>,
    players: PlayerDirectory,
}

impl Application {
    /// Builds the service from validated configuration.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let content = ContentPack::load_from_file(Path::new(&config.content.path)).await?;

        let store: Arc<dyn RotationStore> = match config.storage.backend {
            StorageBackend::Json => Arc::new(JsonRotationStore::new(PathBuf::from(&config.storage.directory)).await?),
            StorageBackend::Memory => {
                warn!("⚠️ In-memory rotation storage: progress is lost on shutdown");
                Arc::new(InMemoryRotationStore::new())
            }
        };

        let collaborators = Collaborators {
            store,
            spawner: Arc::new(TimedAssetSpawner::new(Duration::from_millis(
                config.server.spawn_latency_ms,
            ))),
            eligibility: Arc::new(AlwaysEligible),
        };

        let service_config = ServiceConfig {
            scheduler: config.scheduler.clone(),
            rng_seed: config.server.rng_seed,
        };

        let (service, notifications) =
            DigSiteService::new(content, service_config, collaborators, current_timestamp());

        info!(
            "📂 Content: {} | Storage: {:?} ({})",
            config.content.path, config.storage.backend, config.storage.directory
        );

        Ok(Self {
            config,
            service,
            notifications: Some(notifications),
            players: PlayerDirectory::default(),
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("🌟 Starting dig site server");
        info!("📋 Configuration Summary:");
        info!("  ⏱️ Tick interval: {}ms", self.config.server.tick_interval_ms);
        info!(
            "  🎲 RNG seed: {}",
            self.config
                .server
                .rng_seed
                .map_or_else(|| "entropy".to_string(), |seed| seed.to_string())
        );
        info!(
            "  🌠 First event selection in {}ms",
            self.config.scheduler.initial_delay_ms
        );

        let notifier_handle = self.notifications.take().map(spawn_notification_logger);

        let (command_tx, mut commands) = mpsc::channel(64);
        let console_handle = console::spawn_stdin_reader(command_tx);

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.server.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = signals::wait_for_shutdown();
        tokio::pin!(shutdown);

        info!("✅ Dig site server is now running!");
        info!("⌨️ {}", console::USAGE);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let mut ticks: u64 = 0;
        let received = loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.service.tick(current_timestamp()).await;
                    ticks += 1;
                }
                Some(command) = commands.recv() => {
                    if let Err(e) = self.handle_command(command, current_timestamp()).await {
                        warn!("⚠️ {}", e);
                    }
                }
                result = &mut shutdown => break result?,
            }
        };

        info!("🛑 {} received, stopping the tick loop after {} ticks", received, ticks);
        console_handle.abort();
        if let Some(handle) = notifier_handle {
            handle.abort();
        }

        let status = self.service.status(current_timestamp());
        info!(
            "📊 Final state: phase {} | {} players online | {} zones registered",
            status.phase,
            status.online_players,
            status.registered_zones.len()
        );
        info!("👋 Dig site server shutdown complete");

        Ok(())
    }

    async fn handle_command(&mut self, command: ConsoleCommand, now: Timestamp) -> anyhow::Result<()> {
        match command {
            ConsoleCommand::Join { player } => {
                let id = self.players.resolve(&player);
                self.service.player_join(id, now).await;
                info!("👤 {} joined as {}", player, id);
            }
            ConsoleCommand::Leave { player } => {
                let id = self.players.lookup(&player)?;
                self.service.player_leave(id);
                info!("👋 {} left", player);
            }
            ConsoleCommand::Enter { player, zone_id } => {
                let id = self.players.resolve(&player);
                self.service.zone_enter(id, &zone_id, now).await;
            }
            ConsoleCommand::Exit { player, zone_id } => {
                let id = self.players.lookup(&player)?;
                self.service.zone_exit(id, &zone_id, now);
            }
            ConsoleCommand::Dig { player, item_id } => {
                let id = self.players.lookup(&player)?;
                match self.service.dig(id, &item_id, now).await? {
                    FoundOutcome::AlreadyFound => info!("🔁 {} already found {}", player, item_id),
                    FoundOutcome::Found => info!("⛏️ {} dug up {}", player, item_id),
                    FoundOutcome::Completed(reward) => info!(
                        "🏆 {} completed the zone: {} currency, {} experience (first: {})",
                        player, reward.rewards.currency, reward.rewards.experience, reward.first_completion
                    ),
                }
            }
            ConsoleCommand::ForceEvent { event_id } => {
                self.service.force_event(&event_id)?;
                info!("🎯 {} will run at the next selection", event_id);
            }
            ConsoleCommand::Override { field, value_ms } => {
                let overrides = self.service.overrides_mut();
                let slot = match field {
                    OverrideField::Cooldown => &mut overrides.cooldown_ms,
                    OverrideField::Preview => &mut overrides.preview_ms,
                    OverrideField::Active => &mut overrides.active_ms,
                    OverrideField::EndingSoon => &mut overrides.ending_soon_ms,
                };
                *slot = value_ms;
                info!("🔧 Override {:?} set to {:?}", field, value_ms);
            }
            ConsoleCommand::ForceComplete { player, zone_id } => {
                let id = self.players.lookup(&player)?;
                let reward = self.service.force_complete_zone(id, &zone_id, now).await?;
                info!(
                    "🏆 Forced completion of {} for {}: {} currency, {} experience",
                    zone_id, player, reward.rewards.currency, reward.rewards.experience
                );
            }
            ConsoleCommand::Advance => {
                let before = self.service.scheduler().phase();
                self.service.force_advance(now).await;
                info!("⏩ Phase {} -> {}", before, self.service.scheduler().phase());
            }
            ConsoleCommand::Status => {
                let status = self.service.status(now);
                info!("📊 {}", serde_json::to_string(&status)?);
                for (alias, id) in &self.players.aliases {
                    if let Some(summary) = self.service.active_zone_summary(*id, now) {
                        debug!("  {} in {}: {}", alias, summary.id, serde_json::to_string(&summary.items)?);
                    }
                }
            }
        }

        Ok(())
    }
}

fn spawn_notification_logger(mut receiver: UnboundedReceiver<Envelope>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = receiver.recv().await {
            match serde_json::to_string(&envelope.notification) {
                Ok(json) => info!(player = %envelope.player, "📨 {}", json),
                Err(e) => warn!("Failed to encode notification: {}", e),
            }
        }
    })
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Configuration comes first so logging can honour it
    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_cli(&args);
    if let Err(e) = config.validate() {
        bail!("Configuration validation failed: {}", e);
    }

    logging::setup_logging(&config.logging)?;
    display_banner();

    match Application::new(config).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");

    info!("╔══════════════════════════════════════════╗");
    info!("║          ⛏️  DIG SITE SERVER ⛏️           ║");
    info!("║                 v{:<8}                ║", version);
    info!("║                                          ║");
    info!("║  🏖️  Rotating dig zone rewards            ║");
    info!("║  🌠 Weighted live events                 ║");
    info!("╚══════════════════════════════════════════╝");
}
