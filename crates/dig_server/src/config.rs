//! Server configuration loaded from a TOML file.

use crate::cli::CliArgs;
use dig_sites::SchedulerSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    250
}

fn default_spawn_latency() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub content: ContentSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Simulation tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Fixed RNG seed; entropy when absent
    #[serde(default)]
    pub rng_seed: Option<u64>,
    /// Simulated asset spawn latency in milliseconds
    #[serde(default = "default_spawn_latency")]
    pub spawn_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSettings {
    /// JSON file with zones, events and the item catalog
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per player
    Json,
    /// Nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                tick_interval_ms: default_tick_interval(),
                rng_seed: None,
                spawn_latency_ms: default_spawn_latency(),
            },
            content: ContentSettings {
                path: "content/dig_sites.json".to_string(),
            },
            storage: StorageSettings {
                backend: StorageBackend::Json,
                directory: "data/rotations".to_string(),
            },
            scheduler: SchedulerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults there
    /// first when the file does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(content) = &args.content_path {
            self.content.path = content.to_string_lossy().to_string();
        }
        if let Some(dir) = &args.storage_dir {
            self.storage.directory = dir.to_string_lossy().to_string();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if args.seed.is_some() {
            self.server.rng_seed = args.seed;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.tick_interval_ms == 0 {
            return Err("Tick interval must be greater than zero".to_string());
        }

        if self.content.path.is_empty() {
            return Err("Content path cannot be empty".to_string());
        }

        if self.storage.backend == StorageBackend::Json && self.storage.directory.is_empty() {
            return Err("Storage directory cannot be empty for the json backend".to_string());
        }

        self.scheduler
            .validate()
            .map_err(|e| format!("Invalid scheduler settings: {e}"))?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
