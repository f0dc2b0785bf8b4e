//! Operator console. Each stdin line becomes one command for the tick loop.
//!
//! Players are addressed by alias; the host maps aliases to ids.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Scheduler override that can be set or cleared from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideField {
    Cooldown,
    Preview,
    Active,
    EndingSoon,
}

impl OverrideField {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "cooldown" => Ok(Self::Cooldown),
            "preview" => Ok(Self::Preview),
            "active" => Ok(Self::Active),
            "ending" | "ending-soon" => Ok(Self::EndingSoon),
            other => Err(format!("Unknown override field: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join { player: String },
    Leave { player: String },
    Enter { player: String, zone_id: String },
    Exit { player: String, zone_id: String },
    Dig { player: String, item_id: String },
    ForceEvent { event_id: String },
    /// `None` clears the override
    Override { field: OverrideField, value_ms: Option<u64> },
    ForceComplete { player: String, zone_id: String },
    Advance,
    Status,
}

pub const USAGE: &str = "commands: join <player> | leave <player> | enter <player> <zone> | exit <player> <zone> | \
dig <player> <item> | force-event <event> | override <cooldown|preview|active|ending> <ms|clear> | \
force-complete <player> <zone> | advance | status";

impl ConsoleCommand {
    /// Parses one console line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = parts.split_first() else {
            return Ok(None);
        };

        let command = match (verb, args) {
            ("join", [player]) => Self::Join { player: player.to_string() },
            ("leave", [player]) => Self::Leave { player: player.to_string() },
            ("enter", [player, zone]) => Self::Enter {
                player: player.to_string(),
                zone_id: zone.to_string(),
            },
            ("exit", [player, zone]) => Self::Exit {
                player: player.to_string(),
                zone_id: zone.to_string(),
            },
            ("dig", [player, item]) => Self::Dig {
                player: player.to_string(),
                item_id: item.to_string(),
            },
            ("force-event", [event]) => Self::ForceEvent { event_id: event.to_string() },
            ("override", [field, value]) => {
                let field = OverrideField::parse(field)?;
                let value_ms = match *value {
                    "clear" => None,
                    raw => Some(
                        raw.parse::<u64>()
                            .map_err(|e| format!("Invalid duration '{raw}': {e}"))?,
                    ),
                };
                Self::Override { field, value_ms }
            }
            ("force-complete", [player, zone]) => Self::ForceComplete {
                player: player.to_string(),
                zone_id: zone.to_string(),
            },
            ("advance", []) => Self::Advance,
            ("status", []) => Self::Status,
            _ => return Err(format!("Unrecognized command: {}", line.trim())),
        };

        Ok(Some(command))
    }
}

/// Reads stdin until EOF or until the receiver is dropped.
pub fn spawn_stdin_reader(commands: mpsc::Sender<ConsoleCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            };

            match ConsoleCommand::parse(&line) {
                Ok(Some(command)) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{}. {}", e, USAGE),
            }
        }

        debug!("Console reader stopped");
    })
}
