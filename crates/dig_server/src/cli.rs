//! Command-line interface for the dig site server.

use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Command line arguments. Every option overrides the matching config value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the content file
    pub content_path: Option<PathBuf>,
    /// Optional override for the rotation storage directory
    pub storage_dir: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

fn command() -> Command {
    Command::new("Dig Site Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rotates dig zone rewards and schedules live events")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("dig_server.toml"),
        )
        .arg(
            Arg::new("content")
                .long("content")
                .value_name("FILE")
                .help("Content file with zones, events and the item catalog"),
        )
        .arg(
            Arg::new("storage")
                .short('s')
                .long("storage")
                .value_name("DIR")
                .help("Directory for per-player rotation files"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed reward draws and event selection")
                .value_parser(clap::value_parser!(u64)),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dig_server.toml")),
            content_path: matches.get_one::<String>("content").map(PathBuf::from),
            storage_dir: matches.get_one::<String>("storage").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            seed: matches.get_one::<u64>("seed").copied(),
        }
    }
}
