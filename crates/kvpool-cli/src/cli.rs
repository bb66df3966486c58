//! `kvpool`: exercise and inspect a pooled Redis connection

mod commands;
mod logging;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::commands::Command;
use crate::logging::LoggingConfig;
use crate::settings::{Overrides, Settings};

#[derive(Debug, Parser)]
#[command(name = "kvpool", version, about = "Exercise and inspect a pooled Redis connection")]
struct Cli {
    /// Settings file (defaults to <config dir>/kvpool/kvpool.toml)
    #[arg(long, short = 'C', global = true, env = "KVPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Redis connection URL, replacing the configured endpoint
    #[arg(long, global = true, env = "KVPOOL_REDIS_URL")]
    url: Option<String>,

    #[arg(long, global = true, env = "KVPOOL_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    #[arg(long, global = true, env = "KVPOOL_MIN_CONNECTIONS")]
    min_connections: Option<usize>,

    #[arg(long, global = true, env = "KVPOOL_ACQUIRE_TIMEOUT_MS")]
    acquire_timeout_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "KVPOOL_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            acquire_timeout_ms: self.acquire_timeout_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = if cli.log_json {
        LoggingConfig::json()
    } else {
        LoggingConfig::default()
    };
    logging::init(&logging)?;

    let settings = Settings::load(cli.config.as_deref())?.with_overrides(&cli.overrides())?;
    commands::run(cli.command, settings).await
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ping() {
        let cli = Cli::try_parse_from(["kvpool", "--max-connections", "3", "ping", "-n", "20", "-c", "5"])
            .unwrap();
        assert_eq!(cli.max_connections, Some(3));
        match cli.command {
            Command::Ping { count, concurrency } => {
                assert_eq!(count, 20);
                assert_eq!(concurrency, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_watch_defaults() {
        let cli = Cli::try_parse_from(["kvpool", "watch"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { interval_ms: 1000 }));
    }
}
