//! outboxctl - maintenance tool for the transactional outbox store.

mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use logging::{init_logging, LogFormat};

/// Outbox store command-line interface.
#[derive(Parser, Debug)]
#[command(name = "outboxctl")]
#[command(about = "Inspect and maintain a transactional outbox store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON settings file (host, port, database, username, password)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config file and OUTBOX_DB_NAME
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Create or upgrade the outbox schema
    Migrate,
    /// Print record counts per state
    Status,
    /// Release leases held longer than the given age
    Sweep {
        /// Lease age in seconds after which a holder is presumed dead
        #[arg(long)]
        stale_after: u64,
    },
    /// Delete records older than the given age, whatever their state
    Purge {
        /// Record age in seconds
        #[arg(long)]
        older_than: u64,
    },
    /// Check the store is reachable
    Health,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format);

    let settings = commands::resolve_settings(
        cli.config.as_deref(),
        cli.database.as_deref(),
        |key: &str| std::env::var(key).ok(),
    )?;
    let store = commands::open(&settings)?;

    match cli.command {
        Commands::Migrate => {
            let version = commands::migrate(&store)?;
            println!("Schema version: {}", version);
        }
        Commands::Status => {
            let summary = commands::status(&store)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Sweep { stale_after } => {
            let count = commands::sweep(&store, Utc::now(), stale_after)?;
            println!("Released {} stale lease(s)", count);
        }
        Commands::Purge { older_than } => {
            let count = commands::purge(&store, Utc::now(), older_than)?;
            println!("Removed {} record(s)", count);
        }
        Commands::Health => {
            commands::health(&store)?;
            println!("OK");
        }
    }

    Ok(())
}
