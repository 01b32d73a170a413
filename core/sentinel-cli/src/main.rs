//! sentinel: command-line client for the Sentinel live feed daemon.
//!
//! ## Subcommands
//!
//! - `send`: Forward gateway envelopes from stdin
//! - `health`: Daemon liveness
//! - `stats` / `snapshot` / `recent` / `runs`: Query the live feed

mod daemon_client;
mod send;

use clap::{Parser, Subcommand};
use sentinel_daemon_protocol::Method;
use serde_json::{json, Value};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use daemon_client::DaemonClient;

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Sentinel live feed client")]
#[command(version)]
struct Cli {
    /// Daemon socket path (defaults to $SENTINEL_DAEMON_SOCKET or ~/.sentinel/daemon.sock)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward gateway events (JSON or NDJSON on stdin)
    Send,

    /// Check that the daemon is up
    Health,

    /// Print feed counters
    Stats,

    /// Print recent events, runs and stats in one document
    Snapshot {
        /// Number of recent events to include
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the most recent events
    Recent {
        /// Number of events (max 500)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print active runs, or completed runs with --completed
    Runs {
        #[arg(long)]
        completed: bool,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let client = match DaemonClient::resolve(cli.socket) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve daemon socket");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, &client) {
        tracing::error!(error = %e, "sentinel command failed");
        std::process::exit(1);
    }
}

fn run(command: Commands, client: &DaemonClient) -> Result<(), String> {
    match command {
        Commands::Send => send::run(client),
        Commands::Health => match client.health() {
            Some(true) => {
                println!("ok");
                Ok(())
            }
            Some(false) => Err("Daemon reported unhealthy status".to_string()),
            None => Err(format!(
                "Daemon not reachable at {}",
                client.socket().display()
            )),
        },
        Commands::Stats => query(client, Method::GetStats, None),
        Commands::Snapshot { limit } => query(client, Method::GetSnapshot, limit_params(limit)),
        Commands::Recent { limit } => query(client, Method::GetRecentEvents, limit_params(limit)),
        Commands::Runs { completed } => {
            let method = if completed {
                Method::GetCompletedRuns
            } else {
                Method::GetActiveRuns
            };
            query(client, method, None)
        }
    }
}

fn limit_params(limit: Option<usize>) -> Option<Value> {
    limit.map(|limit| json!({ "limit": limit }))
}

fn query(client: &DaemonClient, method: Method, params: Option<Value>) -> Result<(), String> {
    let data = client.call(method, params)?;
    let rendered = serde_json::to_string_pretty(&data)
        .map_err(|e| format!("Failed to render response: {}", e))?;
    println!("{}", rendered);
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let debug_enabled = env::var("SENTINEL_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
