//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Webhook Relay - accepts webhooks and delivers them to a durable queue
#[derive(Parser, Debug)]
#[command(
    name = "webhook-relay",
    author,
    version,
    about = "Webhook ingestion and reliable dispatch relay",
    long_about = "Accepts webhook notifications over HTTP, validates them, and delivers \n\
                  each accepted event to a durable queue with retries, exponential \n\
                  backoff, a circuit breaker, and a dead-letter topic."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "WEBHOOK_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "WEBHOOK_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the dispatcher
    Serve(ServeArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `serve` command
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "relay.toml",
        env = "WEBHOOK_RELAY_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the listen address from configuration
    #[arg(long, env = "WEBHOOK_RELAY_BIND")]
    pub bind: Option<SocketAddr>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "WEBHOOK_RELAY_METRICS_PORT")]
    pub metrics_port: u16,

    /// Log messages instead of publishing them to the configured broker
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "relay.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
