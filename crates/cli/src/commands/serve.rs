//! `serve` command implementation.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::pipeline::{Relay, RelayOptions};

/// Execute the `serve` command
pub async fn run_serve(args: &ServeArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    // Validate config path
    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    // Load and parse configuration
    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(bind) = args.bind {
        info!(bind = %bind, "Overriding listen address from CLI");
        config.server.bind = bind;
    }

    info!(
        bind = %config.server.bind,
        backend = ?config.broker.backend,
        topic = %config.dispatch.topic,
        max_attempts = config.dispatch.max_attempts,
        "Configuration loaded"
    );
    if args.dry_run {
        warn!("Dry run mode - messages are logged, not published");
    }

    let relay = Relay::new(RelayOptions {
        config,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        dry_run: args.dry_run,
    });

    let stats = relay
        .run(shutdown_signal())
        .await
        .context("Relay execution failed")?;

    info!(
        accepted = stats.ingestion.accepted,
        delivered = stats.dispatch.delivered,
        dead_lettered = stats.dispatch.dead_lettered,
        duration_secs = stats.duration.as_secs_f64(),
        "Relay stopped"
    );
    stats.print_summary();

    if !stats.drained {
        warn!(
            abandoned = stats.abandoned.len(),
            "Some envelopes were still in flight at exit"
        );
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal, draining...");
}
