//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::RelayConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    server: ServerInfo,
    dispatch: DispatchInfo,
    broker: BrokerInfo,
}

#[derive(Serialize)]
struct ServerInfo {
    bind: String,
    max_body_bytes: usize,
    shutdown_grace_ms: u64,
}

#[derive(Serialize)]
struct DispatchInfo {
    topic: String,
    dead_letter_topic: String,
    max_attempts: u32,
    backoff_ms: Vec<u64>,
    backoff_jitter: bool,
    circuit_breaker_threshold: u32,
    circuit_breaker_cooldown_ms: u64,
    broker_send_timeout_ms: u64,
}

#[derive(Serialize)]
struct BrokerInfo {
    backend: String,
    pool_size: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&config);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

/// Delay before each retry (attempt 2..=max), jitter ignored
fn retry_schedule(config: &RelayConfig) -> Vec<u64> {
    let d = &config.dispatch;
    let policy = dispatcher::BackoffPolicy::new(d.backoff_base(), d.backoff_max(), false);
    (1..d.max_attempts)
        .map(|attempt| policy.capped_delay(attempt).as_millis() as u64)
        .collect()
}

fn build_config_info(config: &RelayConfig) -> ConfigInfo {
    let d = &config.dispatch;
    ConfigInfo {
        version: format!("{:?}", config.version),
        server: ServerInfo {
            bind: config.server.bind.to_string(),
            max_body_bytes: config.server.max_body_bytes,
            shutdown_grace_ms: config.server.shutdown_grace_ms,
        },
        dispatch: DispatchInfo {
            topic: d.topic.clone(),
            dead_letter_topic: d.dead_letter_topic.clone(),
            max_attempts: d.max_attempts,
            backoff_ms: retry_schedule(config),
            backoff_jitter: d.backoff_jitter,
            circuit_breaker_threshold: d.circuit_breaker_threshold,
            circuit_breaker_cooldown_ms: d.circuit_breaker_cooldown_ms,
            broker_send_timeout_ms: d.broker_send_timeout_ms,
        },
        broker: BrokerInfo {
            backend: format!("{:?}", config.broker.backend).to_lowercase(),
            pool_size: config.broker.pool_size,
            params: config
                .broker
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        },
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Webhook Relay Configuration                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🌐 Server");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Bind: {}", info.server.bind);
    println!("   ├─ Max body: {} bytes", info.server.max_body_bytes);
    println!("   └─ Shutdown grace: {} ms", info.server.shutdown_grace_ms);

    let d = &info.dispatch;
    println!("\n⚙️  Dispatch");
    println!("   ├─ Topic: {}", d.topic);
    println!("   ├─ Dead-letter topic: {}", d.dead_letter_topic);
    println!("   ├─ Max attempts: {}", d.max_attempts);
    println!(
        "   ├─ Retry delays (ms): {:?}{}",
        d.backoff_ms,
        if d.backoff_jitter { " (jittered)" } else { "" }
    );
    println!(
        "   ├─ Circuit breaker: {} failures, {} ms cooldown",
        d.circuit_breaker_threshold, d.circuit_breaker_cooldown_ms
    );
    println!("   └─ Send timeout: {} ms", d.broker_send_timeout_ms);

    let b = &info.broker;
    println!("\n📤 Broker");
    println!("   ├─ Backend: {}", b.backend);
    if b.params.is_empty() {
        println!("   └─ Pool size: {}", b.pool_size);
    } else {
        println!("   ├─ Pool size: {}", b.pool_size);
        let last = b.params.len() - 1;
        for (i, (key, value)) in b.params.iter().enumerate() {
            let prefix = if i == last { "└─" } else { "├─" };
            println!("   {} {} = {}", prefix, key, value);
        }
    }

    println!();
}
