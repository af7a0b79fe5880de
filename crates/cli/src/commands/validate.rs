//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{BrokerBackendKind, RelayConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    bind: String,
    backend: String,
    topic: String,
    dead_letter_topic: String,
    max_attempts: u32,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    bind: config.server.bind.to_string(),
                    backend: format!("{:?}", config.broker.backend).to_lowercase(),
                    topic: config.dispatch.topic.clone(),
                    dead_letter_topic: config.dispatch.dead_letter_topic.clone(),
                    max_attempts: config.dispatch.max_attempts,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let dispatch = &config.dispatch;

    match config.broker.backend {
        BrokerBackendKind::Memory => warnings.push(
            "broker.backend is 'memory' - events stay in process, bounded per topic, and are lost on restart".to_string(),
        ),
        BrokerBackendKind::Log => {
            warnings.push("broker.backend is 'log' - nothing is published".to_string())
        }
        BrokerBackendKind::File => {}
    }

    if dispatch.max_attempts == 1 {
        warnings.push("dispatch.max_attempts is 1 - failed sends are never retried".to_string());
    }

    if dispatch.broker_send_timeout_ms >= dispatch.circuit_breaker_cooldown_ms {
        warnings.push(
            "dispatch.broker_send_timeout_ms >= circuit_breaker_cooldown_ms - a hung probe outlasts the cooldown"
                .to_string(),
        );
    }

    if config.server.shutdown_grace_ms < dispatch.backoff_max_ms {
        warnings.push(
            "server.shutdown_grace_ms < dispatch.backoff_max_ms - retrying envelopes may be abandoned at shutdown"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Bind: {}", summary.bind);
            println!("  Backend: {}", summary.backend);
            println!("  Topic: {}", summary.topic);
            println!("  Dead-letter topic: {}", summary.dead_letter_topic);
            println!("  Max attempts: {}", summary.max_attempts);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
