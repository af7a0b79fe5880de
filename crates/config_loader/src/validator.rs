//! Config validation
//!
//! Rules:
//! - field ranges declared on the config types (`validator` derive)
//! - backoff_base_ms <= backoff_max_ms
//! - topic != dead_letter_topic
//! - file backend has a `base_path` param
//! - numeric backend params are positive integers

use contracts::{BrokerBackendKind, ContractError, RelayConfig};
use validator::{Validate, ValidationErrors};

/// Validate a parsed RelayConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &RelayConfig) -> Result<(), ContractError> {
    validate_fields(config)?;
    validate_backoff(config)?;
    validate_topics(config)?;
    validate_broker(config)?;
    Ok(())
}

/// Declarative range/length rules
fn validate_fields(config: &RelayConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let (field, message) = first_error(&errors, "");
        ContractError::config_validation(field, message)
    })
}

/// Flatten nested validator errors to the first `section.field` path
fn first_error(errors: &ValidationErrors, prefix: &str) -> (String, String) {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in fields {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            validator::ValidationErrorsKind::Field(list) => {
                if let Some(err) = list.first() {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' rule", err.code));
                    return (path, message);
                }
            }
            validator::ValidationErrorsKind::Struct(nested) => {
                return first_error(nested, &path);
            }
            validator::ValidationErrorsKind::List(items) => {
                if let Some((idx, nested)) = items.iter().next() {
                    return first_error(nested, &format!("{path}[{idx}]"));
                }
            }
        }
    }
    (prefix.to_string(), "invalid value".to_string())
}

fn validate_backoff(config: &RelayConfig) -> Result<(), ContractError> {
    let dispatch = &config.dispatch;
    if dispatch.backoff_base_ms > dispatch.backoff_max_ms {
        return Err(ContractError::config_validation(
            "dispatch.backoff_base_ms / dispatch.backoff_max_ms",
            format!(
                "backoff_base_ms ({}) must be <= backoff_max_ms ({})",
                dispatch.backoff_base_ms, dispatch.backoff_max_ms
            ),
        ));
    }
    Ok(())
}

fn validate_topics(config: &RelayConfig) -> Result<(), ContractError> {
    let dispatch = &config.dispatch;
    if dispatch.topic == dispatch.dead_letter_topic {
        return Err(ContractError::config_validation(
            "dispatch.dead_letter_topic",
            format!(
                "dead_letter_topic must differ from topic ('{}')",
                dispatch.topic
            ),
        ));
    }
    Ok(())
}

fn validate_broker(config: &RelayConfig) -> Result<(), ContractError> {
    let broker = &config.broker;
    if broker.backend == BrokerBackendKind::File && !broker.params.contains_key("base_path") {
        return Err(ContractError::config_validation(
            "broker.params.base_path",
            "file backend requires a 'base_path' parameter",
        ));
    }
    for param in ["max_message_bytes", "max_retained_messages"] {
        if let Some(raw) = broker.params.get(param) {
            if raw.parse::<usize>().map(|n| n == 0).unwrap_or(true) {
                return Err(ContractError::config_validation(
                    format!("broker.params.{param}"),
                    format!("expected a positive integer, got '{raw}'"),
                ));
            }
        }
    }
    Ok(())
}
