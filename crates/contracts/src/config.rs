//! RelayConfig - Config Loader output
//!
//! Describes the whole relay: HTTP surface, dispatch tunables, broker backend.
//! The dispatch section and the broker backend have no defaults; every
//! tunable must be supplied.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelayConfig {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// HTTP server settings
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Retry / backoff / circuit breaker tunables
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Broker backend selection
    #[validate(nested)]
    pub broker: BrokerConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,

    /// How long shutdown waits for in-flight dispatches
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Dispatcher tunables
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Attempts per envelope before dead-lettering
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// First retry delay
    #[validate(range(min = 1))]
    pub backoff_base_ms: u64,

    /// Retry delay cap
    #[validate(range(min = 1))]
    pub backoff_max_ms: u64,

    /// Randomize each delay into `[d/2, d]`
    #[serde(default)]
    pub backoff_jitter: bool,

    /// Consecutive failures (across all envelopes) that open the circuit
    #[validate(range(min = 1))]
    pub circuit_breaker_threshold: u32,

    /// Time the circuit stays open before a probe is allowed
    #[validate(range(min = 1))]
    pub circuit_breaker_cooldown_ms: u64,

    /// Per-attempt broker deadline
    #[validate(range(min = 1))]
    pub broker_send_timeout_ms: u64,

    /// Topic accepted events are published to
    #[validate(length(min = 1))]
    pub topic: String,

    /// Topic dead-lettered envelopes are published to
    #[validate(length(min = 1))]
    pub dead_letter_topic: String,
}

impl DispatchConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_cooldown_ms)
    }

    pub fn broker_send_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_send_timeout_ms)
    }
}

/// Broker backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackendKind {
    /// In-process queue with bounded retention
    Memory,
    /// Append-only JSON-lines files
    File,
    /// Logs messages via tracing
    Log,
}

/// Broker backend selection
///
/// `backend` has no default; a deployment must name where events go.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    /// Backend kind
    pub backend: BrokerBackendKind,

    /// Concurrent broker leases
    #[serde(default = "default_pool_size")]
    #[validate(range(min = 1))]
    pub pool_size: usize,

    /// Backend-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_pool_size() -> usize {
    16
}

impl BrokerConfig {
    /// Backend with the default pool size and no params
    pub fn new(backend: BrokerBackendKind) -> Self {
        Self {
            backend,
            pool_size: default_pool_size(),
            params: HashMap::new(),
        }
    }
}
