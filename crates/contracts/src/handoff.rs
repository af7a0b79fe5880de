//! DispatchHandoff trait - Ingestion → Dispatcher seam

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{CorrelationId, DispatchEnvelope};

/// Circuit breaker state as observed by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Fail-fast, cooldown running
    Open,
    /// Cooldown elapsed, one probe allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handoff was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandoffError {
    /// Broker circuit is open; caller should fail fast
    #[error("broker circuit is open")]
    CircuitOpen,

    /// Dispatcher is draining and takes no new work
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// Envelope was not in `Pending` state
    #[error("envelope cannot be submitted")]
    InvalidEnvelope,
}

impl HandoffError {
    /// Error kind name used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "CircuitOpen",
            Self::ShuttingDown => "ShuttingDown",
            Self::InvalidEnvelope => "InvalidEnvelope",
        }
    }
}

/// Non-blocking handoff of an envelope to the delivery side.
///
/// `submit` takes the envelope by value: after a successful call the caller
/// no longer owns it. Implementations must return without waiting for the
/// broker.
pub trait DispatchHandoff: Send + Sync + 'static {
    fn submit(&self, envelope: DispatchEnvelope) -> Result<CorrelationId, HandoffError>;

    /// Current breaker state, used for health reporting
    fn circuit_state(&self) -> CircuitState;
}
