//! Layered error definitions
//!
//! Categorized by source: config / envelope / broker

use std::fmt;

use thiserror::Error;

use crate::DispatchStatus;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Envelope Errors =====
    /// Illegal status transition
    #[error("illegal envelope transition {from} -> {to}")]
    InvalidTransition {
        from: DispatchStatus,
        to: DispatchStatus,
    },

    /// Attempt budget exhausted
    #[error("attempt budget of {max_attempts} exhausted")]
    AttemptsExhausted { max_attempts: u32 },

    /// Envelope serialization error
    #[error("envelope serialization error: {0}")]
    Serialization(String),

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Broker failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerErrorKind {
    /// Retryable: timeouts, transport errors, broker unavailable
    Transient,
    /// Not retryable: the broker rejected the message itself
    Permanent,
}

impl BrokerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a broker send
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} broker failure on '{broker}': {message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub broker: String,
    pub message: String,
}

impl BrokerError {
    /// Create a retryable failure
    pub fn transient(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Transient,
            broker: broker.into(),
            message: message.into(),
        }
    }

    /// Create a non-retryable failure
    pub fn permanent(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Permanent,
            broker: broker.into(),
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == BrokerErrorKind::Permanent
    }
}
