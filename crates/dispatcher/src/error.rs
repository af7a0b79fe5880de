//! Dispatcher error types

use contracts::CorrelationId;
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Broker backend creation error
    #[error("failed to create broker '{name}': {message}")]
    BrokerCreation { name: String, message: String },

    /// Circuit open - submission refused, nothing was attempted
    #[error("circuit open, envelope {correlation_id} refused")]
    CircuitOpen { correlation_id: CorrelationId },

    /// Dispatcher is draining
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// Invalid dispatcher settings
    #[error("invalid dispatcher settings: {0}")]
    Settings(String),

    /// Envelope contract violation
    #[error("envelope error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// Dispatch task panicked or was aborted
    #[error("dispatch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a broker creation error
    pub fn broker_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
