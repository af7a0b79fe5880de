//! Broker backends
//!
//! Contains MemoryBroker, FileBroker, and LogBroker, unified behind
//! [`BrokerBackend`] so the dispatcher stays monomorphic.

mod file;
mod log;
mod memory;

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

use contracts::{Broker, BrokerBackendKind, BrokerConfig, BrokerError, CorrelationId};

use crate::error::DispatcherError;

pub use self::file::{FileBroker, FileBrokerConfig};
pub use self::log::LogBroker;
pub use self::memory::{MemoryBroker, StoredMessage};

/// Backend selected at deployment time
#[derive(Debug)]
pub enum BrokerBackend {
    Memory(MemoryBroker),
    File(FileBroker),
    Log(LogBroker),
}

impl BrokerBackend {
    pub fn kind(&self) -> BrokerBackendKind {
        match self {
            Self::Memory(_) => BrokerBackendKind::Memory,
            Self::File(_) => BrokerBackendKind::File,
            Self::Log(_) => BrokerBackendKind::Log,
        }
    }
}

impl From<MemoryBroker> for BrokerBackend {
    fn from(broker: MemoryBroker) -> Self {
        Self::Memory(broker)
    }
}

impl From<FileBroker> for BrokerBackend {
    fn from(broker: FileBroker) -> Self {
        Self::File(broker)
    }
}

impl From<LogBroker> for BrokerBackend {
    fn from(broker: LogBroker) -> Self {
        Self::Log(broker)
    }
}

impl Broker for BrokerBackend {
    fn name(&self) -> &str {
        match self {
            Self::Memory(b) => b.name(),
            Self::File(b) => b.name(),
            Self::Log(b) => b.name(),
        }
    }

    async fn send(
        &self,
        topic: &str,
        key: &CorrelationId,
        value: Bytes,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        match self {
            Self::Memory(b) => b.send(topic, key, value, timeout).await,
            Self::File(b) => b.send(topic, key, value, timeout).await,
            Self::Log(b) => b.send(topic, key, value, timeout).await,
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        match self {
            Self::Memory(b) => b.close().await,
            Self::File(b) => b.close().await,
            Self::Log(b) => b.close().await,
        }
    }
}

/// Build the configured backend
#[instrument(
    name = "dispatcher_create_broker",
    skip(config),
    fields(backend = ?config.backend)
)]
pub fn create_broker(config: &BrokerConfig) -> Result<BrokerBackend, DispatcherError> {
    let backend = match config.backend {
        BrokerBackendKind::Memory => MemoryBroker::from_params("memory", &config.params)?.into(),
        BrokerBackendKind::File => FileBroker::from_params("file", &config.params)?.into(),
        BrokerBackendKind::Log => LogBroker::new("log").into(),
    };
    Ok(backend)
}

pub(crate) fn parse_max_message_bytes(
    name: &str,
    params: &HashMap<String, String>,
) -> Result<Option<usize>, DispatcherError> {
    params
        .get("max_message_bytes")
        .map(|raw| match raw.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(DispatcherError::broker_creation(
                name,
                format!("invalid 'max_message_bytes' value '{raw}'"),
            )),
        })
        .transpose()
}
