//! FileBroker - durable append-only JSON-lines topics on disk
//!
//! Layout: `<base_path>/<topic>.jsonl`, one `{"key":..,"value":..}` record per
//! line. Writes are serialized so lines never interleave.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use contracts::{Broker, BrokerError, CorrelationId};

use crate::error::DispatcherError;

/// Configuration for FileBroker
#[derive(Debug, Clone)]
pub struct FileBrokerConfig {
    /// Directory holding one file per topic
    pub base_path: PathBuf,
    /// `sync_data` after every append
    pub fsync: bool,
    /// Values above this size are rejected as permanent failures
    pub max_message_bytes: Option<usize>,
}

impl FileBrokerConfig {
    /// Create config from params map
    pub fn from_params(
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .ok_or_else(|| DispatcherError::broker_creation(name, "missing 'base_path' param"))?;
        let fsync = match params.get("fsync").map(String::as_str) {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(DispatcherError::broker_creation(
                    name,
                    format!("invalid 'fsync' value '{other}', expected true or false"),
                ))
            }
        };
        let max_message_bytes = super::parse_max_message_bytes(name, params)?;

        Ok(Self {
            base_path,
            fsync,
            max_message_bytes,
        })
    }
}

#[derive(Serialize)]
struct Record<'a> {
    key: &'a CorrelationId,
    value: serde_json::Value,
}

/// Broker that appends messages to per-topic files
#[derive(Debug)]
pub struct FileBroker {
    name: String,
    config: FileBrokerConfig,
    write_lock: Mutex<()>,
}

impl FileBroker {
    /// Create a new FileBroker, creating the base directory if needed
    pub fn new(name: impl Into<String>, config: FileBrokerConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let config = FileBrokerConfig::from_params(&name, params)?;
        Self::new(&name, config).map_err(|e| DispatcherError::broker_creation(&name, e.to_string()))
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// File backing `topic`
    pub fn topic_path(&self, topic: &str) -> PathBuf {
        self.config.base_path.join(format!("{topic}.jsonl"))
    }

    fn encode(&self, topic: &str, key: &CorrelationId, value: &Bytes) -> Result<Vec<u8>, BrokerError> {
        if !is_valid_topic(topic) {
            return Err(BrokerError::permanent(
                &self.name,
                format!("invalid topic name '{topic}'"),
            ));
        }
        if let Some(limit) = self.config.max_message_bytes {
            if value.len() > limit {
                return Err(BrokerError::permanent(
                    &self.name,
                    format!("message of {} bytes exceeds limit of {limit}", value.len()),
                ));
            }
        }
        let value: serde_json::Value = serde_json::from_slice(value).map_err(|e| {
            BrokerError::permanent(&self.name, format!("value is not valid JSON: {e}"))
        })?;

        let mut line = serde_json::to_vec(&Record { key, value })
            .map_err(|e| BrokerError::permanent(&self.name, e.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }

    async fn append(&self, path: &Path, line: &[u8]) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line).await?;
        file.flush().await?;
        if self.config.fsync {
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// Topic names become file names: no separators, no leading dot.
fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && !topic.starts_with('.')
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

impl Broker for FileBroker {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_broker_send",
        skip(self, value, _timeout),
        fields(broker = %self.name, topic = %topic, correlation_id = %key)
    )]
    async fn send(
        &self,
        topic: &str,
        key: &CorrelationId,
        value: Bytes,
        _timeout: Duration,
    ) -> Result<(), BrokerError> {
        let line = self.encode(topic, key, &value)?;
        let path = self.topic_path(topic);
        self.append(&path, &line).await.map_err(|e| {
            error!(broker = %self.name, path = %path.display(), error = %e, "Append failed");
            BrokerError::transient(&self.name, e.to_string())
        })
    }

    #[instrument(name = "file_broker_close", skip(self))]
    async fn close(&self) -> Result<(), BrokerError> {
        // Wait for an in-progress append to finish.
        let _guard = self.write_lock.lock().await;
        debug!(broker = %self.name, "FileBroker closed");
        Ok(())
    }
}
