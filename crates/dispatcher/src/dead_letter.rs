//! Dead-letter routing
//!
//! A dead-lettered envelope is broadcast to in-process subscribers and
//! published once, best effort, to the dead-letter topic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, instrument, warn};

use contracts::{Broker, BrokerError, DispatchEnvelope};

use crate::pool::BrokerPool;

/// Why an envelope was dead-lettered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DeadLetterReason {
    /// Every attempt failed transiently
    RetriesExhausted { last_error: String },
    /// The broker rejected the message outright
    PermanentFailure { error: String },
}

impl DeadLetterReason {
    pub fn from_broker_error(error: &BrokerError) -> Self {
        if error.is_permanent() {
            Self::PermanentFailure {
                error: error.to_string(),
            }
        } else {
            Self::RetriesExhausted {
                last_error: error.to_string(),
            }
        }
    }

    /// Metric / log label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

/// What subscribers and the dead-letter topic receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub envelope: DispatchEnvelope,
    pub reason: DeadLetterReason,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Fan-out point for dead-lettered envelopes
#[derive(Debug)]
pub struct DeadLetterChannel {
    topic: String,
    tx: broadcast::Sender<DeadLetterRecord>,
}

impl DeadLetterChannel {
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive every record routed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<DeadLetterRecord> {
        self.tx.subscribe()
    }

    /// Broadcast `record` and publish it to the dead-letter topic.
    ///
    /// Bypasses the circuit breaker. A failed publish is logged and never retried.
    #[instrument(
        name = "dead_letter_route",
        skip(self, record, pool),
        fields(
            correlation_id = %record.envelope.correlation_id(),
            reason = record.reason.as_str(),
            topic = %self.topic
        )
    )]
    pub async fn route<B: Broker>(
        &self,
        record: DeadLetterRecord,
        pool: &BrokerPool<B>,
        timeout: Duration,
    ) {
        warn!(
            correlation_id = %record.envelope.correlation_id(),
            attempts = record.envelope.attempt_count(),
            reason = ?record.reason,
            "Envelope dead-lettered"
        );
        observability::record_dead_letter(record.reason.as_str());

        let value = match serde_json::to_vec(&record) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Dead-letter record serialization failed");
                // No subscribers is fine.
                let _ = self.tx.send(record);
                return;
            }
        };
        let key = record.envelope.correlation_id();
        let _ = self.tx.send(record);

        let Some(lease) = pool.acquire().await else {
            error!(correlation_id = %key, "Broker pool closed, dead-letter publish skipped");
            return;
        };
        match tokio::time::timeout(timeout, lease.send(&self.topic, &key, value.into(), timeout))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(correlation_id = %key, error = %e, "Dead-letter publish failed");
            }
            Err(_) => {
                error!(
                    correlation_id = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Dead-letter publish timed out"
                );
            }
        }
    }
}
