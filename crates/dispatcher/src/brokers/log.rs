//! LogBroker - logs message summaries via tracing

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, instrument};

use contracts::{Broker, BrokerError, CorrelationId};

/// Broker that only logs what it would have published (dry-run / dev)
#[derive(Debug)]
pub struct LogBroker {
    name: String,
    published: AtomicU64,
}

impl LogBroker {
    /// Create a new LogBroker with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            published: AtomicU64::new(0),
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Broker for LogBroker {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_broker_send",
        skip(self, value, _timeout),
        fields(broker = %self.name)
    )]
    async fn send(
        &self,
        topic: &str,
        key: &CorrelationId,
        value: Bytes,
        _timeout: Duration,
    ) -> Result<(), BrokerError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        info!(
            broker = %self.name,
            topic = %topic,
            correlation_id = %key,
            bytes = value.len(),
            "Message published"
        );
        Ok(())
    }

    #[instrument(name = "log_broker_close", skip(self))]
    async fn close(&self) -> Result<(), BrokerError> {
        info!(
            broker = %self.name,
            published = self.published(),
            "LogBroker closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_broker_always_accepts() {
        let broker = LogBroker::new("test_log");
        for _ in 0..3 {
            let result = broker
                .send(
                    "t",
                    &CorrelationId::generate(),
                    Bytes::from_static(b"{}"),
                    Duration::from_millis(1),
                )
                .await;
            assert!(result.is_ok());
        }
        assert_eq!(broker.published(), 3);
        assert!(broker.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_log_broker_name() {
        let broker = LogBroker::new("my_logger");
        assert_eq!(broker.name(), "my_logger");
    }
}
