//! BrokerPool - bounded, explicitly owned broker access

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use contracts::{Broker, BrokerError, CorrelationId};

/// Bounded set of broker leases shared by every dispatch task.
///
/// One lease per attempt. Leases are released on drop, so every exit path of
/// an attempt (success, error, timeout, cancellation) returns its slot.
#[derive(Debug)]
pub struct BrokerPool<B> {
    broker: Arc<B>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl<B> Clone for BrokerPool<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            permits: Arc::clone(&self.permits),
            size: self.size,
        }
    }
}

impl<B: Broker> BrokerPool<B> {
    pub fn new(broker: B, size: usize) -> Self {
        let size = size.max(1);
        Self {
            broker: Arc::new(broker),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free lease.
    ///
    /// Returns `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<BrokerLease<B>> {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        Some(BrokerLease {
            broker: Arc::clone(&self.broker),
            _permit: permit,
        })
    }

    /// Leases currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Stop handing out leases. Outstanding leases stay valid until dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Underlying backend (for shutdown and inspection)
    pub fn broker(&self) -> &B {
        &self.broker
    }
}

/// One checked-out broker slot
#[derive(Debug)]
pub struct BrokerLease<B> {
    broker: Arc<B>,
    _permit: OwnedSemaphorePermit,
}

impl<B: Broker> BrokerLease<B> {
    pub fn broker_name(&self) -> &str {
        self.broker.name()
    }

    pub async fn send(
        &self,
        topic: &str,
        key: &CorrelationId,
        value: Bytes,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        self.broker.send(topic, key, value, timeout).await
    }
}
