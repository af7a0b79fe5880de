//! Broker trait - Dispatcher output interface
//!
//! Abstract durable queue. Backends accept a keyed message on a topic and
//! classify their failures as transient or permanent.

use bytes::Bytes;
use std::time::Duration;

use crate::{BrokerError, CorrelationId};

/// Durable queue capability.
///
/// Implementations are shared across concurrent attempts (`&self`), so any
/// interior state must be synchronized by the backend.
#[trait_variant::make(Broker: Send)]
pub trait LocalBroker {
    /// Backend name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Publish `value` on `topic` keyed by `key`.
    ///
    /// `timeout` is the per-attempt budget; the dispatcher enforces it as
    /// well, backends may use it to configure their own client deadline.
    ///
    /// # Errors
    /// `BrokerErrorKind::Transient` for retryable failures,
    /// `BrokerErrorKind::Permanent` when the message itself was rejected.
    async fn send(
        &self,
        topic: &str,
        key: &CorrelationId,
        value: Bytes,
        timeout: Duration,
    ) -> Result<(), BrokerError>;

    /// Release backend resources
    async fn close(&self) -> Result<(), BrokerError>;
}
