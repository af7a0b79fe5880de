//! IngestionWorker - validates a request body and hands the envelope off

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use contracts::{CircuitState, CorrelationId, DispatchEnvelope, DispatchHandoff};

use crate::config::{IngestionMetrics, MetricsSnapshot};
use crate::error::{IngestionError, Result};
use crate::payload::parse_event;

/// Stateless request handler; clones share the handoff and counters.
#[derive(Debug)]
pub struct IngestionWorker<H> {
    handoff: Arc<H>,
    metrics: Arc<IngestionMetrics>,
}

impl<H> Clone for IngestionWorker<H> {
    fn clone(&self) -> Self {
        Self {
            handoff: Arc::clone(&self.handoff),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<H: DispatchHandoff> IngestionWorker<H> {
    pub fn new(handoff: Arc<H>) -> Self {
        Self {
            handoff,
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// Validate `body`, mint a correlation id and submit the envelope.
    ///
    /// Returns as soon as the handoff accepted the envelope; delivery
    /// happens later. Invalid bodies never reach the handoff.
    #[instrument(name = "ingestion_handle", skip(self, body), fields(bytes = body.len()))]
    pub fn handle(&self, body: &[u8]) -> Result<CorrelationId> {
        let event = match parse_event(body, Utc::now()) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_invalid();
                observability::record_request_rejected("InvalidPayload");
                debug!(error = %e, "Rejected webhook");
                return Err(e);
            }
        };

        let envelope = DispatchEnvelope::new(event);
        let correlation_id = envelope.correlation_id();
        match self.handoff.submit(envelope) {
            Ok(id) => {
                self.metrics.record_accepted();
                observability::record_request_accepted();
                info!(correlation_id = %id, "Webhook accepted");
                Ok(id)
            }
            Err(e) => {
                self.metrics.record_refused();
                observability::record_request_rejected(e.kind());
                // The minted id is discarded and never surfaces.
                warn!(correlation_id = %correlation_id, reason = e.kind(), "Handoff refused");
                Err(e.into())
            }
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.handoff.circuit_state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn handoff(&self) -> &H {
        &self.handoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingHandoff;
    use contracts::{DispatchStatus, HandoffError};

    fn worker() -> (IngestionWorker<RecordingHandoff>, Arc<RecordingHandoff>) {
        let handoff = Arc::new(RecordingHandoff::new());
        (IngestionWorker::new(Arc::clone(&handoff)), handoff)
    }

    #[test]
    fn test_accepted_body_submits_once() {
        let (worker, handoff) = worker();
        let id = worker
            .handle(br#"{"clientId":"c1","opportunity":"deal-1"}"#)
            .unwrap();

        let submitted = handoff.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].correlation_id(), id);
        assert_eq!(submitted[0].status(), DispatchStatus::Pending);
        assert_eq!(submitted[0].payload().client_id, "c1");
        assert_eq!(worker.metrics().accepted, 1);
    }

    #[test]
    fn test_invalid_body_never_submits() {
        let (worker, handoff) = worker();
        let err = worker.handle(br#"{"opportunity":"deal-1"}"#).unwrap_err();

        assert_eq!(err.kind(), "InvalidPayload");
        assert_eq!(handoff.submit_count(), 0);
        assert_eq!(worker.metrics().invalid, 1);
    }

    #[test]
    fn test_refused_handoff_surfaces_kind() {
        let (worker, handoff) = worker();
        handoff.refuse_with(Some(HandoffError::CircuitOpen));

        let err = worker
            .handle(br#"{"clientId":"c1","opportunity":"deal-1"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "CircuitOpen");
        assert_eq!(handoff.submit_count(), 0);
        assert_eq!(worker.metrics().refused, 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let (worker, _) = worker();
        let body = br#"{"clientId":"c1","opportunity":"deal-1"}"#;
        let ids: std::collections::HashSet<_> =
            (0..100).map(|_| worker.handle(body).unwrap()).collect();
        assert_eq!(ids.len(), 100);
    }
}
