//! DispatchTicket - completion handle for one submitted envelope

use tokio::task::JoinHandle;

use contracts::{CorrelationId, DispatchEnvelope};

use crate::error::DispatcherError;

/// Returned by [`crate::Dispatcher::submit`].
///
/// Dropping the ticket detaches the dispatch task; delivery continues.
#[derive(Debug)]
pub struct DispatchTicket {
    correlation_id: CorrelationId,
    handle: JoinHandle<DispatchEnvelope>,
}

impl DispatchTicket {
    pub(crate) fn new(correlation_id: CorrelationId, handle: JoinHandle<DispatchEnvelope>) -> Self {
        Self {
            correlation_id,
            handle,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the envelope to reach a terminal state
    pub async fn outcome(self) -> Result<DispatchEnvelope, DispatcherError> {
        Ok(self.handle.await?)
    }

    /// Let the dispatch run unobserved
    pub fn detach(self) -> CorrelationId {
        self.correlation_id
    }
}
