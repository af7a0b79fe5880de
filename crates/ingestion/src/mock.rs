//! Mock Dispatcher 接收端
//!
//! 用于不启动 Dispatcher 的 HTTP 层测试：记录每次 `submit`，
//! 可配置拒绝原因与熔断状态。

use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{CircuitState, CorrelationId, DispatchEnvelope, DispatchHandoff, HandoffError};

#[derive(Debug)]
struct State {
    submitted: Vec<DispatchEnvelope>,
    refusal: Option<HandoffError>,
    circuit: CircuitState,
}

/// Handoff that records envelopes instead of delivering them
#[derive(Debug)]
pub struct RecordingHandoff {
    state: Mutex<State>,
}

impl Default for RecordingHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHandoff {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                submitted: Vec::new(),
                refusal: None,
                circuit: CircuitState::Closed,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every following submission with `refusal` (`None` accepts again)
    pub fn refuse_with(&self, refusal: Option<HandoffError>) {
        self.lock().refusal = refusal;
    }

    /// Circuit state reported to health checks
    pub fn set_circuit(&self, circuit: CircuitState) {
        self.lock().circuit = circuit;
    }

    /// Envelopes accepted so far, in submission order
    pub fn submitted(&self) -> Vec<DispatchEnvelope> {
        self.lock().submitted.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.lock().submitted.len()
    }
}

impl DispatchHandoff for RecordingHandoff {
    fn submit(&self, envelope: DispatchEnvelope) -> Result<CorrelationId, HandoffError> {
        let mut state = self.lock();
        if let Some(refusal) = state.refusal {
            return Err(refusal);
        }
        let id = envelope.correlation_id();
        state.submitted.push(envelope);
        Ok(id)
    }

    fn circuit_state(&self) -> CircuitState {
        self.lock().circuit
    }
}
