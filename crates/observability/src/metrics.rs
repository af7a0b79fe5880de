//! Relay 指标记录
//!
//! 所有函数都通过 `metrics` facade 上报；未安装 recorder 时为 no-op，
//! 因此单元测试中可以直接调用。

use contracts::CircuitState;
use metrics::{counter, gauge, histogram};

/// 单次 broker 尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
    Timeout,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
        }
    }
}

/// 记录已接收 (202) 的请求
pub fn record_request_accepted() {
    counter!("webhook_relay_requests_total", "result" => "accepted").increment(1);
}

/// 记录被拒绝的请求
///
/// `reason`: `InvalidPayload` / `CircuitOpen` / `ShuttingDown`
pub fn record_request_rejected(reason: &'static str) {
    counter!("webhook_relay_requests_total", "result" => reason).increment(1);
}

/// 记录一次 broker 投递尝试
pub fn record_dispatch_attempt(broker: &str, outcome: AttemptOutcome) {
    counter!(
        "webhook_relay_dispatch_attempts_total",
        "broker" => broker.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// 记录投递成功：尝试次数 + 从首次尝试到确认的耗时
pub fn record_delivery(attempts: u32, latency_ms: f64) {
    counter!("webhook_relay_delivered_total").increment(1);
    histogram!("webhook_relay_attempts_per_delivery").record(attempts as f64);
    histogram!("webhook_relay_delivery_latency_ms").record(latency_ms);
}

/// 记录死信
///
/// `reason`: `retries_exhausted` / `permanent_failure`
pub fn record_dead_letter(reason: &'static str) {
    counter!("webhook_relay_dead_lettered_total", "reason" => reason).increment(1);
}

/// 记录熔断器状态变化
pub fn record_circuit_transition(from: CircuitState, to: CircuitState) {
    counter!(
        "webhook_relay_circuit_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("webhook_relay_circuit_state").set(circuit_state_value(to));
}

/// 记录当前在途信封数量
pub fn record_in_flight(count: usize) {
    gauge!("webhook_relay_envelopes_in_flight").set(count as f64);
}

/// Gauge 编码：0 = closed, 1 = half_open, 2 = open
fn circuit_state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}
