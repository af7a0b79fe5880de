//! Dispatcher - reliable handoff from accepted envelopes to the broker
//!
//! Each submitted envelope gets its own task. The task owns the envelope,
//! runs attempts strictly one after another, and ends in `Delivered` or
//! `DeadLettered`, unless shutdown abandons it first. Broker access is gated
//! by the shared circuit breaker and bounded by the broker pool.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    Broker, BrokerError, CircuitState, CorrelationId, DispatchConfig, DispatchEnvelope,
    DispatchHandoff, DispatchStatus, HandoffError, RelayConfig,
};
use observability::AttemptOutcome;

use crate::backoff::BackoffPolicy;
use crate::breaker::{Admission, AttemptPermit, CircuitBreaker};
use crate::brokers::{create_broker, BrokerBackend};
use crate::dead_letter::{DeadLetterChannel, DeadLetterReason, DeadLetterRecord};
use crate::error::DispatcherError;
use crate::handle::DispatchTicket;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::pool::{BrokerLease, BrokerPool};

const DEFAULT_POOL_SIZE: usize = 16;
const DEFAULT_DEAD_LETTER_CAPACITY: usize = 256;

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<B> {
    config: DispatchConfig,
    broker: B,
    pool_size: usize,
    dead_letter_capacity: usize,
}

impl<B: Broker + Sync + 'static> DispatcherBuilder<B> {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatchConfig, broker: B) -> Self {
        Self {
            config,
            broker,
            pool_size: DEFAULT_POOL_SIZE,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }

    /// Concurrent broker leases
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Buffered dead-letter records per subscriber
    pub fn dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    /// Build the dispatcher
    #[instrument(name = "dispatcher_builder_build", skip(self), fields(broker = %self.broker.name()))]
    pub fn build(self) -> Result<Dispatcher<B>, DispatcherError> {
        Self::check(&self.config)?;
        let config = self.config;

        let inner = Inner {
            backoff: BackoffPolicy::new(config.backoff_base(), config.backoff_max(), config.backoff_jitter),
            breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown(),
            ),
            dead_letters: DeadLetterChannel::new(
                config.dead_letter_topic.clone(),
                self.dead_letter_capacity,
            ),
            pool: BrokerPool::new(self.broker, self.pool_size),
            tracker: TaskTracker::new(),
            abandon: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            metrics: DispatchMetrics::new(),
            config,
        };
        info!(
            topic = %inner.config.topic,
            max_attempts = inner.config.max_attempts,
            pool_size = inner.pool.size(),
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            inner: Arc::new(inner),
        })
    }

    fn check(config: &DispatchConfig) -> Result<(), DispatcherError> {
        if config.max_attempts == 0 {
            return Err(DispatcherError::Settings("max_attempts must be >= 1".into()));
        }
        if config.backoff_base_ms > config.backoff_max_ms {
            return Err(DispatcherError::Settings(
                "backoff_base_ms must not exceed backoff_max_ms".into(),
            ));
        }
        if config.topic.is_empty() || config.dead_letter_topic.is_empty() {
            return Err(DispatcherError::Settings("topics must not be empty".into()));
        }
        Ok(())
    }
}

struct Inner<B> {
    config: DispatchConfig,
    backoff: BackoffPolicy,
    pool: BrokerPool<B>,
    breaker: CircuitBreaker,
    dead_letters: DeadLetterChannel,
    tracker: TaskTracker,
    /// Fired when the shutdown grace period runs out
    abandon: CancellationToken,
    shutting_down: AtomicBool,
    in_flight: Mutex<HashSet<CorrelationId>>,
    metrics: DispatchMetrics,
}

/// Result of [`Dispatcher::shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// All dispatch tasks finished within the grace period
    pub drained: bool,
    /// Envelopes still in flight when the grace period ran out; their
    /// tasks are stopped and the envelopes stay non-terminal
    pub abandoned: Vec<CorrelationId>,
    pub metrics: MetricsSnapshot,
}

/// Shared handle to the dispatch pipeline; clones refer to the same dispatcher.
pub struct Dispatcher<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broker + Sync + 'static> Dispatcher<B> {
    /// Take ownership of a `Pending` envelope and start delivering it.
    ///
    /// Never waits for the broker.
    ///
    /// # Errors
    /// - `ShuttingDown` once [`Dispatcher::shutdown`] has started
    /// - `CircuitOpen` while the breaker is open and cooling down
    /// - `Contract` when the envelope is not `Pending`
    pub fn submit(&self, mut envelope: DispatchEnvelope) -> Result<DispatchTicket, DispatcherError> {
        let inner = &self.inner;
        let correlation_id = envelope.correlation_id();

        if inner.shutting_down.load(Ordering::Acquire) {
            inner.metrics.inc_refused();
            return Err(DispatcherError::ShuttingDown);
        }
        if inner.breaker.rejects_new_work() {
            inner.metrics.inc_refused();
            debug!(correlation_id = %correlation_id, "Submission refused, circuit open");
            return Err(DispatcherError::CircuitOpen { correlation_id });
        }
        envelope.transition(DispatchStatus::Enqueued)?;

        let guard = InFlightGuard::register(Arc::clone(inner), correlation_id);
        inner.metrics.inc_submitted();

        let task_inner = Arc::clone(inner);
        let handle = inner.tracker.spawn(async move {
            let _guard = guard;
            task_inner.deliver(envelope).await
        });
        Ok(DispatchTicket::new(correlation_id, handle))
    }

    /// Receive every envelope dead-lettered from now on
    pub fn subscribe_dead_letters(&self) -> broadcast::Receiver<DeadLetterRecord> {
        self.inner.dead_letters.subscribe()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &BrokerPool<B> {
        &self.inner.pool
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Correlation ids of envelopes not yet terminal
    pub fn in_flight(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<_> = self.inner.in_flight().iter().copied().collect();
        ids.sort();
        ids
    }

    /// Stop accepting work, wait up to `grace` for in-flight envelopes,
    /// then close the pool and the broker.
    ///
    /// Tasks still running after `grace` are stopped where they are. Their
    /// envelopes are neither dead-lettered nor counted against the breaker.
    #[instrument(name = "dispatcher_shutdown", skip(self), fields(grace_ms = grace.as_millis() as u64))]
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::Release);
        inner.tracker.close();
        info!(in_flight = inner.tracker.len(), "Dispatcher draining");

        let drained = tokio::time::timeout(grace, inner.tracker.wait()).await.is_ok();
        let abandoned = if drained {
            Vec::new()
        } else {
            let ids = self.in_flight();
            for id in &ids {
                warn!(correlation_id = %id, "Envelope still in flight after grace period");
            }
            warn!(count = ids.len(), "Grace period elapsed before dispatches finished");
            inner.abandon.cancel();
            // Stopped tasks only finish an in-progress dead-letter publish.
            if tokio::time::timeout(inner.config.broker_send_timeout(), inner.tracker.wait())
                .await
                .is_err()
            {
                error!("Dispatch tasks did not stop after cancellation");
            }
            ids
        };

        inner.pool.close();
        if let Err(e) = inner.pool.broker().close().await {
            error!(error = %e, "Broker close failed");
        }

        let metrics = inner.metrics.snapshot();
        info!(
            delivered = metrics.delivered,
            dead_lettered = metrics.dead_lettered,
            drained,
            "Dispatcher shutdown complete"
        );
        ShutdownReport {
            drained,
            abandoned,
            metrics,
        }
    }
}

impl<B: Broker + Sync + 'static> Inner<B> {
    fn in_flight(&self) -> MutexGuard<'_, HashSet<CorrelationId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(
        name = "dispatcher_deliver",
        skip(self, envelope),
        fields(correlation_id = %envelope.correlation_id())
    )]
    async fn deliver(&self, mut envelope: DispatchEnvelope) -> DispatchEnvelope {
        let delivery = tokio::select! {
            biased;
            _ = self.abandon.cancelled() => Delivery::Abandoned,
            delivery = self.run(&mut envelope) => delivery,
        };

        match delivery {
            Delivery::Delivered => self.delivered(envelope),
            Delivery::DeadLetter(reason) => self.dead_letter(envelope, reason).await,
            Delivery::Abandoned => {
                self.metrics.inc_abandoned();
                warn!(
                    status = envelope.status().as_str(),
                    attempts = envelope.attempt_count(),
                    "Envelope abandoned at shutdown"
                );
                envelope
            }
        }
    }

    /// Attempt loop; leaves the terminal transition to `deliver`
    async fn run(&self, envelope: &mut DispatchEnvelope) -> Delivery {
        let max_attempts = self.config.max_attempts;

        loop {
            let permit = self.admit().await;
            // A closed pool means shutdown, not a broker failure.
            let Some(lease) = self.pool.acquire().await else {
                return Delivery::Abandoned;
            };
            let attempt = match envelope.begin_attempt(Utc::now(), max_attempts) {
                Ok(attempt) => attempt,
                Err(e) => {
                    error!(error = %e, "Envelope cannot be attempted");
                    return Delivery::DeadLetter(DeadLetterReason::RetriesExhausted {
                        last_error: e.to_string(),
                    });
                }
            };

            match self.attempt(lease, envelope, attempt).await {
                Ok(()) => {
                    permit.succeed();
                    return Delivery::Delivered;
                }
                Err(e) if e.is_permanent() => {
                    // The broker answered; it is reachable.
                    permit.succeed();
                    warn!(attempt, error = %e, "Broker rejected envelope");
                    return Delivery::DeadLetter(DeadLetterReason::from_broker_error(&e));
                }
                Err(e) => {
                    permit.fail();
                    if attempt >= max_attempts {
                        warn!(attempt, error = %e, "Attempt budget exhausted");
                        return Delivery::DeadLetter(DeadLetterReason::from_broker_error(&e));
                    }

                    set_status(envelope, DispatchStatus::Retrying);
                    let delay = self.backoff.delay_for(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Wait until the breaker lets an attempt through.
    ///
    /// Deferred waits consume no attempt.
    async fn admit(&self) -> AttemptPermit<'_> {
        loop {
            let changed = self.breaker.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.breaker.try_acquire() {
                Admission::Granted(permit) => return permit,
                Admission::Deferred(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Attempt deferred by circuit breaker");
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// One broker send under a pooled lease and the per-attempt deadline
    async fn attempt(
        &self,
        lease: BrokerLease<B>,
        envelope: &DispatchEnvelope,
        attempt: u32,
    ) -> Result<(), BrokerError> {
        let broker = self.pool.broker().name();
        let timeout = self.config.broker_send_timeout();
        self.metrics.inc_attempts();

        let (result, outcome) = match self.send(lease, envelope, timeout).await {
            Ok(Ok(())) => (Ok(()), AttemptOutcome::Success),
            Ok(Err(e)) if e.is_permanent() => (Err(e), AttemptOutcome::Permanent),
            Ok(Err(e)) => (Err(e), AttemptOutcome::Transient),
            Err(_) => (
                Err(BrokerError::transient(
                    broker,
                    format!("send timed out after {}ms", timeout.as_millis()),
                )),
                AttemptOutcome::Timeout,
            ),
        };
        observability::record_dispatch_attempt(broker, outcome);
        if result.is_err() {
            self.metrics.inc_failed_attempts();
        }
        debug!(attempt, outcome = outcome.as_str(), "Attempt finished");
        result
    }

    async fn send(
        &self,
        lease: BrokerLease<B>,
        envelope: &DispatchEnvelope,
        timeout: Duration,
    ) -> Result<Result<(), BrokerError>, Elapsed> {
        let value = match envelope.to_bytes() {
            Ok(value) => value,
            Err(e) => return Ok(Err(BrokerError::permanent(lease.broker_name(), e.to_string()))),
        };
        let key = envelope.correlation_id();
        tokio::time::timeout(timeout, lease.send(&self.config.topic, &key, value, timeout)).await
    }

    fn delivered(&self, mut envelope: DispatchEnvelope) -> DispatchEnvelope {
        set_status(&mut envelope, DispatchStatus::Delivered);
        self.metrics.inc_delivered();

        let latency_ms = envelope
            .first_attempt_at()
            .map(|first| (Utc::now() - first).num_milliseconds().max(0) as f64)
            .unwrap_or_default();
        observability::record_delivery(envelope.attempt_count(), latency_ms);
        info!(attempts = envelope.attempt_count(), "Envelope delivered");
        envelope
    }

    async fn dead_letter(
        &self,
        mut envelope: DispatchEnvelope,
        reason: DeadLetterReason,
    ) -> DispatchEnvelope {
        set_status(&mut envelope, DispatchStatus::DeadLettered);
        self.metrics.inc_dead_lettered();

        let record = DeadLetterRecord {
            envelope: envelope.clone(),
            reason,
            dead_lettered_at: Utc::now(),
        };
        self.dead_letters
            .route(record, &self.pool, self.config.broker_send_timeout())
            .await;
        envelope
    }
}

/// How the attempt loop ended
enum Delivery {
    Delivered,
    DeadLetter(DeadLetterReason),
    Abandoned,
}

fn set_status(envelope: &mut DispatchEnvelope, next: DispatchStatus) {
    if let Err(e) = envelope.transition(next) {
        error!(correlation_id = %envelope.correlation_id(), error = %e, "Unexpected status transition");
    }
}

/// Tracks one envelope in the in-flight registry for as long as its task lives
struct InFlightGuard<B> {
    inner: Arc<Inner<B>>,
    correlation_id: CorrelationId,
}

impl<B: Broker + Sync + 'static> InFlightGuard<B> {
    fn register(inner: Arc<Inner<B>>, correlation_id: CorrelationId) -> Self {
        inner.in_flight().insert(correlation_id);
        observability::record_in_flight(inner.metrics.task_started());
        Self {
            inner,
            correlation_id,
        }
    }
}

impl<B> Drop for InFlightGuard<B> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.correlation_id);
        observability::record_in_flight(self.inner.metrics.task_finished());
    }
}

impl<B: Broker + Sync + 'static> DispatchHandoff for Dispatcher<B> {
    fn submit(&self, envelope: DispatchEnvelope) -> Result<CorrelationId, HandoffError> {
        match Dispatcher::submit(self, envelope) {
            Ok(ticket) => Ok(ticket.detach()),
            Err(DispatcherError::CircuitOpen { .. }) => Err(HandoffError::CircuitOpen),
            Err(DispatcherError::ShuttingDown) => Err(HandoffError::ShuttingDown),
            Err(e) => {
                error!(error = %e, "Envelope handoff failed");
                Err(HandoffError::InvalidEnvelope)
            }
        }
    }

    fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }
}

/// Convenience function to create a dispatcher from the relay configuration
#[instrument(name = "dispatcher_create", skip(config), fields(backend = ?config.broker.backend))]
pub fn create_dispatcher(config: &RelayConfig) -> Result<Dispatcher<BrokerBackend>, DispatcherError> {
    let broker = create_broker(&config.broker)?;
    DispatcherBuilder::new(config.dispatch.clone(), broker)
        .pool_size(config.broker.pool_size)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::MemoryBroker;
    use contracts::{BrokerErrorKind, WebhookEvent};
    use tokio::time::Instant;

    fn config(max_attempts: u32, threshold: u32) -> DispatchConfig {
        DispatchConfig {
            max_attempts,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            backoff_jitter: false,
            circuit_breaker_threshold: threshold,
            circuit_breaker_cooldown_ms: 1_000,
            broker_send_timeout_ms: 500,
            topic: "webhooks".into(),
            dead_letter_topic: "webhooks.dlq".into(),
        }
    }

    fn dispatcher(broker: &MemoryBroker, config: DispatchConfig) -> Dispatcher<MemoryBroker> {
        DispatcherBuilder::new(config, broker.clone())
            .pool_size(4)
            .build()
            .unwrap()
    }

    fn envelope() -> DispatchEnvelope {
        DispatchEnvelope::new(WebhookEvent::new("c1", "deal-1", Utc::now()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_on_first_attempt() {
        let broker = MemoryBroker::new("mem");
        let dispatcher = dispatcher(&broker, config(3, 5));

        let ticket = dispatcher.submit(envelope()).unwrap();
        let id = ticket.correlation_id();
        let env = ticket.outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::Delivered);
        assert_eq!(env.attempt_count(), 1);
        let messages = broker.messages("webhooks");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, id);

        let value: serde_json::Value = serde_json::from_slice(&messages[0].value).unwrap();
        assert_eq!(value["correlationId"], id.to_string());
        assert_eq!(dispatcher.pool().available(), 4);
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_delivers() {
        let broker = MemoryBroker::new("mem");
        broker.fail_next(3, BrokerErrorKind::Transient);
        let dispatcher = dispatcher(&broker, config(5, 10));

        let start = Instant::now();
        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::Delivered);
        assert_eq!(env.attempt_count(), 4);
        // 100 + 200 + 400
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert_eq!(broker.send_count(), 4);

        let metrics = dispatcher.metrics();
        assert_eq!(metrics.attempts, 4);
        assert_eq!(metrics.failed_attempts, 3);
        assert_eq!(metrics.delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_dead_letter_once() {
        let broker = MemoryBroker::new("mem");
        broker.always_fail(Some(BrokerErrorKind::Transient));
        let dispatcher = dispatcher(&broker, config(3, 100));
        let mut dead_letters = dispatcher.subscribe_dead_letters();

        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::DeadLettered);
        assert_eq!(env.attempt_count(), 3);
        let record = dead_letters.recv().await.unwrap();
        assert_eq!(record.envelope.correlation_id(), env.correlation_id());
        assert!(matches!(record.reason, DeadLetterReason::RetriesExhausted { .. }));
        assert!(dead_letters.try_recv().is_err());
        // Three attempts plus one dead-letter publish.
        assert_eq!(broker.send_count(), 4);
        assert_eq!(dispatcher.metrics().dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_skips_retries() {
        let broker = MemoryBroker::new("mem");
        broker.fail_next(1, BrokerErrorKind::Permanent);
        let dispatcher = dispatcher(&broker, config(5, 1));
        let mut dead_letters = dispatcher.subscribe_dead_letters();

        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::DeadLettered);
        assert_eq!(env.attempt_count(), 1);
        assert!(matches!(
            dead_letters.recv().await.unwrap().reason,
            DeadLetterReason::PermanentFailure { .. }
        ));
        let published = broker.messages("webhooks.dlq");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, env.correlation_id());
        // Permanent rejections do not trip the breaker.
        assert_eq!(dispatcher.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let broker = MemoryBroker::new("mem");
        broker.set_delay(Some(Duration::from_secs(5)));
        let dispatcher = dispatcher(&broker, config(2, 100));

        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::DeadLettered);
        assert_eq!(env.attempt_count(), 2);
        assert_eq!(broker.message_count("webhooks"), 0);
        assert_eq!(dispatcher.pool().available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_refuses_submissions() {
        let broker = MemoryBroker::new("mem");
        broker.always_fail(Some(BrokerErrorKind::Transient));
        let dispatcher = dispatcher(&broker, config(1, 2));

        let a = dispatcher.submit(envelope()).unwrap();
        let b = dispatcher.submit(envelope()).unwrap();
        a.outcome().await.unwrap();
        b.outcome().await.unwrap();
        assert_eq!(dispatcher.circuit_state(), CircuitState::Open);

        let sends = broker.send_count();
        let err = dispatcher.submit(envelope()).unwrap_err();
        assert!(matches!(err, DispatcherError::CircuitOpen { .. }));
        assert_eq!(broker.send_count(), sends);
        assert_eq!(dispatcher.metrics().refused, 1);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(dispatcher.circuit_state(), CircuitState::HalfOpen);
        broker.always_fail(None);

        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();
        assert_eq!(env.status(), DispatchStatus::Delivered);
        assert_eq!(dispatcher.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_cooldown_without_spending_attempts() {
        let broker = MemoryBroker::new("mem");
        broker.fail_next(1, BrokerErrorKind::Transient);
        let dispatcher = dispatcher(&broker, config(3, 1));

        let start = Instant::now();
        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::Delivered);
        assert_eq!(env.attempt_count(), 2);
        assert!(start.elapsed() >= Duration::from_millis(1_000));
        assert_eq!(dispatcher.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_pending_envelope_is_rejected() {
        let broker = MemoryBroker::new("mem");
        let dispatcher = dispatcher(&broker, config(3, 5));
        let mut env = envelope();
        env.transition(DispatchStatus::Enqueued).unwrap();

        let err = dispatcher.submit(env).unwrap_err();
        assert!(matches!(err, DispatcherError::Contract(_)));
        assert_eq!(broker.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_refuses() {
        let broker = MemoryBroker::new("mem");
        broker.set_delay(Some(Duration::from_millis(50)));
        let dispatcher = dispatcher(&broker, config(3, 5));

        let ticket = dispatcher.submit(envelope()).unwrap();
        let report = dispatcher.shutdown(Duration::from_secs(1)).await;

        assert!(report.drained);
        assert!(report.abandoned.is_empty());
        assert_eq!(report.metrics.delivered, 1);
        assert!(ticket.is_finished());
        assert!(broker.is_closed());
        assert!(matches!(
            dispatcher.submit(envelope()),
            Err(DispatcherError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_abandoned_envelopes() {
        let broker = MemoryBroker::new("mem");
        broker.set_delay(Some(Duration::from_secs(60)));
        let mut cfg = config(3, 5);
        cfg.broker_send_timeout_ms = 120_000;
        let dispatcher = dispatcher(&broker, cfg);

        let id = dispatcher.submit(envelope()).unwrap().detach();
        let report = dispatcher.shutdown(Duration::from_millis(100)).await;

        assert!(!report.drained);
        assert_eq!(report.abandoned, vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_send_is_not_dead_lettered() {
        let broker = MemoryBroker::new("mem");
        broker.set_delay(Some(Duration::from_millis(400)));
        let dispatcher = dispatcher(&broker, config(3, 1));
        let mut dead_letters = dispatcher.subscribe_dead_letters();

        let ticket = dispatcher.submit(envelope()).unwrap();
        let id = ticket.correlation_id();
        let report = dispatcher.shutdown(Duration::from_millis(50)).await;

        assert!(!report.drained);
        assert_eq!(report.abandoned, vec![id]);
        assert_eq!(report.metrics.abandoned, 1);
        assert_eq!(report.metrics.dead_lettered, 0);

        let env = ticket.outcome().await.unwrap();
        assert_eq!(env.status(), DispatchStatus::Enqueued);
        assert_eq!(env.attempt_count(), 1);
        assert!(dead_letters.try_recv().is_err());
        assert_eq!(broker.send_count(), 1);
        assert_eq!(broker.message_count("webhooks.dlq"), 0);
        assert_eq!(dispatcher.circuit_state(), CircuitState::Closed);
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_retry_keeps_attempt_count() {
        let broker = MemoryBroker::new("mem");
        broker.fail_next(1, BrokerErrorKind::Transient);
        let mut cfg = config(3, 100);
        cfg.backoff_base_ms = 1_000;
        let dispatcher = dispatcher(&broker, cfg);

        let ticket = dispatcher.submit(envelope()).unwrap();
        let report = dispatcher.shutdown(Duration::from_millis(200)).await;
        assert!(!report.drained);

        let env = ticket.outcome().await.unwrap();
        assert_eq!(env.status(), DispatchStatus::Retrying);
        assert_eq!(env.attempt_count(), 1);
        assert_eq!(broker.send_count(), 1);
        assert_eq!(dispatcher.metrics().dead_lettered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_pool_is_not_a_failed_attempt() {
        let broker = MemoryBroker::new("mem");
        let dispatcher = dispatcher(&broker, config(3, 1));
        dispatcher.pool().close();

        let env = dispatcher.submit(envelope()).unwrap().outcome().await.unwrap();

        assert_eq!(env.status(), DispatchStatus::Enqueued);
        assert_eq!(env.attempt_count(), 0);
        assert_eq!(broker.send_count(), 0);
        let metrics = dispatcher.metrics();
        assert_eq!(metrics.attempts, 0);
        assert_eq!(metrics.abandoned, 1);
        assert_eq!(metrics.dead_lettered, 0);
        assert_eq!(dispatcher.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_maps_refusals() {
        let broker = MemoryBroker::new("mem");
        let dispatcher = dispatcher(&broker, config(3, 5));
        let handoff: &dyn DispatchHandoff = &dispatcher;

        let env = envelope();
        let id = env.correlation_id();
        assert_eq!(handoff.submit(env).unwrap(), id);
        assert_eq!(handoff.circuit_state(), CircuitState::Closed);

        dispatcher.shutdown(Duration::from_secs(1)).await;
        assert_eq!(handoff.submit(envelope()), Err(HandoffError::ShuttingDown));
    }

    #[test]
    fn test_builder_rejects_bad_settings() {
        let mut cfg = config(0, 5);
        assert!(matches!(
            DispatcherBuilder::new(cfg.clone(), MemoryBroker::new("m")).build(),
            Err(DispatcherError::Settings(_))
        ));
        cfg.max_attempts = 3;
        cfg.backoff_base_ms = 5_000;
        assert!(DispatcherBuilder::new(cfg, MemoryBroker::new("m")).build().is_err());
    }
}
