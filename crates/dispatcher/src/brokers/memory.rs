//! MemoryBroker - in-process broker recording messages per topic
//!
//! Used by tests and local runs. Failures can be scripted so the retry and
//! circuit paths can be driven deterministically. Nothing consumes the
//! topics, so each one keeps only the newest `max_retained_messages`.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, instrument};

use contracts::{Broker, BrokerError, BrokerErrorKind, CorrelationId};

use crate::error::DispatcherError;

/// Messages kept per topic unless `max_retained_messages` says otherwise
pub const DEFAULT_MAX_RETAINED: usize = 10_000;

/// A message accepted by the memory broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub key: CorrelationId,
    pub value: Bytes,
}

#[derive(Debug, Default)]
struct Behaviour {
    scripted: VecDeque<BrokerErrorKind>,
    always_fail: Option<BrokerErrorKind>,
    delay: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    max_message_bytes: Option<usize>,
    max_retained: usize,
    topics: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    behaviour: Mutex<Behaviour>,
    send_count: AtomicU64,
    closed: AtomicBool,
}

/// In-process broker. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None, DEFAULT_MAX_RETAINED)
    }

    /// Reject values larger than `limit` bytes as permanent failures
    pub fn with_max_message_bytes(name: impl Into<String>, limit: usize) -> Self {
        Self::build(name.into(), Some(limit), DEFAULT_MAX_RETAINED)
    }

    /// Keep at most `retained` messages per topic, dropping the oldest
    pub fn with_max_retained(name: impl Into<String>, retained: usize) -> Self {
        Self::build(name.into(), None, retained)
    }

    /// Create from backend params (`max_message_bytes`, `max_retained_messages`)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let limit = super::parse_max_message_bytes(&name, params)?;
        let retained = match params.get("max_retained_messages") {
            None => DEFAULT_MAX_RETAINED,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(DispatcherError::broker_creation(
                        &name,
                        format!("invalid 'max_retained_messages' value '{raw}'"),
                    ))
                }
            },
        };
        Ok(Self::build(name, limit, retained))
    }

    fn build(name: String, max_message_bytes: Option<usize>, max_retained: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                max_message_bytes,
                max_retained: max_retained.max(1),
                topics: Mutex::new(HashMap::new()),
                behaviour: Mutex::new(Behaviour::default()),
                send_count: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Fail the next `n` sends with `kind`, then behave normally
    pub fn fail_next(&self, n: usize, kind: BrokerErrorKind) {
        lock(&self.inner.behaviour)
            .scripted
            .extend(std::iter::repeat_n(kind, n));
    }

    /// Fail every send with `kind` until cleared with `None`
    pub fn always_fail(&self, kind: Option<BrokerErrorKind>) {
        lock(&self.inner.behaviour).always_fail = kind;
    }

    /// Delay every send; combined with the dispatcher timeout this simulates a hung broker
    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.behaviour).delay = delay;
    }

    /// Messages retained on `topic`, in arrival order
    pub fn messages(&self, topic: &str) -> Vec<StoredMessage> {
        lock(&self.inner.topics)
            .get(topic)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self, topic: &str) -> usize {
        lock(&self.inner.topics).get(topic).map_or(0, VecDeque::len)
    }

    /// Every send call, failed ones included
    pub fn send_count(&self) -> u64 {
        self.inner.send_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn scripted_failure(&self) -> Option<BrokerErrorKind> {
        let mut behaviour = lock(&self.inner.behaviour);
        behaviour.scripted.pop_front().or(behaviour.always_fail)
    }

    fn delay(&self) -> Option<Duration> {
        lock(&self.inner.behaviour).delay
    }
}

impl Broker for MemoryBroker {
    fn name(&self) -> &str {
        &self.inner.name
    }

    #[instrument(
        name = "memory_broker_send",
        skip(self, value, _timeout),
        fields(broker = %self.inner.name, topic = %topic, correlation_id = %key)
    )]
    async fn send(
        &self,
        topic: &str,
        key: &CorrelationId,
        value: Bytes,
        _timeout: Duration,
    ) -> Result<(), BrokerError> {
        self.inner.send_count.fetch_add(1, Ordering::Relaxed);

        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(BrokerError::transient(&self.inner.name, "broker closed"));
        }
        match self.scripted_failure() {
            Some(BrokerErrorKind::Transient) => {
                return Err(BrokerError::transient(&self.inner.name, "scripted transient failure"));
            }
            Some(BrokerErrorKind::Permanent) => {
                return Err(BrokerError::permanent(&self.inner.name, "scripted permanent failure"));
            }
            None => {}
        }
        if let Some(limit) = self.inner.max_message_bytes {
            if value.len() > limit {
                return Err(BrokerError::permanent(
                    &self.inner.name,
                    format!("message of {} bytes exceeds limit of {limit}", value.len()),
                ));
            }
        }

        let mut topics = lock(&self.inner.topics);
        let queue = topics.entry(topic.to_string()).or_default();
        if queue.len() >= self.inner.max_retained {
            if let Some(evicted) = queue.pop_front() {
                debug!(evicted = %evicted.key, "Retention limit reached, oldest message dropped");
            }
        }
        queue.push_back(StoredMessage { key: *key, value });
        debug!("Message stored");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
