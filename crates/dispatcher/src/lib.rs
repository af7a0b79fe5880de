//! # Dispatcher
//!
//! 可靠投递模块。
//!
//! 负责：
//! - 接管已接收的 `DispatchEnvelope`，每个信封一个投递任务
//! - 指数退避重试，超出预算后进入死信通道
//! - 熔断器保护 broker，连接池限制并发

pub mod backoff;
pub mod breaker;
pub mod brokers;
pub mod dead_letter;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod pool;

pub use backoff::BackoffPolicy;
pub use breaker::CircuitBreaker;
pub use brokers::{
    create_broker, BrokerBackend, FileBroker, FileBrokerConfig, LogBroker, MemoryBroker,
    StoredMessage,
};
pub use contracts::{Broker, DispatchEnvelope};
pub use dead_letter::{DeadLetterReason, DeadLetterRecord};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, ShutdownReport};
pub use error::DispatcherError;
pub use handle::DispatchTicket;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use pool::{BrokerLease, BrokerPool};
