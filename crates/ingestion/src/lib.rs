//! # Ingestion
//!
//! Webhook ingestion module.
//!
//! Responsibilities:
//! - Validate inbound webhook bodies into `WebhookEvent`
//! - Mint the correlation id and build the `Pending` envelope
//! - Hand the envelope to the dispatcher without waiting for the broker
//! - Expose the HTTP surface (`POST /webhook`, `GET /health`)
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{build_router, IngestionConfig, IngestionWorker};
//!
//! let worker = IngestionWorker::new(Arc::new(dispatcher));
//! let router = build_router(worker, &IngestionConfig::from(&config.server));
//! ingestion::serve(listener, router, shutdown_signal()).await?;
//! ```
//!
//! ## Mock Testing
//!
//! ```ignore
//! use ingestion::RecordingHandoff;
//!
//! let handoff = Arc::new(RecordingHandoff::new());
//! let worker = IngestionWorker::new(Arc::clone(&handoff));
//! worker.handle(br#"{"clientId":"c1","opportunity":"o"}"#)?;
//! assert_eq!(handoff.submit_count(), 1);
//! ```

mod config;
mod error;
mod mock;
mod payload;
mod server;
mod worker;

// Re-exports
pub use config::{IngestionConfig, IngestionMetrics, MetricsSnapshot};
pub use contracts::WebhookEvent;
pub use error::{IngestionError, Result};
pub use mock::RecordingHandoff;
pub use payload::{parse_event, WebhookPayload};
pub use server::{build_router, health_handler, serve, webhook_handler, AcceptedResponse, HealthResponse};
pub use worker::IngestionWorker;
