//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the relay workspace.
//! Business crates depend on this crate only; reverse dependencies are
//! prohibited.
//!
//! ## Ownership model
//! - `WebhookEvent` is built once from a validated request body
//! - `DispatchEnvelope` is moved into the dispatcher at submission and is
//!   never touched by the ingestion side afterwards
//! - `CorrelationId` is the broker key and the consumer-side dedup key

mod broker;
mod config;
mod correlation_id;
mod envelope;
mod error;
mod event;
mod handoff;

pub use broker::*;
pub use config::*;
pub use correlation_id::CorrelationId;
pub use envelope::*;
pub use error::*;
pub use event::WebhookEvent;
pub use handoff::*;
