//! DispatchEnvelope - the unit of work owned by the dispatcher
//!
//! Status lifecycle:
//!
//! ```text
//! Pending ─► Enqueued ─┬─► Delivered
//!                      ├─► Retrying ─┬─► Retrying ...
//!                      │             ├─► Delivered
//!                      │             └─► DeadLettered
//!                      └─► DeadLettered
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ContractError, CorrelationId, WebhookEvent};

/// Envelope delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Built by the ingestion worker, not yet handed off
    Pending,
    /// Accepted by the dispatcher, first attempt outstanding
    Enqueued,
    /// At least one attempt failed, another one is scheduled
    Retrying,
    /// Broker acknowledged the message (terminal)
    Delivered,
    /// Routed to the dead-letter channel (terminal)
    DeadLettered,
}

impl DispatchStatus {
    /// Terminal states never see another attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered)
    }

    /// Whether `self -> next` is a legal edge of the lifecycle
    pub fn can_transition_to(&self, next: DispatchStatus) -> bool {
        use DispatchStatus::*;
        matches!(
            (self, next),
            (Pending, Enqueued)
                | (Enqueued, Delivered)
                | (Enqueued, Retrying)
                | (Enqueued, DeadLettered)
                | (Retrying, Retrying)
                | (Retrying, Delivered)
                | (Retrying, DeadLettered)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Enqueued => "enqueued",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted webhook event plus its delivery bookkeeping.
///
/// Fields are private so the invariants hold by construction: the
/// correlation id never changes, `attempt_count` only grows and never passes
/// the budget handed to [`DispatchEnvelope::begin_attempt`], and terminal
/// states are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEnvelope {
    correlation_id: CorrelationId,
    payload: WebhookEvent,
    status: DispatchStatus,
    attempt_count: u32,
    first_attempt_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl DispatchEnvelope {
    /// Wrap a validated event, minting its correlation id.
    pub fn new(payload: WebhookEvent) -> Self {
        Self::with_correlation_id(CorrelationId::generate(), payload)
    }

    /// Wrap a validated event under an existing id.
    pub fn with_correlation_id(correlation_id: CorrelationId, payload: WebhookEvent) -> Self {
        Self {
            correlation_id,
            payload,
            status: DispatchStatus::Pending,
            attempt_count: 0,
            first_attempt_at: None,
            last_attempt_at: None,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn payload(&self) -> &WebhookEvent {
        &self.payload
    }

    pub fn status(&self) -> DispatchStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn first_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.first_attempt_at
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting edges outside the lifecycle.
    pub fn transition(&mut self, next: DispatchStatus) -> Result<(), ContractError> {
        if !self.status.can_transition_to(next) {
            return Err(ContractError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record the start of a broker attempt and return its 1-based number.
    ///
    /// # Errors
    /// - envelope is terminal or still `Pending`
    /// - `max_attempts` already used up
    pub fn begin_attempt(
        &mut self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u32, ContractError> {
        if !matches!(
            self.status,
            DispatchStatus::Enqueued | DispatchStatus::Retrying
        ) {
            return Err(ContractError::Other(format!(
                "cannot attempt delivery of envelope in status {}",
                self.status
            )));
        }
        if self.attempt_count >= max_attempts {
            return Err(ContractError::AttemptsExhausted { max_attempts });
        }

        self.attempt_count += 1;
        self.first_attempt_at.get_or_insert(now);
        self.last_attempt_at = Some(now);
        Ok(self.attempt_count)
    }

    /// Serialized form handed to the broker as the message value
    pub fn to_bytes(&self) -> Result<Bytes, ContractError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ContractError::Serialization(e.to_string()))
    }
}
