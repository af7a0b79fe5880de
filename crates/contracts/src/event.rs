//! WebhookEvent - validated inbound notification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A webhook notification whose fields have already passed validation.
///
/// Only the ingestion boundary constructs this type; everything downstream
/// can rely on both fields being non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub client_id: String,
    pub opportunity: String,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        client_id: impl Into<String>,
        opportunity: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            opportunity: opportunity.into(),
            received_at,
        }
    }
}
