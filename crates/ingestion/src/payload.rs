//! Raw request body and its validation into a `WebhookEvent`

use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::{Validate, ValidationErrors};

use contracts::WebhookEvent;

use crate::error::IngestionError;

/// Request body as received. Unknown fields are ignored.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[validate(
        required(message = "clientId is required"),
        length(min = 1, message = "clientId must not be empty")
    )]
    pub client_id: Option<String>,

    #[validate(
        required(message = "opportunity is required"),
        length(min = 1, message = "opportunity must not be empty")
    )]
    pub opportunity: Option<String>,
}

impl WebhookPayload {
    /// Decode and validate a request body
    pub fn parse(body: &[u8]) -> Result<Self, IngestionError> {
        if body.is_empty() {
            return Err(IngestionError::invalid_payload("request body is empty"));
        }
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| IngestionError::invalid_payload(format!("malformed JSON body: {e}")))?;
        if !value.is_object() {
            return Err(IngestionError::invalid_payload(
                "request body must be a JSON object",
            ));
        }
        let payload: Self = serde_json::from_value(value)
            .map_err(|e| IngestionError::invalid_payload(format!("invalid field: {e}")))?;
        payload
            .validate()
            .map_err(|e| IngestionError::invalid_payload(describe(&e)))?;
        Ok(payload)
    }

    /// Build the event; only valid once [`Validate::validate`] passed
    pub fn into_event(self, received_at: DateTime<Utc>) -> Result<WebhookEvent, IngestionError> {
        match (self.client_id, self.opportunity) {
            (Some(client_id), Some(opportunity)) => {
                Ok(WebhookEvent::new(client_id, opportunity, received_at))
            }
            _ => Err(IngestionError::invalid_payload(
                "clientId and opportunity are required",
            )),
        }
    }
}

/// Parse, validate and stamp a request body in one step
pub fn parse_event(body: &[u8], received_at: DateTime<Utc>) -> Result<WebhookEvent, IngestionError> {
    WebhookPayload::parse(body)?.into_event(received_at)
}

/// Flatten validator output into one stable, human-readable line
fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .filter_map(|(field, errs)| {
            errs.first().map(|err| match &err.message {
                Some(message) => message.to_string(),
                None => format!("{field}: {}", err.code),
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}
