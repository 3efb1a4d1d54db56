//! Callback payload types

use crate::client::{DispatchError, DispatchResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final outcome of a job delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Succeeded,
    Failed,
}

/// Body sent to a job's `callback` or `failureCallback` URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    /// Message id of the delivered job
    pub message_id: Uuid,

    /// Destination URL of the job
    pub url: String,

    pub outcome: CallbackOutcome,

    /// HTTP status from the last attempt, if the endpoint responded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Response body from the last attempt (truncated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempts made, the final one included
    pub attempts: u32,

    pub timestamp: DateTime<Utc>,
}

impl CallbackPayload {
    /// Payload for a successful delivery
    pub fn succeeded(
        message_id: Uuid,
        url: impl Into<String>,
        response: &DispatchResponse,
        attempts: u32,
    ) -> Self {
        Self {
            message_id,
            url: url.into(),
            outcome: CallbackOutcome::Succeeded,
            status: Some(response.status),
            body: Some(response.body.clone()).filter(|b| !b.is_empty()),
            error: None,
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// Payload for a delivery that will not be attempted again
    pub fn failed(
        message_id: Uuid,
        url: impl Into<String>,
        error: impl Into<String>,
        last_error: Option<&DispatchError>,
        attempts: u32,
    ) -> Self {
        let (status, body) = match last_error {
            Some(DispatchError::Status { status, body }) => {
                (Some(*status), Some(body.clone()).filter(|b| !b.is_empty()))
            }
            _ => (None, None),
        };

        Self {
            message_id,
            url: url.into(),
            outcome: CallbackOutcome::Failed,
            status,
            body,
            error: Some(error.into()),
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// Convert to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
