//! # Query Model and Wire Envelope
//!
//! A [`DatabaseQuery`] is the unit of work flowing through the queue
//! hierarchy. For FIFO storage it is flattened into a compact JSON envelope
//! that deliberately loses type fidelity - the FIFO only understands byte
//! payloads. A missing `query_template` is a hard parse failure; an envelope
//! must never deserialize into a zeroed query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DqmError, Result};

/// A unit of database work.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseQuery {
    /// Unique query identifier; generated when the caller does not supply one.
    pub query_id: Option<String>,
    /// Parameterized SQL template.
    pub query_template: String,
    /// JSON-encoded parameters for injection.
    pub parameter_json: Option<String>,
    /// Suggested queue type, doubling as FIFO priority.
    pub queue_type_hint: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl DatabaseQuery {
    pub fn new(query_template: impl Into<String>, queue_type_hint: i32) -> Self {
        Self {
            query_id: Some(Uuid::new_v4().to_string()),
            query_template: query_template.into(),
            parameter_json: None,
            queue_type_hint,
            submitted_at: None,
            processed_at: None,
            retry_count: 0,
            error_message: None,
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn with_parameters(mut self, parameter_json: impl Into<String>) -> Self {
        self.parameter_json = Some(parameter_json.into());
        self
    }

    /// Flatten into the wire envelope for FIFO storage.
    pub fn to_envelope(&self) -> Result<Vec<u8>> {
        let envelope = QueryEnvelope {
            query_id: self.query_id.clone(),
            query_template: self.query_template.clone(),
            parameter_json: self.parameter_json.clone(),
            queue_type_hint: self.queue_type_hint,
        };
        serde_json::to_vec(&envelope).map_err(|e| DqmError::EnvelopeSerialization {
            message: e.to_string(),
        })
    }

    /// Rehydrate from the wire envelope. Timestamps and retry state do not
    /// survive the round trip; the envelope carries identity and work only.
    pub fn from_envelope(payload: &[u8]) -> Result<Self> {
        let envelope: QueryEnvelope =
            serde_json::from_slice(payload).map_err(|e| DqmError::EnvelopeDeserialization {
                message: e.to_string(),
            })?;
        Ok(Self {
            query_id: envelope.query_id,
            query_template: envelope.query_template,
            parameter_json: envelope.parameter_json,
            queue_type_hint: envelope.queue_type_hint,
            submitted_at: None,
            processed_at: None,
            retry_count: 0,
            error_message: None,
        })
    }
}

/// Compact wire format for FIFO payloads.
#[derive(Debug, Serialize, Deserialize)]
struct QueryEnvelope {
    #[serde(default)]
    query_id: Option<String>,
    query_template: String,
    #[serde(default)]
    parameter_json: Option<String>,
    #[serde(default)]
    queue_type_hint: i32,
}
