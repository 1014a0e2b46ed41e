// ── Wire protocol ──
//
// Every frame on the session is a JSON text message. Requests and
// server-pushed events share `Envelope`; replies to a request use
// `Response`, which adds captured output and an error field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// `{"type": "<tag>", "uuid": "<correlationId>", "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    /// Ties a [`Response`] to its request. Absent on server-pushed events.
    #[serde(rename = "uuid", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Parse an inbound text frame. Anything without a non-empty string
    /// `type` is a protocol error.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let envelope: Self =
            serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))?;
        if envelope.kind.trim().is_empty() {
            return Err(Error::Protocol("empty message type".into()));
        }
        Ok(envelope)
    }

    /// The reply to an inbound `ping`.
    pub fn pong_for(&self) -> Self {
        Self {
            kind: PONG.into(),
            correlation_id: self.correlation_id.clone(),
            data: Value::Null,
        }
    }
}

/// `{"type", "uuid", "stdout", "stderr", "data", "error"}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "uuid", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub stdout: String,

    #[serde(default)]
    pub stderr: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Set when the handler failed. Connection state is unaffected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// An empty success reply addressed to `request`.
    pub fn to(request: &Envelope) -> Self {
        Self {
            kind: request.kind.clone(),
            correlation_id: request.correlation_id.clone(),
            ..Self::default()
        }
    }

    /// A failure reply: the message goes to both `error` and `stderr`.
    pub fn failure(request: &Envelope, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stderr: message.clone(),
            error: Some(message),
            ..Self::to(request)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
