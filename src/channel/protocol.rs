//! Named events exchanged with the assistant server.
//!
//! Every WebSocket text frame carries one envelope:
//!
//! ```json
//! {"event": "command", "data": {"text": "what time is it"}}
//! ```
//!
//! `data` may be omitted for events without a payload. The Socket.IO flavour
//! of the server sends `response` for `reply`, and echoes every typed command
//! back as `command_received`; the echo is kept distinct from `transcript` so
//! the client can recognise its own command.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client -> server events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Start a listening session.
    Activate,
    /// End the listening session.
    Deactivate,
    /// Typed or quick command.
    Command { text: String },
    /// Ask for the current listening state. Answered with `status`.
    Status,
    /// Keepalive.
    Ping,
}

impl ClientEvent {
    /// Render event name to wire format.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Command { .. } => "command",
            Self::Status => "status",
            Self::Ping => "ping",
        }
    }

    /// Encode as a wire envelope.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let data = match self {
            Self::Command { text } => serde_json::json!({ "text": text }),
            Self::Activate | Self::Deactivate | Self::Status | Self::Ping => Value::Null,
        };
        Envelope {
            event: self.name().to_owned(),
            data,
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns a serialization error (not expected for these payloads).
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_envelope())
    }
}

/// Server -> client events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Listening session is on (confirmation or unsolicited).
    Activated,
    /// Listening session is off. Authoritative.
    Deactivated,
    /// Utterance recognised by the server, shown as if typed by the user.
    Transcript { text: String },
    /// `command_received`: a command the server received, typed or spoken.
    CommandEcho { text: String },
    /// Assistant response.
    Reply { text: String },
    /// Answer to a `status` query.
    Status { active: bool },
    /// Server-side error report.
    Error { message: String },
    /// Keepalive answer.
    Pong,
}

impl ServerEvent {
    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] for invalid JSON, unknown event names, or a payload
    /// missing a required field.
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::from_envelope(&envelope)
    }

    /// Decode an already-parsed envelope.
    ///
    /// # Errors
    ///
    /// See [`from_frame`](Self::from_frame).
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let data = &envelope.data;
        match envelope.event.as_str() {
            "activated" => Ok(Self::Activated),
            "deactivated" => Ok(Self::Deactivated),
            "transcript" => Ok(Self::Transcript {
                text: text_field(data, &["text"], &envelope.event)?,
            }),
            "command_received" => Ok(Self::CommandEcho {
                text: text_field(data, &["command", "text"], &envelope.event)?,
            }),
            "reply" | "response" => Ok(Self::Reply {
                text: text_field(data, &["text", "message"], &envelope.event)?,
            }),
            "status" => data
                .get("active")
                .and_then(Value::as_bool)
                .map(|active| Self::Status { active })
                .ok_or_else(|| ProtocolError::MissingField {
                    event: envelope.event.clone(),
                    field: "active",
                }),
            "error" => Ok(Self::Error {
                message: data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            "pong" => Ok(Self::Pong),
            other => Err(ProtocolError::UnknownEvent(other.to_owned())),
        }
    }
}

fn text_field(data: &Value, names: &[&'static str], event: &str) -> Result<String, ProtocolError> {
    names
        .iter()
        .find_map(|name| data.get(*name).and_then(Value::as_str))
        .map(str::to_owned)
        .ok_or_else(|| ProtocolError::MissingField {
            event: event.to_owned(),
            field: names[0],
        })
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    InvalidJson(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("event `{event}` is missing `{field}`")]
    MissingField { event: String, field: &'static str },
}
