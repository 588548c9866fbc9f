//! Wire envelope shared by clients and the relay server.
//!
//! Every frame is a JSON object `{type, canvas_id?, payload, timestamp?}`.
//! Control frames (`register`, `PING`, `PONG`, `error`) share the envelope with
//! domain events. History replays arrive as JSON arrays whose elements are
//! envelopes or JSON strings holding envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{DomainEvent, EventError};

pub const REGISTER: &str = "register";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const ERROR: &str = "error";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", alias = "command", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Register { canvas_id: String },
    Ping { canvas_id: Option<String> },
    Pong { canvas_id: Option<String> },
    Error { message: String },
    Event(DomainEvent),
}

impl Frame {
    pub fn from_envelope(envelope: Envelope) -> Result<Self, EventError> {
        let Some(kind) = envelope.kind else {
            return match envelope.error {
                Some(message) => Ok(Frame::Error { message }),
                None => Err(EventError::UnknownKind(String::new())),
            };
        };
        match kind.as_str() {
            REGISTER => envelope
                .canvas_id
                .map(|canvas_id| Frame::Register { canvas_id })
                .ok_or(EventError::MissingCanvasId),
            PING => Ok(Frame::Ping {
                canvas_id: envelope.canvas_id,
            }),
            PONG => Ok(Frame::Pong {
                canvas_id: envelope.canvas_id,
            }),
            ERROR => {
                let message = envelope
                    .error
                    .or_else(|| envelope.payload.as_str().map(str::to_string))
                    .unwrap_or_default();
                Ok(Frame::Error { message })
            }
            other => DomainEvent::from_parts(other, envelope.payload, envelope.timestamp.as_ref())
                .map(Frame::Event),
        }
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        let envelope = match self {
            Frame::Event(event) => return event.to_json(),
            Frame::Register { canvas_id } => Envelope {
                kind: Some(REGISTER.to_string()),
                canvas_id: Some(canvas_id.clone()),
                ..Default::default()
            },
            Frame::Ping { canvas_id } => Envelope {
                kind: Some(PING.to_string()),
                canvas_id: canvas_id.clone(),
                ..Default::default()
            },
            Frame::Pong { canvas_id } => Envelope {
                kind: Some(PONG.to_string()),
                canvas_id: canvas_id.clone(),
                ..Default::default()
            },
            Frame::Error { message } => Envelope {
                error: Some(message.clone()),
                ..Default::default()
            },
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Decode one received text frame into zero or more frames.
///
/// Each element fails independently so one bad history entry does not drop
/// the rest.
pub fn parse_frames(text: &str) -> Vec<Result<Frame, EventError>> {
    let mut frames = Vec::new();
    match serde_json::from_str::<Value>(text) {
        Ok(value) => collect(value, &mut frames),
        Err(err) => frames.push(Err(err.into())),
    }
    frames
}

fn collect(value: Value, frames: &mut Vec<Result<Frame, EventError>>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, frames);
            }
        }
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(inner @ (Value::Object(_) | Value::Array(_))) => collect(inner, frames),
            Ok(_) => frames.push(Err(EventError::UnknownKind(text))),
            Err(err) => frames.push(Err(err.into())),
        },
        other => frames.push(
            serde_json::from_value::<Envelope>(other)
                .map_err(EventError::from)
                .and_then(Frame::from_envelope),
        ),
    }
}
