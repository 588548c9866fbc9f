//! Domain events exchanged on the bus, written to the log and sent over the wire.

use kurbo::Point;
use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::identity::ShapeId;
use crate::relay::TransportKind;

/// Errors produced while decoding events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event type: {0}")]
    UnknownKind(String),
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("register frame without canvas_id")]
    MissingCanvasId,
}

/// The closed set of event kinds. Wire strings are the SCREAMING_SNAKE_CASE names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AddShape,
    RemoveShape,
    MoveToFront,
    MoveToBack,
    SetBackgroundColor,
    SetBorderColor,
    #[serde(alias = "CLEAR_CANVAS_EVENT")]
    ClearCanvas,
    Redraw,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::AddShape,
        EventKind::RemoveShape,
        EventKind::MoveToFront,
        EventKind::MoveToBack,
        EventKind::SetBackgroundColor,
        EventKind::SetBorderColor,
        EventKind::ClearCanvas,
        EventKind::Redraw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AddShape => "ADD_SHAPE",
            EventKind::RemoveShape => "REMOVE_SHAPE",
            EventKind::MoveToFront => "MOVE_TO_FRONT",
            EventKind::MoveToBack => "MOVE_TO_BACK",
            EventKind::SetBackgroundColor => "SET_BACKGROUND_COLOR",
            EventKind::SetBorderColor => "SET_BORDER_COLOR",
            EventKind::ClearCanvas => "CLEAR_CANVAS",
            EventKind::Redraw => "REDRAW",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLEAR_CANVAS_EVENT" => Ok(EventKind::ClearCanvas),
            other => EventKind::ALL
                .into_iter()
                .find(|kind| kind.as_str() == other)
                .ok_or_else(|| EventError::UnknownKind(other.to_string())),
        }
    }
}

/// Where an event entered this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote(TransportKind),
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Transient flags carried by every payload. Omitted from JSON when false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    /// Live preview; never logged, never sent.
    #[serde(default, skip_serializing_if = "is_false")]
    pub temporary: bool,
    /// Skip the implicit repaint after the mutation.
    #[serde(default, rename = "noRedraw", skip_serializing_if = "is_false")]
    pub no_redraw: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_wsocket: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_wtrans: bool,
}

impl Annotations {
    pub fn origin(&self) -> Origin {
        if self.from_wsocket {
            Origin::Remote(TransportKind::WebSocket)
        } else if self.from_wtrans {
            Origin::Remote(TransportKind::Stream)
        } else {
            Origin::Local
        }
    }

    pub fn is_from(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::WebSocket => self.from_wsocket,
            TransportKind::Stream => self.from_wtrans,
        }
    }

    pub fn mark_from(&mut self, kind: TransportKind) {
        match kind {
            TransportKind::WebSocket => self.from_wsocket = true,
            TransportKind::Stream => self.from_wtrans = true,
        }
    }

    pub fn clear_origin(&mut self) {
        self.from_wsocket = false;
        self.from_wtrans = false;
    }
}

/// Shape geometry, tagged by `shapeType`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shapeType")]
pub enum Geometry {
    Line { from: Point, to: Point },
    Circle { center: Point, radius: f64 },
    Rectangle { from: Point, to: Point },
    Triangle { p1: Point, p2: Point, p3: Point },
}

impl Geometry {
    pub fn shape_type(&self) -> &'static str {
        match self {
            Geometry::Line { .. } => "Line",
            Geometry::Circle { .. } => "Circle",
            Geometry::Rectangle { .. } => "Rectangle",
            Geometry::Triangle { .. } => "Triangle",
        }
    }
}

/// ADD_SHAPE payload; also the serializable form of a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddShapePayload {
    pub id: ShapeId,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(flatten)]
    pub annotations: Annotations,
}

/// Payload naming a single target shape (REMOVE_SHAPE, MOVE_TO_FRONT, MOVE_TO_BACK).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeRef {
    #[serde(rename = "shapeId")]
    pub shape_id: ShapeId,
    #[serde(flatten)]
    pub annotations: Annotations,
}

/// SET_BACKGROUND_COLOR / SET_BORDER_COLOR payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorChange {
    #[serde(rename = "shapeId")]
    pub shape_id: ShapeId,
    pub color: String,
    #[serde(flatten)]
    pub annotations: Annotations,
}

/// Kind and payload of an event in one closed enum.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    AddShape(AddShapePayload),
    RemoveShape(ShapeRef),
    MoveToFront(ShapeRef),
    MoveToBack(ShapeRef),
    SetBackgroundColor(ColorChange),
    SetBorderColor(ColorChange),
    ClearCanvas(Annotations),
    Redraw(Annotations),
}

fn parse_payload<T: DeserializeOwned>(kind: EventKind, value: Value) -> Result<T, EventError> {
    serde_json::from_value(value).map_err(|source| EventError::Payload { kind, source })
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::AddShape(_) => EventKind::AddShape,
            EventPayload::RemoveShape(_) => EventKind::RemoveShape,
            EventPayload::MoveToFront(_) => EventKind::MoveToFront,
            EventPayload::MoveToBack(_) => EventKind::MoveToBack,
            EventPayload::SetBackgroundColor(_) => EventKind::SetBackgroundColor,
            EventPayload::SetBorderColor(_) => EventKind::SetBorderColor,
            EventPayload::ClearCanvas(_) => EventKind::ClearCanvas,
            EventPayload::Redraw(_) => EventKind::Redraw,
        }
    }

    /// Decode the payload object of an event of the given kind.
    ///
    /// A missing (`null`) payload is read as `{}`.
    pub fn from_value(kind: EventKind, value: Value) -> Result<Self, EventError> {
        let value = match value {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(match kind {
            EventKind::AddShape => EventPayload::AddShape(parse_payload(kind, value)?),
            EventKind::RemoveShape => EventPayload::RemoveShape(parse_payload(kind, value)?),
            EventKind::MoveToFront => EventPayload::MoveToFront(parse_payload(kind, value)?),
            EventKind::MoveToBack => EventPayload::MoveToBack(parse_payload(kind, value)?),
            EventKind::SetBackgroundColor => {
                EventPayload::SetBackgroundColor(parse_payload(kind, value)?)
            }
            EventKind::SetBorderColor => EventPayload::SetBorderColor(parse_payload(kind, value)?),
            EventKind::ClearCanvas => EventPayload::ClearCanvas(parse_payload(kind, value)?),
            EventKind::Redraw => EventPayload::Redraw(parse_payload(kind, value)?),
        })
    }

    pub fn annotations(&self) -> &Annotations {
        match self {
            EventPayload::AddShape(p) => &p.annotations,
            EventPayload::RemoveShape(p) | EventPayload::MoveToFront(p) | EventPayload::MoveToBack(p) => {
                &p.annotations
            }
            EventPayload::SetBackgroundColor(p) | EventPayload::SetBorderColor(p) => &p.annotations,
            EventPayload::ClearCanvas(a) | EventPayload::Redraw(a) => a,
        }
    }

    pub fn annotations_mut(&mut self) -> &mut Annotations {
        match self {
            EventPayload::AddShape(p) => &mut p.annotations,
            EventPayload::RemoveShape(p) | EventPayload::MoveToFront(p) | EventPayload::MoveToBack(p) => {
                &mut p.annotations
            }
            EventPayload::SetBackgroundColor(p) | EventPayload::SetBorderColor(p) => {
                &mut p.annotations
            }
            EventPayload::ClearCanvas(a) | EventPayload::Redraw(a) => a,
        }
    }

    /// The shape an event targets, if any.
    pub fn shape_id(&self) -> Option<&ShapeId> {
        match self {
            EventPayload::AddShape(p) => Some(&p.id),
            EventPayload::RemoveShape(p) | EventPayload::MoveToFront(p) | EventPayload::MoveToBack(p) => {
                Some(&p.shape_id)
            }
            EventPayload::SetBackgroundColor(p) | EventPayload::SetBorderColor(p) => Some(&p.shape_id),
            EventPayload::ClearCanvas(_) | EventPayload::Redraw(_) => None,
        }
    }
}

/// An event as dispatched on the bus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct DomainEvent {
    pub payload: EventPayload,
    /// Milliseconds since the Unix epoch. Set by the bus when absent.
    pub timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

impl TryFrom<RawEvent> for DomainEvent {
    type Error = EventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        DomainEvent::from_parts(&raw.kind, raw.payload, raw.timestamp.as_ref())
    }
}

/// Read a timestamp leniently: integer or float milliseconds, anything else is absent.
pub(crate) fn timestamp_from_value(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|ms| *ms >= 0.0).map(|ms| ms as u64))
}

impl Serialize for DomainEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.timestamp.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("DomainEvent", len)?;
        state.serialize_field("type", &self.kind())?;
        state.serialize_field("payload", &self.payload)?;
        if let Some(timestamp) = self.timestamp {
            state.serialize_field("timestamp", &timestamp)?;
        }
        state.end()
    }
}

impl DomainEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: None,
        }
    }

    /// Build an event from its wire parts.
    pub fn from_parts(kind: &str, payload: Value, timestamp: Option<&Value>) -> Result<Self, EventError> {
        let kind: EventKind = kind.parse()?;
        Ok(Self {
            payload: EventPayload::from_value(kind, payload)?,
            timestamp: timestamp_from_value(timestamp),
        })
    }

    pub fn add_shape(payload: AddShapePayload) -> Self {
        Self::new(EventPayload::AddShape(payload))
    }

    pub fn remove_shape(shape_id: ShapeId) -> Self {
        Self::new(EventPayload::RemoveShape(ShapeRef {
            shape_id,
            annotations: Annotations::default(),
        }))
    }

    pub fn move_to_front(shape_id: ShapeId) -> Self {
        Self::new(EventPayload::MoveToFront(ShapeRef {
            shape_id,
            annotations: Annotations::default(),
        }))
    }

    pub fn move_to_back(shape_id: ShapeId) -> Self {
        Self::new(EventPayload::MoveToBack(ShapeRef {
            shape_id,
            annotations: Annotations::default(),
        }))
    }

    pub fn set_background_color(shape_id: ShapeId, color: impl Into<String>) -> Self {
        Self::new(EventPayload::SetBackgroundColor(ColorChange {
            shape_id,
            color: color.into(),
            annotations: Annotations::default(),
        }))
    }

    pub fn set_border_color(shape_id: ShapeId, color: impl Into<String>) -> Self {
        Self::new(EventPayload::SetBorderColor(ColorChange {
            shape_id,
            color: color.into(),
            annotations: Annotations::default(),
        }))
    }

    pub fn clear_canvas() -> Self {
        Self::new(EventPayload::ClearCanvas(Annotations::default()))
    }

    pub fn redraw() -> Self {
        Self::new(EventPayload::Redraw(Annotations::default()))
    }

    /// Mark as a live preview.
    pub fn temporary(mut self) -> Self {
        self.payload.annotations_mut().temporary = true;
        self
    }

    /// Suppress the implicit repaint.
    pub fn no_redraw(mut self) -> Self {
        self.payload.annotations_mut().no_redraw = true;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn annotations(&self) -> &Annotations {
        self.payload.annotations()
    }

    pub fn is_temporary(&self) -> bool {
        self.annotations().temporary
    }

    pub fn origin(&self) -> Origin {
        self.annotations().origin()
    }

    /// Copy with the origin tags removed.
    pub fn without_origin(&self) -> Self {
        let mut event = self.clone();
        event.payload.annotations_mut().clear_origin();
        event
    }

    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
