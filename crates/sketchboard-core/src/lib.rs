//! Sketchboard Core Library
//!
//! Event synchronization core for a collaborative 2-D drawing canvas. Every
//! change is a [`DomainEvent`] dispatched on a local [`EventBus`]; kind
//! handlers apply it to the shape store, observers relay it to peers and echo
//! it into the event log.

pub mod bus;
pub mod canvas;
pub mod events;
pub mod identity;
pub mod optimistic;
pub mod relay;
pub mod replay;
pub mod selection;
pub mod session;
pub mod shapes;
pub mod storage;
pub mod tools;
pub mod wire;

pub use bus::{EventBus, HandlerError, HandlerResult, SubscriptionId};
pub use canvas::{Canvas, ShapeManager, attach_shape_manager};
pub use events::{
    AddShapePayload, Annotations, ColorChange, DomainEvent, EventError, EventKind, EventPayload,
    Geometry, Origin, ShapeRef,
};
pub use identity::{IdentityAllocator, ShapeId, generate_peer_id};
pub use optimistic::DragSession;
pub use relay::{
    LinkStatus, MemoryTransport, Relay, RelayConfig, RelayError, RelayState, StreamTransport,
    Transport, TransportError, TransportKind, WebSocketTransport,
};
pub use replay::{EventLog, ImportReport, compact_history, export_log, import_log};
pub use selection::{Modifiers, Selection};
pub use session::Session;
pub use shapes::{Shape, ShapeStyle};
pub use storage::{FileLogStorage, LogStorage, MemoryLogStorage, StorageError};
pub use tools::{ShapeTool, ToolKind};
pub use wire::Frame;
