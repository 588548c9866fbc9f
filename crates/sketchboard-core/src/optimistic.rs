//! Optimistic updates: temporary previews that never reach the log or the wire.
//!
//! Previews are ordinary ADD_SHAPE / REMOVE_SHAPE events flagged `temporary`.
//! A gesture ends by clearing its previews and dispatching the durable result.

use kurbo::Point;

use crate::bus::EventBus;
use crate::events::DomainEvent;
use crate::identity::ShapeId;
use crate::shapes::Shape;

/// ADD_SHAPE for a live preview of `shape`.
pub fn preview(shape: &Shape) -> DomainEvent {
    DomainEvent::add_shape(shape.to_serializable()).temporary()
}

/// REMOVE_SHAPE for the preview with `id`.
pub fn clear_preview(id: ShapeId) -> DomainEvent {
    DomainEvent::remove_shape(id).temporary()
}

/// Durable ADD_SHAPE for `shape`.
pub fn commit(shape: &Shape) -> DomainEvent {
    DomainEvent::add_shape(shape.to_serializable())
}

/// Drag of one or more selected shapes.
///
/// Every intermediate frame swaps the previews for moved copies without
/// repainting and ends with a single REDRAW. Releasing replaces the durable
/// shapes with their final positions, even if the pointer never moved.
#[derive(Debug)]
pub struct DragSession {
    shapes: Vec<Shape>,
    last: Point,
}

impl DragSession {
    pub fn start(shapes: Vec<Shape>, at: Point) -> Self {
        Self { shapes, last: at }
    }

    /// Current (possibly moved) shapes.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn drag_to(&mut self, point: Point, bus: &mut EventBus) {
        let delta = point - self.last;
        self.last = point;
        for shape in self.shapes.iter_mut() {
            bus.dispatch(clear_preview(shape.id().clone()).no_redraw());
            let moved = shape.move_by(delta.x, delta.y);
            bus.dispatch(preview(&moved).no_redraw());
            *shape = moved;
        }
        bus.dispatch(DomainEvent::redraw());
    }

    /// Commit the final positions. Returns the committed shapes.
    pub fn release(self, bus: &mut EventBus) -> Vec<Shape> {
        for shape in &self.shapes {
            let id = shape.id().clone();
            bus.dispatch(clear_preview(id.clone()).no_redraw());
            bus.dispatch(DomainEvent::remove_shape(id).no_redraw());
            bus.dispatch(commit(shape).no_redraw());
        }
        bus.dispatch(DomainEvent::redraw());
        self.shapes
    }
}
