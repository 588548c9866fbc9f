//! Shape creation tools with live previews.

use crate::bus::EventBus;
use crate::events::Geometry;
use crate::identity::ShapeId;
use crate::optimistic::{clear_preview, commit, preview};
use crate::shapes::Shape;
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Available drawing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ToolKind {
    #[default]
    Line,
    Circle,
    Rectangle,
    Triangle,
}

impl ToolKind {
    /// Geometry spanned by a press point and the current pointer.
    ///
    /// A triangle spanned by two points is previewed as its first edge.
    pub fn span(&self, from: Point, to: Point) -> Geometry {
        match self {
            ToolKind::Line | ToolKind::Triangle => Geometry::Line { from, to },
            ToolKind::Circle => Geometry::Circle {
                center: from,
                radius: (to - from).hypot(),
            },
            ToolKind::Rectangle => Geometry::Rectangle { from, to },
        }
    }
}

/// State of a gesture in progress.
#[derive(Debug, Clone, Default)]
enum ToolState {
    #[default]
    Idle,
    /// Pointer pressed at `anchor`.
    Spanning {
        id: ShapeId,
        anchor: Point,
        last: Option<Point>,
        previewing: bool,
    },
    /// Triangle with two fixed corners, waiting for the third.
    Closing {
        id: ShapeId,
        p1: Point,
        p2: Point,
        last: Point,
    },
}

/// A drawing tool.
///
/// Line, Circle and Rectangle are press, drag, release. Triangle takes three
/// presses: the first edge is previewed as a line, then the full triangle
/// follows the pointer until the third press commits it. A gesture uses one
/// id for all of its previews and the committed shape.
#[derive(Debug, Clone, Default)]
pub struct ShapeTool {
    kind: ToolKind,
    state: ToolState,
}

impl ShapeTool {
    pub fn new(kind: ToolKind) -> Self {
        Self {
            kind,
            state: ToolState::Idle,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, ToolState::Idle)
    }

    /// Switch tools, dropping any preview of the current gesture.
    pub fn set_kind(&mut self, kind: ToolKind, bus: &mut EventBus) {
        self.cancel(bus);
        self.kind = kind;
    }

    /// Returns the id of a committed shape.
    pub fn pointer_down(
        &mut self,
        point: Point,
        next_id: impl FnOnce() -> ShapeId,
        bus: &mut EventBus,
    ) -> Option<ShapeId> {
        match std::mem::take(&mut self.state) {
            ToolState::Idle => {
                self.state = ToolState::Spanning {
                    id: next_id(),
                    anchor: point,
                    last: None,
                    previewing: false,
                };
                None
            }
            ToolState::Spanning {
                id,
                anchor,
                previewing,
                ..
            } if self.kind == ToolKind::Triangle => {
                if previewing {
                    bus.dispatch(clear_preview(id.clone()));
                }
                let geometry = Geometry::Triangle {
                    p1: anchor,
                    p2: point,
                    p3: point,
                };
                bus.dispatch(preview(&Shape::new(id.clone(), geometry)));
                self.state = ToolState::Closing {
                    id,
                    p1: anchor,
                    p2: point,
                    last: point,
                };
                None
            }
            ToolState::Closing { id, p1, p2, .. } => {
                bus.dispatch(clear_preview(id.clone()));
                let geometry = Geometry::Triangle { p1, p2, p3: point };
                bus.dispatch(commit(&Shape::new(id.clone(), geometry)));
                Some(id)
            }
            spanning @ ToolState::Spanning { .. } => {
                // Second press without a release: keep the gesture.
                self.state = spanning;
                None
            }
        }
    }

    pub fn pointer_move(&mut self, point: Point, bus: &mut EventBus) {
        match &mut self.state {
            ToolState::Idle => {}
            ToolState::Spanning {
                id,
                anchor,
                last,
                previewing,
            } => {
                if *last == Some(point) {
                    return;
                }
                *last = Some(point);
                if *previewing {
                    bus.dispatch(clear_preview(id.clone()));
                }
                let shape = Shape::new(id.clone(), self.kind.span(*anchor, point));
                bus.dispatch(preview(&shape));
                *previewing = true;
            }
            ToolState::Closing { id, p1, p2, last } => {
                if *last == point {
                    return;
                }
                *last = point;
                bus.dispatch(clear_preview(id.clone()));
                let geometry = Geometry::Triangle {
                    p1: *p1,
                    p2: *p2,
                    p3: point,
                };
                bus.dispatch(preview(&Shape::new(id.clone(), geometry)));
            }
        }
    }

    /// Returns the id of a committed shape. Triangles ignore releases.
    pub fn pointer_up(&mut self, point: Point, bus: &mut EventBus) -> Option<ShapeId> {
        if self.kind == ToolKind::Triangle {
            return None;
        }
        let ToolState::Spanning {
            id,
            anchor,
            previewing,
            ..
        } = std::mem::take(&mut self.state)
        else {
            return None;
        };
        if previewing {
            bus.dispatch(clear_preview(id.clone()));
        }
        bus.dispatch(commit(&Shape::new(id.clone(), self.kind.span(anchor, point))));
        Some(id)
    }

    /// Abort the gesture and remove its preview.
    pub fn cancel(&mut self, bus: &mut EventBus) {
        match std::mem::take(&mut self.state) {
            ToolState::Spanning {
                id,
                previewing: true,
                ..
            }
            | ToolState::Closing { id, .. } => {
                bus.dispatch(clear_preview(id));
            }
            _ => {}
        }
    }
}
