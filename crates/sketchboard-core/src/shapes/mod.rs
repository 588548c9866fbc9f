//! Shape definitions for the shared canvas.

mod circle;
mod line;
mod rectangle;
mod triangle;

pub use circle::Circle;
pub use line::Line;
pub use rectangle::Rectangle;
pub use triangle::Triangle;

use kurbo::{Point, Rect, Vec2};

use crate::events::{AddShapePayload, Annotations, Geometry};
use crate::identity::ShapeId;

pub const DEFAULT_BACKGROUND_COLOR: &str = "transparent";
pub const DEFAULT_BORDER_COLOR: &str = "black";

/// Colors of a shape, kept as CSS color strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeStyle {
    pub background_color: String,
    pub border_color: String,
}

impl ShapeStyle {
    pub fn new(background_color: Option<&str>, border_color: Option<&str>) -> Self {
        Self {
            background_color: background_color.unwrap_or(DEFAULT_BACKGROUND_COLOR).to_string(),
            border_color: border_color.unwrap_or(DEFAULT_BORDER_COLOR).to_string(),
        }
    }
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Distance from a point to a line segment (a→b).
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = b - a;
    let pv = point - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = a + seg * t;
    (point - proj).hypot()
}

/// Common trait for all shapes.
pub trait ShapeTrait {
    fn id(&self) -> &ShapeId;

    /// Axis-aligned bounding box.
    fn bounds(&self) -> Rect;

    /// Check if a point hits this shape.
    fn hit_test(&self, point: Point) -> bool;

    fn style(&self) -> &ShapeStyle;

    fn style_mut(&mut self) -> &mut ShapeStyle;

    /// Move every defining point by `delta`.
    fn translate(&mut self, delta: Vec2);

    fn geometry(&self) -> Geometry;
}

/// Enum wrapper for all shape types.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Line(Line),
    Circle(Circle),
    Rectangle(Rectangle),
    Triangle(Triangle),
}

impl Shape {
    /// Build a shape from geometry with default colors.
    pub fn new(id: ShapeId, geometry: Geometry) -> Self {
        Self::with_style(id, geometry, ShapeStyle::default())
    }

    pub fn with_style(id: ShapeId, geometry: Geometry, style: ShapeStyle) -> Self {
        match geometry {
            Geometry::Line { from, to } => Shape::Line(Line { id, from, to, style }),
            Geometry::Circle { center, radius } => Shape::Circle(Circle {
                id,
                center,
                radius,
                style,
            }),
            Geometry::Rectangle { from, to } => Shape::Rectangle(Rectangle { id, from, to, style }),
            Geometry::Triangle { p1, p2, p3 } => Shape::Triangle(Triangle {
                id,
                p1,
                p2,
                p3,
                style,
            }),
        }
    }

    /// Recreate a shape from an ADD_SHAPE payload. Missing colors take defaults.
    pub fn from_payload(payload: &AddShapePayload) -> Self {
        let style = ShapeStyle::new(
            payload.background_color.as_deref(),
            payload.border_color.as_deref(),
        );
        Self::with_style(payload.id.clone(), payload.geometry, style)
    }

    /// The exact ADD_SHAPE payload that recreates this shape.
    pub fn to_serializable(&self) -> AddShapePayload {
        let style = self.style();
        AddShapePayload {
            id: self.id().clone(),
            geometry: self.geometry(),
            background_color: Some(style.background_color.clone()),
            border_color: Some(style.border_color.clone()),
            annotations: Annotations::default(),
        }
    }

    /// A translated copy with the same id and colors.
    pub fn move_by(&self, dx: f64, dy: f64) -> Shape {
        let mut moved = self.clone();
        moved.translate(Vec2::new(dx, dy));
        moved
    }

    fn inner(&self) -> &dyn ShapeTrait {
        match self {
            Shape::Line(s) => s,
            Shape::Circle(s) => s,
            Shape::Rectangle(s) => s,
            Shape::Triangle(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ShapeTrait {
        match self {
            Shape::Line(s) => s,
            Shape::Circle(s) => s,
            Shape::Rectangle(s) => s,
            Shape::Triangle(s) => s,
        }
    }

    pub fn id(&self) -> &ShapeId {
        self.inner().id()
    }

    pub fn bounds(&self) -> Rect {
        self.inner().bounds()
    }

    pub fn hit_test(&self, point: Point) -> bool {
        self.inner().hit_test(point)
    }

    pub fn style(&self) -> &ShapeStyle {
        self.inner().style()
    }

    pub fn style_mut(&mut self) -> &mut ShapeStyle {
        self.inner_mut().style_mut()
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.inner_mut().translate(delta);
    }

    pub fn geometry(&self) -> Geometry {
        self.inner().geometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> Shape {
        Shape::new(
            ShapeId::from("p:1"),
            Geometry::Rectangle {
                from: Point::new(10.0, 10.0),
                to: Point::new(30.0, 40.0),
            },
        )
    }

    #[test]
    fn test_default_colors() {
        let shape = rect();
        assert_eq!(shape.style().background_color, "transparent");
        assert_eq!(shape.style().border_color, "black");
    }

    #[test]
    fn test_to_serializable_recreates_shape() {
        let mut shape = rect();
        shape.style_mut().background_color = "red".into();
        let payload = shape.to_serializable();
        assert_eq!(payload.background_color.as_deref(), Some("red"));
        assert_eq!(payload.border_color.as_deref(), Some("black"));
        assert_eq!(Shape::from_payload(&payload), shape);
    }

    #[test]
    fn test_move_by_keeps_id_and_colors() {
        let mut shape = rect();
        shape.style_mut().border_color = "blue".into();
        let moved = shape.move_by(5.0, -5.0);
        assert_eq!(moved.id(), shape.id());
        assert_eq!(moved.style(), shape.style());
        assert_eq!(
            moved.geometry(),
            Geometry::Rectangle {
                from: Point::new(15.0, 5.0),
                to: Point::new(35.0, 35.0),
            }
        );
    }

    #[test]
    fn test_point_to_segment_dist() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert!((point_to_segment_dist(Point::new(5.0, 3.0), a, b) - 3.0).abs() < 1e-9);
        assert!((point_to_segment_dist(Point::new(13.0, 4.0), a, b) - 5.0).abs() < 1e-9);
        assert!((point_to_segment_dist(Point::new(3.0, 4.0), a, a) - 5.0).abs() < 1e-9);
    }
}
