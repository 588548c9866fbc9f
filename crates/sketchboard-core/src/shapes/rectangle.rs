//! Rectangle shape.

use super::{ShapeStyle, ShapeTrait};
use crate::events::Geometry;
use crate::identity::ShapeId;
use kurbo::{Point, Rect, Vec2};

/// An axis-aligned rectangle spanned by two corners.
///
/// The corners are kept as drawn (not normalized) so the shape serializes
/// back to the exact points it was created from.
#[derive(Debug, Clone, PartialEq)]
pub struct Rectangle {
    pub(crate) id: ShapeId,
    pub from: Point,
    pub to: Point,
    pub style: ShapeStyle,
}

impl Rectangle {
    pub fn new(id: ShapeId, from: Point, to: Point) -> Self {
        Self {
            id,
            from,
            to,
            style: ShapeStyle::default(),
        }
    }

    /// Get the rectangle as a normalized kurbo Rect.
    pub fn as_rect(&self) -> Rect {
        Rect::from_points(self.from, self.to)
    }
}

impl ShapeTrait for Rectangle {
    fn id(&self) -> &ShapeId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        self.as_rect()
    }

    fn hit_test(&self, point: Point) -> bool {
        let rect = self.as_rect();
        point.x >= rect.x0 && point.x <= rect.x1 && point.y >= rect.y0 && point.y <= rect.y1
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn translate(&mut self, delta: Vec2) {
        self.from += delta;
        self.to += delta;
    }

    fn geometry(&self) -> Geometry {
        Geometry::Rectangle {
            from: self.from,
            to: self.to,
        }
    }
}
