//! Line shape.

use super::{ShapeStyle, ShapeTrait, point_to_segment_dist};
use crate::events::Geometry;
use crate::identity::ShapeId;
use kurbo::{Point, Rect, Vec2};

/// A straight line segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub(crate) id: ShapeId,
    pub from: Point,
    pub to: Point,
    pub style: ShapeStyle,
}

impl Line {
    /// Distance from the segment within which a point still hits the line.
    pub const HIT_BUFFER: f64 = 5.0;

    pub fn new(id: ShapeId, from: Point, to: Point) -> Self {
        Self {
            id,
            from,
            to,
            style: ShapeStyle::default(),
        }
    }

    pub fn length(&self) -> f64 {
        (self.to - self.from).hypot()
    }
}

impl ShapeTrait for Line {
    fn id(&self) -> &ShapeId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        Rect::from_points(self.from, self.to)
    }

    fn hit_test(&self, point: Point) -> bool {
        point_to_segment_dist(point, self.from, self.to) <= Self::HIT_BUFFER
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
        Geometry::Line {
            from: self.from,
            to: self.to,
        }
    }
}
