//! Circle shape.

use super::{ShapeStyle, ShapeTrait};
use crate::events::Geometry;
use crate::identity::ShapeId;
use kurbo::{Point, Rect, Vec2};

/// A circle given by center and radius.
#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub(crate) id: ShapeId,
    pub center: Point,
    pub radius: f64,
    pub style: ShapeStyle,
}

impl Circle {
    pub fn new(id: ShapeId, center: Point, radius: f64) -> Self {
        Self {
            id,
            center,
            radius,
            style: ShapeStyle::default(),
        }
    }
}

impl ShapeTrait for Circle {
    fn id(&self) -> &ShapeId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        Rect::new(
            self.center.x - self.radius,
            self.center.y - self.radius,
            self.center.x + self.radius,
            self.center.y + self.radius,
        )
    }

    fn hit_test(&self, point: Point) -> bool {
        (point - self.center).hypot() <= self.radius
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn translate(&mut self, delta: Vec2) {
        self.center += delta;
    }

    fn geometry(&self) -> Geometry {
        Geometry::Circle {
            center: self.center,
            radius: self.radius,
        }
    }
}
