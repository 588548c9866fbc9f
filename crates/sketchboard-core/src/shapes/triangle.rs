//! Triangle shape.

use super::{ShapeStyle, ShapeTrait};
use crate::events::Geometry;
use crate::identity::ShapeId;
use kurbo::{Point, Rect, Vec2};

#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub(crate) id: ShapeId,
    pub p1: Point,
    pub p2: Point,
    pub p3: Point,
    pub style: ShapeStyle,
}

fn area(a: Point, b: Point, c: Point) -> f64 {
    ((a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y)) / 2.0).abs()
}

impl Triangle {
    const AREA_EPSILON: f64 = 0.01;

    pub fn new(id: ShapeId, p1: Point, p2: Point, p3: Point) -> Self {
        Self {
            id,
            p1,
            p2,
            p3,
            style: ShapeStyle::default(),
        }
    }

    pub fn area(&self) -> f64 {
        area(self.p1, self.p2, self.p3)
    }
}

impl ShapeTrait for Triangle {
    fn id(&self) -> &ShapeId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        Rect::from_points(self.p1, self.p2).union_pt(self.p3)
    }

    // Inside when the three sub-triangles through the point add up to the whole.
    fn hit_test(&self, point: Point) -> bool {
        let parts = area(point, self.p2, self.p3) + area(self.p1, point, self.p3) + area(self.p1, self.p2, point);
        (self.area() - parts).abs() < Self::AREA_EPSILON
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn translate(&mut self, delta: Vec2) {
        self.p1 += delta;
        self.p2 += delta;
        self.p3 += delta;
    }

    fn geometry(&self) -> Geometry {
        Geometry::Triangle {
            p1: self.p1,
            p2: self.p2,
            p3: self.p3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Triangle {
        Triangle::new(
            ShapeId::from("p:0"),
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        )
    }

    #[test]
    fn test_area() {
        assert!((triangle().area() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_test() {
        let tri = triangle();
        assert!(tri.hit_test(Point::new(2.0, 2.0)));
        assert!(tri.hit_test(Point::new(5.0, 0.0)));
        assert!(!tri.hit_test(Point::new(8.0, 8.0)));
        assert!(!tri.hit_test(Point::new(-1.0, 5.0)));
    }

    #[test]
    fn test_bounds() {
        let bounds = triangle().bounds();
        assert!((bounds.x1 - 10.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 10.0).abs() < f64::EPSILON);
    }
}
