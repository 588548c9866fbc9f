//! Selection of durable shapes and the actions applied to it.

use kurbo::Point;

use crate::bus::EventBus;
use crate::canvas::ShapeManager;
use crate::events::DomainEvent;
use crate::identity::ShapeId;
use crate::optimistic::DragSession;

/// Keyboard modifiers held during a click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Toggle the clicked shape in or out of the selection.
    pub ctrl: bool,
    /// Cycle through stacked shapes under the pointer.
    pub alt: bool,
}

#[derive(Debug, Default)]
pub struct Selection {
    selected: Vec<ShapeId>,
    alt_stepper: usize,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[ShapeId] {
        &self.selected
    }

    pub fn is_selected(&self, id: &ShapeId) -> bool {
        self.selected.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.alt_stepper = 0;
    }

    /// Update the selection for a click at `point`.
    ///
    /// Repeated alt-clicks walk through all shapes under the pointer, back to
    /// front, wrapping around.
    pub fn click<M: ShapeManager + ?Sized>(&mut self, store: &M, point: Point, modifiers: Modifiers) {
        if modifiers.alt {
            self.alt_stepper += 1;
        } else {
            self.alt_stepper = 0;
        }

        let hits: Vec<&ShapeId> = store
            .get_shapes()
            .into_iter()
            .filter(|shape| shape.hit_test(point))
            .map(|shape| shape.id())
            .collect();

        if hits.is_empty() {
            if !modifiers.ctrl {
                self.clear();
            }
            return;
        }
        if self.alt_stepper >= hits.len() {
            self.alt_stepper = 0;
        }
        let clicked = hits[self.alt_stepper].clone();

        if modifiers.ctrl {
            if let Some(pos) = self.selected.iter().position(|id| *id == clicked) {
                self.selected.remove(pos);
            } else {
                self.selected.push(clicked);
            }
        } else {
            self.selected = vec![clicked];
        }
    }

    /// Drop ids whose shapes no longer exist.
    pub fn retain_existing<M: ShapeManager + ?Sized>(&mut self, store: &M) {
        self.selected.retain(|id| store.get_shape_by_id(id).is_some() && !store.is_pending(id));
    }

    pub fn set_background_color(&self, color: &str, bus: &mut EventBus) {
        for id in &self.selected {
            bus.dispatch(DomainEvent::set_background_color(id.clone(), color));
        }
    }

    pub fn set_border_color(&self, color: &str, bus: &mut EventBus) {
        for id in &self.selected {
            bus.dispatch(DomainEvent::set_border_color(id.clone(), color));
        }
    }

    /// Remove every selected shape and clear the selection.
    pub fn delete(&mut self, bus: &mut EventBus) {
        for id in self.selected.drain(..) {
            bus.dispatch(DomainEvent::remove_shape(id));
        }
        self.alt_stepper = 0;
    }

    /// Only applies to a single selected shape.
    pub fn move_to_front(&self, bus: &mut EventBus) -> bool {
        match self.selected.as_slice() {
            [id] => {
                bus.dispatch(DomainEvent::move_to_front(id.clone()));
                true
            }
            _ => false,
        }
    }

    /// Only applies to a single selected shape.
    pub fn move_to_back(&self, bus: &mut EventBus) -> bool {
        match self.selected.as_slice() {
            [id] => {
                bus.dispatch(DomainEvent::move_to_back(id.clone()));
                true
            }
            _ => false,
        }
    }

    /// Start dragging the selected durable shapes from `at`.
    pub fn begin_drag<M: ShapeManager + ?Sized>(&self, store: &M, at: Point) -> Option<DragSession> {
        let shapes: Vec<_> = self
            .selected
            .iter()
            .filter(|id| !store.is_pending(id))
            .filter_map(|id| store.get_shape_by_id(id).cloned())
            .collect();
        if shapes.is_empty() {
            return None;
        }
        Some(DragSession::start(shapes, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Canvas, attach_shape_manager};
    use crate::events::Geometry;
    use crate::identity::IdentityAllocator;
    use crate::optimistic::commit;
    use crate::shapes::Shape;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn rect(id: &str, x: f64) -> Shape {
        Shape::new(
            ShapeId::from(id),
            Geometry::Rectangle {
                from: Point::new(x, 0.0),
                to: Point::new(x + 20.0, 20.0),
            },
        )
    }

    fn setup() -> (EventBus, Rc<RefCell<Canvas>>) {
        let mut bus = EventBus::new();
        let store = Rc::new(RefCell::new(Canvas::new()));
        attach_shape_manager(&mut bus, store.clone(), Rc::new(RefCell::new(IdentityAllocator::new("me"))));
        for (id, x) in [("a:0", 0.0), ("a:1", 10.0), ("a:2", 100.0)] {
            bus.dispatch(commit(&rect(id, x)));
        }
        (bus, store)
    }

    #[test]
    fn test_click_selects_and_clears() {
        let (_, store) = setup();
        let store = store.borrow();
        let mut selection = Selection::new();

        selection.click(&*store, Point::new(105.0, 5.0), Modifiers::default());
        assert_eq!(selection.ids(), &[ShapeId::from("a:2")]);

        selection.click(&*store, Point::new(500.0, 500.0), Modifiers::default());
        assert!(selection.is_empty());
    }

    #[test]
    fn test_ctrl_click_toggles() {
        let (_, store) = setup();
        let store = store.borrow();
        let mut selection = Selection::new();
        let ctrl = Modifiers { ctrl: true, alt: false };

        selection.click(&*store, Point::new(105.0, 5.0), ctrl);
        selection.click(&*store, Point::new(5.0, 5.0), ctrl);
        assert_eq!(selection.ids().len(), 2);
        selection.click(&*store, Point::new(105.0, 5.0), ctrl);
        assert_eq!(selection.ids(), &[ShapeId::from("a:0")]);

        selection.click(&*store, Point::new(500.0, 500.0), ctrl);
        assert_eq!(selection.ids().len(), 1);
    }

    #[test]
    fn test_alt_click_cycles_stacked_shapes() {
        let (_, store) = setup();
        let store = store.borrow();
        let mut selection = Selection::new();
        let alt = Modifiers { ctrl: false, alt: true };
        let point = Point::new(15.0, 5.0);

        selection.click(&*store, point, Modifiers::default());
        assert_eq!(selection.ids(), &[ShapeId::from("a:0")]);
        selection.click(&*store, point, alt);
        assert_eq!(selection.ids(), &[ShapeId::from("a:1")]);
        selection.click(&*store, point, alt);
        assert_eq!(selection.ids(), &[ShapeId::from("a:0")]);
    }

    #[test]
    fn test_actions_dispatch_events() {
        let (mut bus, store) = setup();
        let mut selection = Selection::new();
        selection.click(&*store.borrow(), Point::new(105.0, 5.0), Modifiers::default());

        selection.set_background_color("red", &mut bus);
        assert!(selection.move_to_back(&mut bus));
        {
            let store = store.borrow();
            assert_eq!(store.z_order()[0], ShapeId::from("a:2"));
            let shape = store.get_shape_by_id(&ShapeId::from("a:2")).unwrap();
            assert_eq!(shape.style().background_color, "red");
        }

        selection.delete(&mut bus);
        assert!(selection.is_empty());
        assert_eq!(store.borrow().len(), 2);
    }

    #[test]
    fn test_front_back_need_single_selection() {
        let (mut bus, store) = setup();
        let mut selection = Selection::new();
        let ctrl = Modifiers { ctrl: true, alt: false };
        selection.click(&*store.borrow(), Point::new(105.0, 5.0), ctrl);
        selection.click(&*store.borrow(), Point::new(2.0, 5.0), ctrl);
        assert!(!selection.move_to_front(&mut bus));
    }

    #[test]
    fn test_begin_drag_and_retain_existing() {
        let (mut bus, store) = setup();
        let mut selection = Selection::new();
        selection.click(&*store.borrow(), Point::new(105.0, 5.0), Modifiers::default());

        let drag = selection.begin_drag(&*store.borrow(), Point::new(105.0, 5.0));
        assert_eq!(drag.map(|d| d.shapes().len()), Some(1));

        bus.dispatch(DomainEvent::remove_shape(ShapeId::from("a:2")));
        selection.retain_existing(&*store.borrow());
        assert!(selection.is_empty());
        assert!(selection.begin_drag(&*store.borrow(), Point::new(0.0, 0.0)).is_none());
    }
}
