//! Shape store and the bus handlers that keep it in sync.

use crate::bus::{EventBus, SubscriptionId};
use crate::events::{AddShapePayload, EventKind, EventPayload};
use crate::identity::{IdentityAllocator, ShapeId};
use crate::shapes::Shape;
use kurbo::{Point, Rect};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// State owner for shapes. Only bus handlers mutate it.
pub trait ShapeManager {
    /// Insert a shape, replacing any shape with the same id in the same layer.
    fn add_shape(&mut self, shape: Shape, redraw: bool, temporary: bool);

    /// Remove a shape from one layer. Missing shapes are ignored.
    fn remove_shape_with_id(&mut self, id: &ShapeId, redraw: bool, temporary: bool) -> Option<Shape>;

    fn move_to_front(&mut self, id: &ShapeId) -> bool;

    fn move_to_back(&mut self, id: &ShapeId) -> bool;

    /// Look up a shape, durable layer first.
    fn get_shape_by_id(&self, id: &ShapeId) -> Option<&Shape>;

    fn get_shape_by_id_mut(&mut self, id: &ShapeId) -> Option<&mut Shape>;

    /// True if the id only exists as a temporary preview.
    fn is_pending(&self, id: &ShapeId) -> bool;

    fn recreate_shape(&self, payload: &AddShapePayload) -> Shape {
        Shape::from_payload(payload)
    }

    /// Drop both layers.
    fn clear_all_shapes(&mut self);

    fn redraw(&mut self);

    /// Durable shapes, back to front.
    fn get_shapes(&self) -> Vec<&Shape>;
}

/// In-memory shape store with a durable layer and a temporary preview layer.
#[derive(Debug, Default)]
pub struct Canvas {
    /// Durable shapes keyed by id.
    shapes: HashMap<ShapeId, Shape>,
    /// Z-order of durable shapes (back to front).
    z_order: Vec<ShapeId>,
    /// Live previews, drawn on top in insertion order.
    temporary: Vec<Shape>,
    redraws: u64,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn temporary_len(&self) -> usize {
        self.temporary.len()
    }

    /// Number of repaints performed so far.
    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    pub fn z_order(&self) -> &[ShapeId] {
        &self.z_order
    }

    pub fn temporary_shapes(&self) -> &[Shape] {
        &self.temporary
    }

    /// Everything a renderer would paint, back to front.
    ///
    /// Durable shapes shadowed by a pending preview with the same id are hidden.
    pub fn visible_shapes(&self) -> Vec<&Shape> {
        self.z_order
            .iter()
            .filter(|id| !self.temporary.iter().any(|t| t.id() == *id))
            .filter_map(|id| self.shapes.get(id))
            .chain(self.temporary.iter())
            .collect()
    }

    /// Durable shapes hit by a point, front to back.
    pub fn shapes_at_point(&self, point: Point) -> Vec<ShapeId> {
        self.z_order
            .iter()
            .rev()
            .filter(|id| self.shapes.get(*id).is_some_and(|s| s.hit_test(point)))
            .cloned()
            .collect()
    }

    /// Get the bounding box of all durable shapes.
    pub fn bounds(&self) -> Option<Rect> {
        self.shapes
            .values()
            .map(Shape::bounds)
            .reduce(|acc, bounds| acc.union(bounds))
    }
}

impl ShapeManager for Canvas {
    fn add_shape(&mut self, shape: Shape, redraw: bool, temporary: bool) {
        let id = shape.id().clone();
        if temporary {
            self.temporary.retain(|s| s.id() != &id);
            self.temporary.push(shape);
        } else {
            self.z_order.retain(|shape_id| shape_id != &id);
            self.z_order.push(id.clone());
            self.shapes.insert(id, shape);
        }
        if redraw {
            self.redraw();
        }
    }

    fn remove_shape_with_id(&mut self, id: &ShapeId, redraw: bool, temporary: bool) -> Option<Shape> {
        let removed = if temporary {
            let pos = self.temporary.iter().position(|s| s.id() == id);
            pos.map(|pos| self.temporary.remove(pos))
        } else {
            self.z_order.retain(|shape_id| shape_id != id);
            self.shapes.remove(id)
        };
        if redraw {
            self.redraw();
        }
        removed
    }

    fn move_to_front(&mut self, id: &ShapeId) -> bool {
        if !self.shapes.contains_key(id) {
            return false;
        }
        self.z_order.retain(|shape_id| shape_id != id);
        self.z_order.push(id.clone());
        true
    }

    fn move_to_back(&mut self, id: &ShapeId) -> bool {
        if !self.shapes.contains_key(id) {
            return false;
        }
        self.z_order.retain(|shape_id| shape_id != id);
        self.z_order.insert(0, id.clone());
        true
    }

    fn get_shape_by_id(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes
            .get(id)
            .or_else(|| self.temporary.iter().find(|s| s.id() == id))
    }

    fn get_shape_by_id_mut(&mut self, id: &ShapeId) -> Option<&mut Shape> {
        match self.shapes.get_mut(id) {
            Some(shape) => Some(shape),
            None => self.temporary.iter_mut().find(|s| s.id() == id),
        }
    }

    fn is_pending(&self, id: &ShapeId) -> bool {
        !self.shapes.contains_key(id) && self.temporary.iter().any(|s| s.id() == id)
    }

    fn clear_all_shapes(&mut self) {
        self.shapes.clear();
        self.z_order.clear();
        self.temporary.clear();
        self.redraw();
    }

    fn redraw(&mut self) {
        self.redraws += 1;
    }

    fn get_shapes(&self) -> Vec<&Shape> {
        self.z_order.iter().filter_map(|id| self.shapes.get(id)).collect()
    }
}

/// Register the kind handlers that apply events to `store`.
///
/// ADD_SHAPE also advances `ids` past the added id; CLEAR_CANVAS resets it.
pub fn attach_shape_manager<M: ShapeManager + 'static>(
    bus: &mut EventBus,
    store: Rc<RefCell<M>>,
    ids: Rc<RefCell<IdentityAllocator>>,
) -> Vec<SubscriptionId> {
    let mut subscriptions = Vec::new();

    {
        let store = store.clone();
        let ids = ids.clone();
        subscriptions.push(bus.subscribe(EventKind::AddShape, move |event| {
            if let EventPayload::AddShape(payload) = &event.payload {
                ids.try_borrow_mut()?.reconcile(&payload.id);
                let mut store = store.try_borrow_mut()?;
                let shape = store.recreate_shape(payload);
                let annotations = payload.annotations;
                store.add_shape(shape, !annotations.no_redraw, annotations.temporary);
            }
            Ok(())
        }));
    }

    {
        let store = store.clone();
        subscriptions.push(bus.subscribe(EventKind::RemoveShape, move |event| {
            if let EventPayload::RemoveShape(target) = &event.payload {
                let annotations = target.annotations;
                store.try_borrow_mut()?.remove_shape_with_id(
                    &target.shape_id,
                    !annotations.no_redraw,
                    annotations.temporary,
                );
            }
            Ok(())
        }));
    }

    for kind in [EventKind::MoveToFront, EventKind::MoveToBack] {
        let store = store.clone();
        subscriptions.push(bus.subscribe(kind, move |event| {
            let mut store = store.try_borrow_mut()?;
            let (id, to_front) = match &event.payload {
                EventPayload::MoveToFront(target) => (&target.shape_id, true),
                EventPayload::MoveToBack(target) => (&target.shape_id, false),
                _ => return Ok(()),
            };
            if store.is_pending(id) {
                log::debug!("{} ignored for pending shape {id}", event.kind());
                return Ok(());
            }
            let moved = if to_front {
                store.move_to_front(id)
            } else {
                store.move_to_back(id)
            };
            if moved {
                store.redraw();
            }
            Ok(())
        }));
    }

    for kind in [EventKind::SetBackgroundColor, EventKind::SetBorderColor] {
        let store = store.clone();
        subscriptions.push(bus.subscribe(kind, move |event| {
            let (change, background) = match &event.payload {
                EventPayload::SetBackgroundColor(change) => (change, true),
                EventPayload::SetBorderColor(change) => (change, false),
                _ => return Ok(()),
            };
            let mut store = store.try_borrow_mut()?;
            if store.is_pending(&change.shape_id) {
                log::debug!("{} ignored for pending shape {}", event.kind(), change.shape_id);
                return Ok(());
            }
            let Some(shape) = store.get_shape_by_id_mut(&change.shape_id) else {
                return Ok(());
            };
            let style = shape.style_mut();
            if background {
                style.background_color = change.color.clone();
            } else {
                style.border_color = change.color.clone();
            }
            store.redraw();
            Ok(())
        }));
    }

    {
        let store = store.clone();
        subscriptions.push(bus.subscribe(EventKind::ClearCanvas, move |_| {
            store.try_borrow_mut()?.clear_all_shapes();
            ids.try_borrow_mut()?.reset();
            Ok(())
        }));
    }

    subscriptions.push(bus.subscribe(EventKind::Redraw, move |_| {
        store.try_borrow_mut()?.redraw();
        Ok(())
    }));

    subscriptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DomainEvent, Geometry};

    fn circle(id: &str, x: f64) -> Shape {
        Shape::new(
            ShapeId::from(id),
            Geometry::Circle {
                center: Point::new(x, 0.0),
                radius: 5.0,
            },
        )
    }

    fn wired() -> (EventBus, Rc<RefCell<Canvas>>, Rc<RefCell<IdentityAllocator>>) {
        let mut bus = EventBus::new();
        let store = Rc::new(RefCell::new(Canvas::new()));
        let ids = Rc::new(RefCell::new(IdentityAllocator::new("me")));
        attach_shape_manager(&mut bus, store.clone(), ids.clone());
        (bus, store, ids)
    }

    #[test]
    fn test_add_replaces_same_id_and_moves_to_top() {
        let mut canvas = Canvas::new();
        canvas.add_shape(circle("a:0", 0.0), true, false);
        canvas.add_shape(circle("a:1", 0.0), true, false);
        canvas.add_shape(circle("a:0", 9.0), true, false);

        assert_eq!(canvas.len(), 2);
        assert_eq!(canvas.z_order(), &[ShapeId::from("a:1"), ShapeId::from("a:0")]);
        assert_eq!(canvas.redraw_count(), 3);
    }

    #[test]
    fn test_no_redraw_flag() {
        let mut canvas = Canvas::new();
        canvas.add_shape(circle("a:0", 0.0), false, false);
        canvas.remove_shape_with_id(&ShapeId::from("a:0"), false, false);
        assert_eq!(canvas.redraw_count(), 0);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut canvas = Canvas::new();
        canvas.add_shape(circle("a:0", 0.0), false, false);
        assert!(canvas.remove_shape_with_id(&ShapeId::from("a:0"), false, true).is_none());
        assert_eq!(canvas.len(), 1);
    }

    #[test]
    fn test_z_order() {
        let mut canvas = Canvas::new();
        for id in ["a:0", "a:1", "a:2"] {
            canvas.add_shape(circle(id, 0.0), false, false);
        }
        assert!(canvas.move_to_back(&ShapeId::from("a:2")));
        assert!(canvas.move_to_front(&ShapeId::from("a:0")));
        assert!(!canvas.move_to_front(&ShapeId::from("zz:9")));
        let order: Vec<_> = canvas.get_shapes().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(order, vec!["a:2", "a:1", "a:0"]);
    }

    #[test]
    fn test_preview_shadows_durable() {
        let mut canvas = Canvas::new();
        canvas.add_shape(circle("a:0", 0.0), false, false);
        canvas.add_shape(circle("a:1", 0.0), false, false);
        canvas.add_shape(circle("a:0", 50.0), false, true);

        let visible: Vec<_> = canvas.visible_shapes().into_iter().cloned().collect();
        assert_eq!(visible, vec![circle("a:1", 0.0), circle("a:0", 50.0)]);
        assert!(!canvas.is_pending(&ShapeId::from("a:0")));
        assert_eq!(canvas.get_shape_by_id(&ShapeId::from("a:0")), Some(&circle("a:0", 0.0)));
    }

    #[test]
    fn test_shapes_at_point_front_to_back() {
        let mut canvas = Canvas::new();
        canvas.add_shape(circle("a:0", 0.0), false, false);
        canvas.add_shape(circle("a:1", 2.0), false, false);
        canvas.add_shape(circle("a:2", 100.0), false, false);
        assert_eq!(
            canvas.shapes_at_point(Point::new(1.0, 0.0)),
            vec![ShapeId::from("a:1"), ShapeId::from("a:0")]
        );
    }

    #[test]
    fn test_circle_add_remove_scenario() {
        let (mut bus, store, ids) = wired();
        let payload = circle("me:4", 10.0).to_serializable();
        bus.dispatch(DomainEvent::add_shape(payload));
        assert_eq!(store.borrow().len(), 1);
        assert_eq!(ids.borrow().next_sequence(), 5);

        bus.dispatch(DomainEvent::remove_shape(ShapeId::from("me:4")));
        assert!(store.borrow().is_empty());
        assert_eq!(store.borrow().redraw_count(), 2);
        assert_eq!(crate::replay::export_log(&*store.borrow()).unwrap(), "");
    }

    #[test]
    fn test_color_and_order_skip_pending_shapes() {
        let (mut bus, store, _) = wired();
        bus.dispatch(DomainEvent::add_shape(circle("p:0", 0.0).to_serializable()).temporary());
        bus.dispatch(DomainEvent::set_background_color(ShapeId::from("p:0"), "red"));
        bus.dispatch(DomainEvent::move_to_front(ShapeId::from("p:0")));

        let store = store.borrow();
        assert_eq!(store.temporary_shapes()[0].style().background_color, "transparent");
        assert!(store.is_empty());
    }

    #[test]
    fn test_color_events_apply_to_durable() {
        let (mut bus, store, _) = wired();
        bus.dispatch(DomainEvent::add_shape(circle("p:0", 0.0).to_serializable()));
        bus.dispatch(DomainEvent::set_background_color(ShapeId::from("p:0"), "red"));
        bus.dispatch(DomainEvent::set_border_color(ShapeId::from("p:0"), "blue"));
        bus.dispatch(DomainEvent::set_border_color(ShapeId::from("missing:1"), "blue"));

        let store = store.borrow();
        let style = store.get_shape_by_id(&ShapeId::from("p:0")).unwrap().style();
        assert_eq!(style.background_color, "red");
        assert_eq!(style.border_color, "blue");
    }

    #[test]
    fn test_clear_resets_store_and_ids() {
        let (mut bus, store, ids) = wired();
        bus.dispatch(DomainEvent::add_shape(circle("me:7", 0.0).to_serializable()));
        bus.dispatch(DomainEvent::add_shape(circle("me:8", 0.0).to_serializable()).temporary());
        bus.dispatch(DomainEvent::clear_canvas());

        assert!(store.borrow().is_empty());
        assert_eq!(store.borrow().temporary_len(), 0);
        assert_eq!(ids.borrow().next_sequence(), 0);
    }
}
