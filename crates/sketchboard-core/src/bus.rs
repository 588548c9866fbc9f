//! Typed publish/subscribe event bus.
//!
//! Kind handlers run first, in registration order, followed by catch-all
//! observers in registration order. A failing or panicking handler is logged
//! and skipped; it never prevents the remaining handlers from running.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::events::{DomainEvent, EventKind, unix_millis};

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

/// Boxed event handler. Handlers are `!Send`; the bus lives on one thread.
pub type Handler = Box<dyn FnMut(&DomainEvent) -> HandlerResult>;

/// Handle used to remove a handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Catch-all observers removed by [`EventBus::detach_observers`].
pub struct DetachedObservers(Vec<Subscription>);

impl DetachedObservers {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Millisecond clock that never goes backwards.
struct Clock {
    source: Box<dyn FnMut() -> u64>,
    last: u64,
}

impl Clock {
    fn now(&mut self) -> u64 {
        let now = (self.source)().max(self.last);
        self.last = now;
        now
    }
}

pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<Subscription>>,
    observers: Vec<Subscription>,
    next_subscription: u64,
    clock: Clock,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|(kind, subs)| (*kind, subs.len()))
                    .collect::<HashMap<_, _>>(),
            )
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_clock(unix_millis)
    }

    /// Create a bus stamping events from a custom millisecond source.
    pub fn with_clock(source: impl FnMut() -> u64 + 'static) -> Self {
        Self {
            subscribers: HashMap::new(),
            observers: Vec::new(),
            next_subscription: 0,
            clock: Clock {
                source: Box::new(source),
                last: 0,
            },
        }
    }

    fn next_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        id
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&DomainEvent) -> HandlerResult + 'static,
    {
        let id = self.next_id();
        self.subscribers.entry(kind).or_default().push(Subscription {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Register an observer for every event. Observers run after kind handlers.
    pub fn subscribe_to_all<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&DomainEvent) -> HandlerResult + 'static,
    {
        let id = self.next_id();
        self.observers.push(Subscription {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a handler or observer. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if let Some(pos) = self.observers.iter().position(|s| s.id == id) {
            self.observers.remove(pos);
            return true;
        }
        for subs in self.subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Stamp the event if it has no timestamp yet, then run every matching
    /// handler followed by every observer. Returns the stamped event.
    pub fn dispatch(&mut self, mut event: DomainEvent) -> DomainEvent {
        if event.timestamp.is_none() {
            event.timestamp = Some(self.clock.now());
        }

        let kind = event.kind();
        log::debug!("dispatch {kind}");

        if let Some(subs) = self.subscribers.get_mut(&kind) {
            for sub in subs.iter_mut() {
                invoke(sub, &event);
            }
        }
        for sub in self.observers.iter_mut() {
            invoke(sub, &event);
        }
        event
    }

    /// Remove all catch-all observers until [`Self::reattach_observers`].
    pub fn detach_observers(&mut self) -> DetachedObservers {
        DetachedObservers(std::mem::take(&mut self.observers))
    }

    /// Restore detached observers ahead of any registered in the meantime.
    pub fn reattach_observers(&mut self, detached: DetachedObservers) {
        let added = std::mem::replace(&mut self.observers, detached.0);
        self.observers.extend(added);
    }
}

fn invoke(sub: &mut Subscription, event: &DomainEvent) {
    let kind = event.kind();
    match panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::error!("{kind} handler failed: {err}"),
        Err(payload) => log::error!("{kind} handler panicked: {}", panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ShapeId;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, name: &'static str) -> impl FnMut(&DomainEvent) -> HandlerResult + 'static {
        let log = log.clone();
        move |event| {
            log.borrow_mut().push(format!("{name}:{}", event.kind()));
            Ok(())
        }
    }

    #[test]
    fn test_kind_handlers_then_observers_in_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe_to_all(recorder(&calls, "obs1"));
        bus.subscribe(EventKind::Redraw, recorder(&calls, "h1"));
        bus.subscribe_to_all(recorder(&calls, "obs2"));
        bus.subscribe(EventKind::Redraw, recorder(&calls, "h2"));
        bus.subscribe(EventKind::ClearCanvas, recorder(&calls, "other"));

        bus.dispatch(DomainEvent::redraw());

        assert_eq!(
            *calls.borrow(),
            vec!["h1:REDRAW", "h2:REDRAW", "obs1:REDRAW", "obs2:REDRAW"]
        );
    }

    #[test]
    fn test_dispatch_without_handlers() {
        let mut bus = EventBus::new();
        let event = bus.dispatch(DomainEvent::move_to_back(ShapeId::from("x:1")));
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_timestamp_first_set_wins() {
        let mut bus = EventBus::with_clock(|| 500);
        let stamped = bus.dispatch(DomainEvent::redraw());
        assert_eq!(stamped.timestamp, Some(500));

        let kept = bus.dispatch(DomainEvent::redraw().with_timestamp(7));
        assert_eq!(kept.timestamp, Some(7));
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let ticks = Rc::new(RefCell::new(vec![100, 90, 120].into_iter()));
        let source = ticks.clone();
        let mut bus = EventBus::with_clock(move || source.borrow_mut().next().unwrap_or(0));

        let stamps: Vec<_> = (0..3)
            .map(|_| bus.dispatch(DomainEvent::redraw()).timestamp.unwrap())
            .collect();
        assert_eq!(stamps, vec![100, 100, 120]);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Redraw, |_| Err("boom".into()));
        bus.subscribe(EventKind::Redraw, recorder(&calls, "after"));
        bus.subscribe_to_all(recorder(&calls, "obs"));

        bus.dispatch(DomainEvent::redraw());
        assert_eq!(*calls.borrow(), vec!["after:REDRAW", "obs:REDRAW"]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Redraw, |_| panic!("handler blew up"));
        bus.subscribe_to_all(|_| panic!("observer blew up"));
        bus.subscribe_to_all(recorder(&calls, "obs"));

        bus.dispatch(DomainEvent::redraw());
        bus.dispatch(DomainEvent::redraw());
        assert_eq!(*calls.borrow(), vec!["obs:REDRAW", "obs:REDRAW"]);
    }

    #[test]
    fn test_unsubscribe() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        let handler = bus.subscribe(EventKind::Redraw, recorder(&calls, "h"));
        let observer = bus.subscribe_to_all(recorder(&calls, "obs"));

        assert!(bus.unsubscribe(handler));
        assert!(bus.unsubscribe(observer));
        assert!(!bus.unsubscribe(observer));

        bus.dispatch(DomainEvent::redraw());
        assert!(calls.borrow().is_empty());
        assert_eq!(bus.handler_count(EventKind::Redraw), 0);
    }

    #[test]
    fn test_detach_and_reattach_observers() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Redraw, recorder(&calls, "h"));
        bus.subscribe_to_all(recorder(&calls, "old"));

        let detached = bus.detach_observers();
        assert_eq!(detached.len(), 1);
        bus.dispatch(DomainEvent::redraw());
        assert_eq!(*calls.borrow(), vec!["h:REDRAW"]);

        bus.subscribe_to_all(recorder(&calls, "new"));
        bus.reattach_observers(detached);
        calls.borrow_mut().clear();

        bus.dispatch(DomainEvent::redraw());
        assert_eq!(*calls.borrow(), vec!["h:REDRAW", "old:REDRAW", "new:REDRAW"]);
    }
}
