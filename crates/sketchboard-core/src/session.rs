//! One collaborative session: bus, shape store, identity counter and log.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::EventBus;
use crate::canvas::{Canvas, attach_shape_manager};
use crate::events::{DomainEvent, EventError};
use crate::identity::{IdentityAllocator, ShapeId};
use crate::replay::{self, EventLog, ImportReport};

/// A bus wired to a [`Canvas`] and an [`EventLog`].
///
/// Kind handlers keep the canvas and identity counter in sync; a catch-all
/// observer echoes durable events into the log. Relays attach their own
/// observers through [`Session::bus_mut`].
#[derive(Debug)]
pub struct Session {
    bus: EventBus,
    store: Rc<RefCell<Canvas>>,
    ids: Rc<RefCell<IdentityAllocator>>,
    log: Rc<RefCell<EventLog>>,
}

impl Session {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self::with_bus(EventBus::new(), peer_id)
    }

    /// Wire a session onto an existing bus.
    pub fn with_bus(mut bus: EventBus, peer_id: impl Into<String>) -> Self {
        let store = Rc::new(RefCell::new(Canvas::new()));
        let ids = Rc::new(RefCell::new(IdentityAllocator::new(peer_id)));
        let log = Rc::new(RefCell::new(EventLog::new()));
        attach_shape_manager(&mut bus, store.clone(), ids.clone());
        replay::attach_event_log(&mut bus, log.clone());
        Self { bus, store, ids, log }
    }

    pub fn peer_id(&self) -> String {
        self.ids.borrow().peer_id().to_string()
    }

    pub fn dispatch(&mut self, event: DomainEvent) -> DomainEvent {
        self.bus.dispatch(event)
    }

    /// Allocate the next shape id for this peer.
    pub fn mint_id(&self) -> ShapeId {
        self.ids.borrow_mut().next_id()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn store(&self) -> &Rc<RefCell<Canvas>> {
        &self.store
    }

    pub fn ids(&self) -> &Rc<RefCell<IdentityAllocator>> {
        &self.ids
    }

    pub fn log(&self) -> &Rc<RefCell<EventLog>> {
        &self.log
    }

    /// The visible log text.
    pub fn log_text(&self) -> String {
        self.log.borrow().text()
    }

    /// Canonical export of the current durable shapes.
    pub fn export_log(&self) -> Result<String, EventError> {
        replay::export_log(&*self.store.borrow())
    }

    pub fn import_log(&mut self, text: &str) -> Result<ImportReport, EventError> {
        replay::import_log(&mut self.bus, &self.store, &self.log, text)
    }
}
