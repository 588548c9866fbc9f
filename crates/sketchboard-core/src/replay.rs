//! Event log: the visible, newline-delimited record of durable events.
//!
//! The log is written by a catch-all observer while the session runs, exported
//! as one ADD_SHAPE per durable shape, and imported by replaying each line on
//! the bus with the other observers detached.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::{EventBus, SubscriptionId};
use crate::canvas::{Canvas, ShapeManager, attach_shape_manager};
use crate::events::{DomainEvent, EventError, EventKind, unix_millis};
use crate::identity::IdentityAllocator;

/// Append-only log of durable events, one JSON object per line.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    lines: Vec<String>,
    revision: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for events that belong in the log.
    pub fn records(event: &DomainEvent) -> bool {
        !event.is_temporary() && event.kind() != EventKind::Redraw
    }

    /// Append `event` without its origin tags. Returns false if it was skipped.
    pub fn append(&mut self, event: &DomainEvent) -> Result<bool, EventError> {
        if !Self::records(event) {
            return Ok(false);
        }
        self.lines.push(event.without_origin().to_json()?);
        self.revision += 1;
        Ok(true)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Bumped on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The log as NDJSON with a trailing newline.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Replace the contents with `text`, ignoring blank lines.
    pub fn replace(&mut self, text: &str) {
        self.lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        self.revision += 1;
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.revision += 1;
    }
}

/// Register the observer that echoes durable events into `log`.
pub fn attach_event_log(bus: &mut EventBus, log: Rc<RefCell<EventLog>>) -> SubscriptionId {
    bus.subscribe_to_all(move |event| {
        log.try_borrow_mut()?.append(event)?;
        Ok(())
    })
}

/// Outcome of [`import_log`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub applied: usize,
    pub skipped: usize,
}

/// One ADD_SHAPE per durable shape, back to front.
pub fn export_events<M: ShapeManager + ?Sized>(store: &M) -> Vec<DomainEvent> {
    let mut events: Vec<DomainEvent> = store
        .get_shapes()
        .into_iter()
        .map(|shape| DomainEvent::add_shape(shape.to_serializable()).with_timestamp(unix_millis()))
        .collect();
    events.sort_by_key(|event| event.timestamp);
    events
}

/// Serialize the durable state of `store` as an NDJSON log.
pub fn export_log<M: ShapeManager + ?Sized>(store: &M) -> Result<String, EventError> {
    let mut text = String::new();
    for event in export_events(store) {
        text.push_str(&event.to_json()?);
        text.push('\n');
    }
    Ok(text)
}

/// Collapse an event history into the export of its final state.
///
/// Replaying the result yields the same shapes, colors and z-order as
/// replaying every line. Lines that fail to parse are skipped.
pub fn compact_history<'a, I>(lines: I) -> Result<Vec<String>, EventError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut bus = EventBus::new();
    let store = Rc::new(RefCell::new(Canvas::new()));
    let ids = Rc::new(RefCell::new(IdentityAllocator::new("history")));
    attach_shape_manager(&mut bus, store.clone(), ids);

    for line in lines.into_iter().map(str::trim).filter(|line| !line.is_empty()) {
        match DomainEvent::from_json(line) {
            Ok(event) => {
                bus.dispatch(event);
            }
            Err(err) => log::warn!("Skipping history line: {err}"),
        }
    }

    let events = export_events(&*store.borrow());
    events.iter().map(DomainEvent::to_json).collect()
}

/// Replace the session state with the events in `text`.
///
/// The canvas is cleared first. Replayed events reach the kind handlers only,
/// so they are neither relayed nor echoed into `log`; afterwards `log` holds
/// the export of the resulting state.
pub fn import_log<M: ShapeManager + ?Sized>(
    bus: &mut EventBus,
    store: &RefCell<M>,
    log: &RefCell<EventLog>,
    text: &str,
) -> Result<ImportReport, EventError> {
    bus.dispatch(DomainEvent::clear_canvas());

    let detached = bus.detach_observers();
    let mut report = ImportReport::default();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match DomainEvent::from_json(line) {
            Ok(event) => {
                bus.dispatch(event);
                report.applied += 1;
            }
            Err(err) => {
                log::warn!("Skipping log line {}: {err}", number + 1);
                report.skipped += 1;
            }
        }
    }
    bus.dispatch(DomainEvent::redraw());
    bus.reattach_observers(detached);

    let exported = export_log(&*store.borrow())?;
    log.borrow_mut().replace(&exported);
    log::info!(
        "Imported {} events ({} skipped)",
        report.applied,
        report.skipped
    );
    Ok(report)
}
