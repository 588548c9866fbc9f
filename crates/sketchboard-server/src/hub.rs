//! Canvas rooms: membership, compacting history and fan-out.

use dashmap::DashMap;
use serde_json::Value;
use sketchboard_core::storage::{LogStorage, join_lines};
use sketchboard_core::wire::{Frame, parse_frames};
use sketchboard_core::{EventKind, compact_history};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// A frame relayed to every member of a room except its sender.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub from: Uuid,
    pub frame: Arc<str>,
}

/// What the sender of a frame should get back.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    None,
    Send(String),
}

struct Room {
    tx: broadcast::Sender<Broadcast>,
    history: VecDeque<String>,
    members: usize,
}

impl Room {
    fn new(history: VecDeque<String>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history,
            members: 0,
        }
    }
}

/// Shared server state.
pub struct Hub {
    rooms: DashMap<String, Room>,
    max_history: usize,
    storage: Option<Arc<dyn LogStorage>>,
}

impl Hub {
    pub fn new(max_history: usize, storage: Option<Arc<dyn LogStorage>>) -> Self {
        Self {
            rooms: DashMap::new(),
            max_history,
            storage,
        }
    }

    /// Join a room. Returns the broadcast receiver and the current history.
    pub async fn join(&self, canvas_id: &str) -> (broadcast::Receiver<Broadcast>, Vec<String>) {
        let stored = if self.rooms.contains_key(canvas_id) {
            VecDeque::new()
        } else {
            self.load_history(canvas_id).await
        };
        let mut room = self
            .rooms
            .entry(canvas_id.to_string())
            .or_insert_with(|| Room::new(stored));
        room.members += 1;
        info!("Canvas {canvas_id} now has {} connections", room.members);
        (room.tx.subscribe(), room.history.iter().cloned().collect())
    }

    /// Leave a room, dropping it when empty.
    pub fn leave(&self, canvas_id: &str) {
        let empty = match self.rooms.get_mut(canvas_id) {
            Some(mut room) => {
                room.members = room.members.saturating_sub(1);
                room.members == 0
            }
            None => false,
        };
        if empty {
            self.rooms.remove_if(canvas_id, |_, room| room.members == 0);
            debug!("Closed room {canvas_id}");
        }
    }

    pub fn member_count(&self, canvas_id: &str) -> usize {
        self.rooms.get(canvas_id).map_or(0, |room| room.members)
    }

    pub fn history(&self, canvas_id: &str) -> Vec<String> {
        self.rooms
            .get(canvas_id)
            .map(|room| room.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Handle one line received from `from` on `canvas_id`.
    pub async fn publish(&self, canvas_id: &str, from: Uuid, line: &str) -> Reply {
        let mut reply = Reply::None;
        for frame in parse_frames(line) {
            match frame {
                Ok(Frame::Event(event)) => {
                    if event.is_temporary() {
                        debug!("Dropping temporary {} from {from}", event.kind());
                        continue;
                    }
                    let event = event.without_origin();
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode event from {from}: {e}");
                            continue;
                        }
                    };
                    self.record(canvas_id, event.kind(), &json).await;
                    self.fan_out(canvas_id, from, json);
                }
                Ok(Frame::Ping { canvas_id: pinged }) => {
                    let pong = Frame::Pong {
                        canvas_id: pinged.or_else(|| Some(canvas_id.to_string())),
                    };
                    match pong.to_json() {
                        Ok(pong) => reply = Reply::Send(pong),
                        Err(e) => warn!("Failed to encode PONG: {e}"),
                    }
                }
                Ok(Frame::Pong { .. }) => debug!("PONG from {from}"),
                Ok(Frame::Register { canvas_id: other }) => {
                    warn!("Ignoring repeated register for {other} from {from}")
                }
                Ok(Frame::Error { message }) => warn!("Client {from} reported: {message}"),
                Err(e) => warn!("Dropping malformed frame from {from}: {e}"),
            }
        }
        reply
    }

    async fn record(&self, canvas_id: &str, kind: EventKind, json: &str) {
        match kind {
            EventKind::Redraw => return,
            EventKind::ClearCanvas => {
                if let Some(mut room) = self.rooms.get_mut(canvas_id) {
                    room.history.clear();
                }
                if let Some(storage) = &self.storage {
                    if let Err(e) = storage.save(canvas_id, "").await {
                        warn!("Failed to truncate log of {canvas_id}: {e}");
                    }
                }
            }
            _ => {}
        }
        let compacted = self.rooms.get_mut(canvas_id).and_then(|mut room| {
            room.history.push_back(json.to_string());
            if room.history.len() <= self.max_history {
                return None;
            }
            let compacted = compact(canvas_id, &room.history)?;
            room.history = compacted.iter().cloned().collect();
            Some(compacted)
        });
        if let Some(storage) = &self.storage {
            let saved = match &compacted {
                Some(lines) => storage.save(canvas_id, &join_lines(lines)).await,
                None => storage.append(canvas_id, &[json.to_string()]).await,
            };
            if let Err(e) = saved {
                warn!("Failed to persist event for {canvas_id}: {e}");
            }
        }
    }

    fn fan_out(&self, canvas_id: &str, from: Uuid, frame: String) {
        if let Some(room) = self.rooms.get(canvas_id) {
            // No receivers left is fine.
            let _ = room.tx.send(Broadcast {
                from,
                frame: frame.into(),
            });
        }
    }

    async fn load_history(&self, canvas_id: &str) -> VecDeque<String> {
        let Some(storage) = &self.storage else {
            return VecDeque::new();
        };
        let text = match storage.exists(canvas_id).await {
            Ok(true) => match storage.load(canvas_id).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to load log of {canvas_id}: {e}");
                    return VecDeque::new();
                }
            },
            Ok(false) => return VecDeque::new(),
            Err(e) => {
                warn!("Failed to check log of {canvas_id}: {e}");
                return VecDeque::new();
            }
        };
        let mut history: VecDeque<String> = text
            .lines()
            .filter(|line| serde_json::from_str::<Value>(line).is_ok())
            .map(str::to_string)
            .collect();
        if history.len() > self.max_history {
            if let Some(compacted) = compact(canvas_id, &history) {
                if let Err(e) = storage.save(canvas_id, &join_lines(&compacted)).await {
                    warn!("Failed to rewrite log of {canvas_id}: {e}");
                }
                history = compacted.into();
            }
        }
        info!("Loaded {} events for canvas {canvas_id}", history.len());
        history
    }
}

/// Replace a history with the ADD_SHAPE events of its final state.
fn compact(canvas_id: &str, history: &VecDeque<String>) -> Option<Vec<String>> {
    match compact_history(history.iter().map(String::as_str)) {
        Ok(compacted) => {
            info!(
                "Compacted history of {canvas_id} from {} to {} events",
                history.len(),
                compacted.len()
            );
            Some(compacted)
        }
        Err(e) => {
            warn!("Failed to compact history of {canvas_id}: {e}");
            None
        }
    }
}
