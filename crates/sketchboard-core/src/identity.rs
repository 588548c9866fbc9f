//! Peer-scoped shape identifiers.
//!
//! Every shape id has the form `"{peer_id}:{sequence}"`. Ids are unique as long
//! as peer ids are unique, so no central allocator is needed.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Identifier of a shape on the shared canvas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(String);

impl ShapeId {
    /// Build an id from a peer id and a sequence number.
    pub fn new(peer_id: &str, sequence: u64) -> Self {
        Self(format!("{peer_id}:{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(peer_id, sequence)`.
    ///
    /// Returns `None` for malformed ids (no colon, empty peer segment or a
    /// non-numeric sequence). The split happens at the last colon so peer ids
    /// may contain colons themselves.
    pub fn parts(&self) -> Option<(&str, u64)> {
        let (peer, sequence) = self.0.rsplit_once(':')?;
        if peer.is_empty() {
            return None;
        }
        let sequence = sequence.parse().ok()?;
        Some((peer, sequence))
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShapeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ShapeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Serialize for ShapeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

// Older logs carry bare numeric ids; they are kept verbatim and never match a
// peer segment during reconciliation.
impl<'de> Deserialize<'de> for ShapeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ShapeIdVisitor;

        impl Visitor<'_> for ShapeIdVisitor {
            type Value = ShapeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a shape id string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ShapeId, E> {
                Ok(ShapeId::from(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<ShapeId, E> {
                Ok(ShapeId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ShapeId, E> {
                Ok(ShapeId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ShapeId, E> {
                Ok(ShapeId(v.to_string()))
            }
        }

        deserializer.deserialize_any(ShapeIdVisitor)
    }
}

/// Generate a fresh random peer id.
pub fn generate_peer_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Mints shape ids for the local peer and keeps its counter ahead of every
/// own id observed from the network or a replayed log.
#[derive(Debug, Clone)]
pub struct IdentityAllocator {
    peer_id: String,
    next_sequence: u64,
}

impl IdentityAllocator {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            next_sequence: 0,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The sequence number the next minted id will use.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Mint a new id. Sequence numbers are never reused.
    pub fn next_id(&mut self) -> ShapeId {
        let id = ShapeId::new(&self.peer_id, self.next_sequence);
        self.next_sequence = self.next_sequence.saturating_add(1);
        id
    }

    /// Advance the counter past `id` if it belongs to this peer.
    ///
    /// Foreign and malformed ids are ignored. Returns true if the counter moved.
    pub fn reconcile(&mut self, id: &ShapeId) -> bool {
        match id.parts() {
            Some((peer, sequence)) if peer == self.peer_id && sequence >= self.next_sequence => {
                self.next_sequence = sequence.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    /// Reset the counter (canvas cleared).
    pub fn reset(&mut self) {
        self.next_sequence = 0;
    }
}
