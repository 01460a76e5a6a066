//! Interfaces offered by the host session layer, plus an in-memory room used by
//! the simulator and the tests.

mod log_hub;
pub mod memory;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

pub use self::log_hub::LogHub;

/// Key/value batch written atomically to the replicated room store.
pub type RoomProperties = IndexMap<String, Value>;

/// Session-scoped participant number. Valid identifiers are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub i64);

impl ParticipantId {
    /// Whether the number can refer to a live participant.
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Roster entry as reported by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Participant number.
    pub id: ParticipantId,
    /// Nickname, when the session layer has already resolved it.
    pub display_name: Option<String>,
}

impl Peer {
    /// Build a roster entry with a known nickname.
    pub fn named(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId(id),
            display_name: Some(name.into()),
        }
    }
}

/// Locally cached view of the multiplayer session.
///
/// Every call is a non-blocking read or write of state the networking layer
/// keeps up to date on its own schedule.
pub trait SessionLayer: Send + Sync {
    /// Name of the scene currently loaded.
    fn active_scene_name(&self) -> String;
    /// Connected and inside an active room.
    fn is_ready(&self) -> bool;
    /// Ordered roster of the room, including the local participant.
    fn peers(&self) -> Vec<Peer>;
    /// Number assigned to the local participant, if joined.
    fn local_id(&self) -> Option<ParticipantId>;
    /// Whether the local participant currently holds the leader role.
    fn is_leader(&self) -> bool;
    /// Read one room property.
    fn room_property(&self, key: &str) -> Result<Option<Value>, SessionError>;
    /// Upsert several room properties in one last-write-wins update.
    fn set_room_properties(&self, properties: RoomProperties) -> Result<(), SessionError>;

    /// Resolve the nickname of a participant from the roster.
    fn display_name(&self, id: ParticipantId) -> Option<String> {
        self.peers()
            .into_iter()
            .find(|peer| peer.id == id)
            .and_then(|peer| peer.display_name)
            .filter(|name| !name.trim().is_empty())
    }
}
