//! In-process room used by the simulator and tests.
//!
//! The hub owns the authoritative property map and the roster. Each member keeps
//! its own cached copy of the properties which only catches up when
//! [`RoomHub::replicate`] runs, so followers observe writes late the way they do
//! over a real network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::SessionError,
    session::{ParticipantId, Peer, RoomProperties, SessionLayer},
};

struct Member {
    name: String,
    scene: Mutex<String>,
    connected: Mutex<bool>,
    cache: Mutex<RoomProperties>,
    store_fault: Mutex<Option<String>>,
}

struct RoomInner {
    members: IndexMap<ParticipantId, Arc<Member>>,
    properties: RoomProperties,
    leader: Option<ParticipantId>,
    next_actor: i64,
}

/// Authoritative state of one shared room.
pub struct RoomHub {
    inner: RwLock<RoomInner>,
}

impl RoomHub {
    /// Create an empty room.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(RoomInner {
                members: IndexMap::new(),
                properties: RoomProperties::new(),
                leader: None,
                next_actor: 1,
            }),
        })
    }

    /// Join the room as a new participant. The first member becomes leader.
    pub fn join(self: &Arc<Self>, name: impl Into<String>) -> MemorySession {
        let mut inner = self.write();
        let id = ParticipantId(inner.next_actor);
        inner.next_actor += 1;

        let member = Arc::new(Member {
            name: name.into(),
            scene: Mutex::new(String::new()),
            connected: Mutex::new(true),
            cache: Mutex::new(inner.properties.clone()),
            store_fault: Mutex::new(None),
        });
        inner.members.insert(id, member.clone());
        if inner.leader.is_none() {
            inner.leader = Some(id);
        }
        info!(participant = %id, name = %member.name, "participant joined room");

        MemorySession {
            hub: self.clone(),
            id,
            member,
        }
    }

    /// Remove a participant; leadership migrates to the lowest remaining number.
    pub fn leave(&self, id: ParticipantId) {
        let mut inner = self.write();
        let Some(member) = inner.members.shift_remove(&id) else {
            return;
        };
        *lock(&member.connected) = false;
        if inner.leader == Some(id) {
            inner.leader = inner.members.keys().min().copied();
            info!(left = %id, leader = ?inner.leader, "leader left; role migrated");
        }
    }

    /// Push the authoritative properties into every member's cache.
    pub fn replicate(&self) {
        let inner = self.read();
        for member in inner.members.values() {
            *lock(&member.cache) = inner.properties.clone();
        }
        debug!(members = inner.members.len(), "room properties replicated");
    }

    /// Current authoritative value of a property.
    pub fn authoritative(&self, key: &str) -> Option<Value> {
        self.read().properties.get(key).cloned()
    }

    /// Participant holding the leader role.
    pub fn leader(&self) -> Option<ParticipantId> {
        self.read().leader
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RoomInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RoomInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One participant's handle on a [`RoomHub`].
#[derive(Clone)]
pub struct MemorySession {
    hub: Arc<RoomHub>,
    id: ParticipantId,
    member: Arc<Member>,
}

impl MemorySession {
    /// Participant number assigned on join.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Simulate a scene load on this participant.
    pub fn set_scene(&self, scene: impl Into<String>) {
        *lock(&self.member.scene) = scene.into();
    }

    /// Simulate a transient connection drop or recovery.
    pub fn set_connected(&self, connected: bool) {
        *lock(&self.member.connected) = connected;
    }

    /// Make every store access fail with the given message until cleared.
    pub fn set_store_fault(&self, message: Option<&str>) {
        *lock(&self.member.store_fault) = message.map(str::to_owned);
    }

    fn check_fault(&self) -> Result<(), SessionError> {
        match lock(&self.member.store_fault).as_ref() {
            Some(message) => Err(SessionError::unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

impl SessionLayer for MemorySession {
    fn active_scene_name(&self) -> String {
        lock(&self.member.scene).clone()
    }

    fn is_ready(&self) -> bool {
        let connected = *lock(&self.member.connected);
        connected && self.hub.read().members.contains_key(&self.id)
    }

    fn peers(&self) -> Vec<Peer> {
        self.hub
            .read()
            .members
            .iter()
            .map(|(id, member)| Peer {
                id: *id,
                display_name: Some(member.name.clone()),
            })
            .collect()
    }

    fn local_id(&self) -> Option<ParticipantId> {
        Some(self.id)
    }

    fn is_leader(&self) -> bool {
        self.hub.read().leader == Some(self.id)
    }

    fn room_property(&self, key: &str) -> Result<Option<Value>, SessionError> {
        self.check_fault()?;
        if !self.is_ready() {
            return Err(SessionError::NotInRoom);
        }
        Ok(lock(&self.member.cache).get(key).cloned())
    }

    fn set_room_properties(&self, properties: RoomProperties) -> Result<(), SessionError> {
        self.check_fault()?;
        if !self.is_ready() {
            return Err(SessionError::NotInRoom);
        }
        let mut inner = self.hub.write();
        let mut cache = lock(&self.member.cache);
        for (key, value) in properties {
            cache.insert(key.clone(), value.clone());
            inner.properties.insert(key, value);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_member_leads_and_role_migrates() {
        let hub = RoomHub::new();
        let alice = hub.join("Alice");
        let bob = hub.join("Bob");

        assert!(alice.is_leader());
        assert!(!bob.is_leader());

        hub.leave(alice.id());
        assert!(bob.is_leader());
        assert!(!alice.is_ready());
    }

    #[test]
    fn followers_see_writes_after_replication() {
        let hub = RoomHub::new();
        let leader = hub.join("Alice");
        let follower = hub.join("Bob");

        let mut batch = RoomProperties::new();
        batch.insert("k".into(), json!(2));
        leader.set_room_properties(batch).unwrap();

        assert_eq!(leader.room_property("k").unwrap(), Some(json!(2)));
        assert_eq!(follower.room_property("k").unwrap(), None);

        hub.replicate();
        assert_eq!(follower.room_property("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn store_fault_surfaces_as_unavailable() {
        let hub = RoomHub::new();
        let alice = hub.join("Alice");
        alice.set_store_fault(Some("socket closed"));

        let err = alice.room_property("k").unwrap_err();
        assert_eq!(err, SessionError::unavailable("socket closed"));
    }

    #[test]
    fn roster_keeps_join_order_and_names() {
        let hub = RoomHub::new();
        let alice = hub.join("Alice");
        hub.join("Bob");

        let names: Vec<_> = alice
            .peers()
            .into_iter()
            .filter_map(|peer| peer.display_name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert_eq!(alice.display_name(ParticipantId(2)).as_deref(), Some("Bob"));
        assert_eq!(alice.display_name(ParticipantId(9)), None);
    }
}
