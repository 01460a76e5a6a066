//! Replicated seeker assignment and the per-participant view derived from it.

use serde_json::Value;
use tracing::debug;

use crate::{
    error::SessionError,
    session::{ParticipantId, RoomProperties, SessionLayer},
};

/// Room property holding the current seeker.
pub const KEY_SEEKER: &str = "HNS_Seeker";
/// Room property holding the previous pick, used to avoid immediate repeats.
pub const KEY_LAST_SEEKER: &str = "HNS_LastSeeker";

/// Decode a participant number stored as a JSON integer.
///
/// Absent, non-integer and non-positive values all read as unset.
pub fn decode_participant(value: Option<&Value>) -> Option<ParticipantId> {
    let value = value?;
    let id = value.as_i64().or_else(|| {
        debug!(value = %value, "ignoring non-integer seeker property");
        None
    })?;
    Some(ParticipantId(id)).filter(|id| id.is_valid())
}

/// The two replicated scalars describing who seeks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekerAssignment {
    /// Participant currently seeking.
    pub current: Option<ParticipantId>,
    /// Participant picked last time.
    pub last: Option<ParticipantId>,
}

impl SeekerAssignment {
    /// Assignment written when `id` is picked: it becomes both current and last.
    pub fn chosen(id: ParticipantId) -> Self {
        Self {
            current: Some(id),
            last: Some(id),
        }
    }

    /// Read the current seeker only.
    pub fn read_current(session: &dyn SessionLayer) -> Result<Option<ParticipantId>, SessionError> {
        Ok(decode_participant(session.room_property(KEY_SEEKER)?.as_ref()))
    }

    /// Read both fields from the room store.
    pub fn read(session: &dyn SessionLayer) -> Result<Self, SessionError> {
        Ok(Self {
            current: Self::read_current(session)?,
            last: decode_participant(session.room_property(KEY_LAST_SEEKER)?.as_ref()),
        })
    }

    /// Write both fields in a single store update.
    pub fn write(&self, session: &dyn SessionLayer) -> Result<(), SessionError> {
        session.set_room_properties(self.to_properties())
    }

    /// Property batch for this assignment; unset fields are written as `-1`.
    pub fn to_properties(&self) -> RoomProperties {
        let encode = |id: Option<ParticipantId>| Value::from(id.map_or(-1, |id| id.0));
        let mut properties = RoomProperties::new();
        properties.insert(KEY_SEEKER.into(), encode(self.current));
        properties.insert(KEY_LAST_SEEKER.into(), encode(self.last));
        properties
    }
}

/// Effect of applying a newly observed seeker value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekerChange {
    /// Seeker now in effect.
    pub seeker: Option<ParticipantId>,
    /// Whether the local participant was seeking before.
    pub was_local: bool,
    /// Whether the local participant is seeking now.
    pub is_local: bool,
}

impl SeekerChange {
    /// The local participant just entered the seeker role.
    pub fn became_local(&self) -> bool {
        self.is_local && !self.was_local
    }
}

/// Per-participant cache of the replicated assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSeekerView {
    current_seeker: Option<ParticipantId>,
    is_local_seeker: bool,
    last_observed: Option<Option<ParticipantId>>,
}

impl LocalSeekerView {
    /// Seeker currently applied locally.
    pub fn current_seeker(&self) -> Option<ParticipantId> {
        self.current_seeker
    }

    /// Whether the local participant is the seeker.
    pub fn is_local_seeker(&self) -> bool {
        self.is_local_seeker
    }

    /// Whether `value` is what this view last applied.
    pub fn has_observed(&self, value: Option<ParticipantId>) -> bool {
        self.last_observed == Some(value)
    }

    /// Apply an incoming value. Returns `None` when it was already applied.
    pub fn observe(
        &mut self,
        incoming: Option<ParticipantId>,
        local: Option<ParticipantId>,
    ) -> Option<SeekerChange> {
        if self.has_observed(incoming) {
            return None;
        }
        self.last_observed = Some(incoming);

        let was_local = self.is_local_seeker;
        self.current_seeker = incoming;
        self.is_local_seeker = incoming.is_some() && incoming == local;

        Some(SeekerChange {
            seeker: incoming,
            was_local,
            is_local: self.is_local_seeker,
        })
    }

    /// Forget everything, as on session teardown.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
