//! Seeker coordinator.
//!
//! The leader picks a seeker and writes it to the room store; every participant,
//! leader included, polls the store and applies whatever value it finds. Apply is
//! deduplicated, so replays of the same value never notify twice.

use std::{sync::Arc, time::Instant};

use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::SettingsWatch,
    error::SelectionError,
    scheduler::{Deferred, TaskId},
    services::{
        notifications::NotificationSink,
        selection::{RandomSource, choose_seeker},
    },
    session::{ParticipantId, SessionLayer},
    state::{
        gate::RoundBegan,
        seeker::{LocalSeekerView, SeekerAssignment, SeekerChange},
    },
};

/// What a coordinator operation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The leader picked and published a seeker.
    Selected(ParticipantId),
    /// The stored value was (re-)applied without selecting.
    Applied(Option<ParticipantId>),
    /// The round start was deferred by the auto-select delay.
    Scheduled,
    /// The session is not in an active room; nothing happened.
    NotReady,
    /// Only the leader may select; nothing happened.
    NotLeader,
    /// Store access or selection failed; retried on the next trigger.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    BeginRound,
    EngageBlackout,
}

/// Leader-driven, poll-based seeker assignment.
pub struct SeekerCoordinator {
    settings: SettingsWatch,
    session: Arc<dyn SessionLayer>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RandomSource>,
    view: LocalSeekerView,
    tasks: Deferred<Task>,
    pending_round: Option<TaskId>,
    pending_blackout: Option<TaskId>,
    next_poll: Option<Instant>,
}

impl SeekerCoordinator {
    /// Build a coordinator for the local participant.
    pub fn new(
        settings: SettingsWatch,
        session: Arc<dyn SessionLayer>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        info!("seeker coordinator created (polling, no callbacks)");
        Self {
            settings,
            session,
            sink,
            clock,
            rng,
            view: LocalSeekerView::default(),
            tasks: Deferred::new(),
            pending_round: None,
            pending_blackout: None,
            next_poll: None,
        }
    }

    /// Locally applied assignment.
    pub fn view(&self) -> &LocalSeekerView {
        &self.view
    }

    /// Whether a deferred round start is waiting.
    pub fn round_pending(&self) -> bool {
        self.pending_round.is_some()
    }

    /// React to the gate's round-began event.
    ///
    /// With auto-select enabled the round starts after the configured delay;
    /// otherwise the stored value is applied right away and no pick happens.
    pub fn round_began(&mut self, began: &RoundBegan) -> RoundOutcome {
        let seeker = self.settings.borrow().seeker.clone();
        if !seeker.auto_select_on_join {
            debug!(level = %began.level, "auto-select disabled; applying stored seeker");
            return self.begin(false);
        }

        self.cancel_pending_round();
        let delay = seeker.auto_delay();
        if delay.is_zero() {
            return self.begin(true);
        }
        let id = self.tasks.schedule(self.clock.now() + delay, Task::BeginRound);
        self.pending_round = Some(id);
        debug!(level = %began.level, delay_ms = delay.as_millis() as u64, "round start scheduled");
        RoundOutcome::Scheduled
    }

    /// Drop a deferred round start, e.g. because a new level was detected.
    pub fn cancel_pending_round(&mut self) {
        if let Some(id) = self.pending_round.take() {
            if self.tasks.cancel(id) {
                debug!(task = %id, "pending round start cancelled");
            }
        }
    }

    /// Start the round: the leader picks when nothing is assigned yet, everyone
    /// else applies what is stored. Safe to call repeatedly.
    pub fn begin_round(&mut self) -> RoundOutcome {
        self.begin(true)
    }

    /// Re-roll the seeker. Ignored unless the local participant leads.
    pub fn force_reselect(&mut self) -> RoundOutcome {
        if !self.session.is_ready() {
            return RoundOutcome::NotReady;
        }
        if !self.session.is_leader() {
            info!("force reselect ignored (not leader)");
            return RoundOutcome::NotLeader;
        }
        let outcome = self.select();
        self.poll_soon();
        outcome
    }

    fn engage_blackout(&self) {
        let blindness = self.settings.borrow().blindness.clone();
        self.sink
            .on_became_seeker(blindness.duration(), blindness.keep_ui_visible);
    }

    /// Run due deferred work, then poll the store if the poll interval elapsed.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        for (id, task) in self.tasks.take_due(now) {
            match task {
                Task::BeginRound => {
                    self.pending_round = None;
                    debug!(task = %id, "deferred round start due");
                    self.begin(true);
                }
                Task::EngageBlackout => {
                    self.pending_blackout = None;
                    if self.view.is_local_seeker() {
                        self.engage_blackout();
                    }
                }
            }
        }

        if self.next_poll.is_some_and(|at| now < at) {
            return;
        }
        let interval = self.settings.borrow().seeker.poll_interval();
        self.next_poll = Some(now + interval);
        self.poll_store();
    }

    /// Forget local state, as on leaving the session.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.pending_round = None;
        self.pending_blackout = None;
        self.next_poll = None;
        self.view.reset();
    }

    fn begin(&mut self, allow_select: bool) -> RoundOutcome {
        if !self.session.is_ready() {
            debug!("begin round skipped; session not ready");
            return RoundOutcome::NotReady;
        }

        let current = match SeekerAssignment::read_current(self.session.as_ref()) {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "failed to read seeker assignment");
                return RoundOutcome::Failed;
            }
        };

        let outcome = if allow_select && current.is_none() && self.session.is_leader() {
            self.select()
        } else {
            self.apply(current);
            RoundOutcome::Applied(current)
        };
        self.poll_soon();
        outcome
    }

    fn select(&mut self) -> RoundOutcome {
        match self.try_select() {
            Ok(id) => RoundOutcome::Selected(id),
            Err(err) => {
                error!(error = %err, "seeker selection failed; will retry on next trigger");
                RoundOutcome::Failed
            }
        }
    }

    fn try_select(&mut self) -> Result<ParticipantId, SelectionError> {
        let peers = self.session.peers();
        let last = SeekerAssignment::read(self.session.as_ref())?.last;
        let chosen = choose_seeker(&peers, last, true, self.rng.as_mut())?;

        SeekerAssignment::chosen(chosen.id).write(self.session.as_ref())?;
        info!(
            seeker = %chosen.id,
            name = chosen.display_name.as_deref().unwrap_or("?"),
            "leader chose seeker"
        );

        self.apply(Some(chosen.id));
        Ok(chosen.id)
    }

    fn poll_store(&mut self) {
        if !self.session.is_ready() {
            return;
        }
        match SeekerAssignment::read_current(self.session.as_ref()) {
            Ok(seeker) if !self.view.has_observed(seeker) => {
                info!(seeker = ?seeker, "poll detected seeker change");
                self.apply(seeker);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "seeker poll failed"),
        }
    }

    fn apply(&mut self, seeker: Option<ParticipantId>) -> Option<SeekerChange> {
        let local = self.session.local_id();
        let change = self.view.observe(seeker, local)?;
        info!(seeker = ?seeker, local = change.is_local, "applied seeker");

        let Some(id) = seeker else {
            self.cancel_pending_blackout();
            return Some(change);
        };

        let config = self.settings.borrow().seeker.clone();
        if change.became_local() {
            self.cancel_pending_blackout();
            let settle = config.settle_delay();
            if settle.is_zero() {
                self.engage_blackout();
            } else {
                let task = self
                    .tasks
                    .schedule(self.clock.now() + settle, Task::EngageBlackout);
                self.pending_blackout = Some(task);
            }
        } else if !change.is_local {
            self.cancel_pending_blackout();
            let name = self
                .session
                .display_name(id)
                .unwrap_or_else(|| format!("Player {id}"));
            self.sink.on_other_became_seeker(&name, config.announcement());
        }
        Some(change)
    }

    fn cancel_pending_blackout(&mut self) {
        if let Some(id) = self.pending_blackout.take() {
            self.tasks.cancel(id);
        }
    }

    fn poll_soon(&mut self) {
        self.next_poll = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        clock::ManualClock,
        config::{AppConfig, SettingsHandle},
        services::{
            notifications::testing::{Notice, RecordingSink},
            selection::seeded_random,
        },
        session::memory::{MemorySession, RoomHub},
        state::seeker::KEY_SEEKER,
    };

    use super::*;

    struct Participant {
        session: MemorySession,
        sink: Arc<RecordingSink>,
        coordinator: SeekerCoordinator,
    }

    struct Room {
        hub: Arc<RoomHub>,
        clock: ManualClock,
        settings: SettingsHandle,
        members: Vec<Participant>,
    }

    fn room(names: &[&str]) -> Room {
        let hub = RoomHub::new();
        let clock = ManualClock::new();
        let (settings, rx) = AppConfig::default().into_watch();

        let members = names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let session = hub.join(*name);
                let sink = Arc::new(RecordingSink::default());
                let coordinator = SeekerCoordinator::new(
                    rx.clone(),
                    Arc::new(session.clone()),
                    sink.clone(),
                    Arc::new(clock.clone()),
                    seeded_random(index as u64 + 11),
                );
                Participant {
                    session,
                    sink,
                    coordinator,
                }
            })
            .collect();

        Room {
            hub,
            clock,
            settings,
            members,
        }
    }

    impl Room {
        /// Replicate, then let every participant poll after the interval.
        fn settle(&mut self) {
            self.hub.replicate();
            self.clock.advance(Duration::from_millis(600));
            for member in &mut self.members {
                member.coordinator.tick();
            }
        }

        fn seeker(&self) -> Option<ParticipantId> {
            crate::state::seeker::decode_participant(self.hub.authoritative(KEY_SEEKER).as_ref())
        }
    }

    fn blackout() -> Notice {
        Notice::Blackout(Duration::from_secs(30), true)
    }

    fn announcement(name: &str) -> Notice {
        Notice::Announcement(name.into(), Duration::from_secs(10))
    }

    #[test]
    fn leader_selects_and_applies_immediately() {
        let mut room = room(&["Alice", "Bob", "Carol"]);
        let outcome = room.members[0].coordinator.begin_round();

        let RoundOutcome::Selected(chosen) = outcome else {
            panic!("expected a selection, got {outcome:?}");
        };
        assert_eq!(room.seeker(), Some(chosen));
        assert_eq!(room.members[0].coordinator.view().current_seeker(), Some(chosen));
    }

    #[test]
    fn every_participant_converges_on_the_same_seeker() {
        let mut room = room(&["Alice", "Bob", "Carol"]);
        let RoundOutcome::Selected(chosen) = room.members[0].coordinator.begin_round() else {
            panic!("leader did not select");
        };
        room.settle();
        room.clock.advance(Duration::from_millis(300));
        for member in &mut room.members {
            member.coordinator.tick();
        }

        for member in &room.members {
            assert_eq!(member.coordinator.view().current_seeker(), Some(chosen));
            let is_seeker = member.session.id() == chosen;
            assert_eq!(member.coordinator.view().is_local_seeker(), is_seeker);

            let notices = member.sink.take();
            if is_seeker {
                assert_eq!(notices, vec![blackout()]);
            } else {
                assert_eq!(notices.len(), 1);
                assert!(matches!(notices[0], Notice::Announcement(..)));
            }
        }
    }

    #[test]
    fn follower_applies_each_transition_once() {
        let mut room = room(&["Alice", "Bob", "Carol"]);
        let leader = room.members[0].session.clone();
        let bob = room.members[1].session.id();
        let carol = room.members[2].session.id();

        // Nothing stored yet: first poll observes "unset" silently.
        room.settle();
        assert!(room.members[1].sink.take().is_empty());

        SeekerAssignment::chosen(bob).write(&leader).unwrap();
        room.settle();
        assert!(room.members[1].coordinator.view().is_local_seeker());
        assert!(room.members[1].sink.take().is_empty(), "blackout waits for settle delay");
        room.clock.advance(Duration::from_millis(250));
        room.members[1].coordinator.tick();
        assert_eq!(room.members[1].sink.take(), vec![blackout()]);

        // Replaying the same value changes nothing.
        room.settle();
        room.settle();
        assert!(room.members[1].sink.take().is_empty());

        SeekerAssignment::chosen(carol).write(&leader).unwrap();
        room.settle();
        assert!(!room.members[1].coordinator.view().is_local_seeker());
        assert_eq!(room.members[1].sink.take(), vec![announcement("Carol")]);
    }

    #[test]
    fn losing_the_role_before_settling_cancels_the_blackout() {
        let mut room = room(&["Alice", "Bob", "Carol"]);
        room.settings
            .send_modify(|config| config.seeker.settle_delay_seconds = 2.0);
        let leader = room.members[0].session.clone();
        let bob = room.members[1].session.id();
        let carol = room.members[2].session.id();

        SeekerAssignment::chosen(bob).write(&leader).unwrap();
        room.settle();
        SeekerAssignment::chosen(carol).write(&leader).unwrap();
        room.settle();
        room.clock.advance(Duration::from_secs(3));
        room.members[1].coordinator.tick();

        assert_eq!(room.members[1].sink.take(), vec![announcement("Carol")]);
    }

    #[test]
    fn begin_round_reuses_an_existing_assignment() {
        let mut room = room(&["Alice", "Bob"]);
        let leader = room.members[0].session.clone();
        let bob = room.members[1].session.id();
        SeekerAssignment::chosen(bob).write(&leader).unwrap();

        let outcome = room.members[0].coordinator.begin_round();
        assert_eq!(outcome, RoundOutcome::Applied(Some(bob)));
        assert_eq!(room.members[0].sink.take(), vec![announcement("Bob")]);

        // A second call is a no-op for notifications.
        assert_eq!(
            room.members[0].coordinator.begin_round(),
            RoundOutcome::Applied(Some(bob))
        );
        assert!(room.members[0].sink.take().is_empty());
    }

    #[test]
    fn follower_begin_round_never_selects() {
        let mut room = room(&["Alice", "Bob"]);
        assert_eq!(
            room.members[1].coordinator.begin_round(),
            RoundOutcome::Applied(None)
        );
        assert_eq!(room.seeker(), None);
    }

    #[test]
    fn non_leader_reselect_never_writes() {
        let mut room = room(&["Alice", "Bob", "Carol"]);
        assert_eq!(
            room.members[2].coordinator.force_reselect(),
            RoundOutcome::NotLeader
        );
        assert_eq!(room.hub.authoritative(KEY_SEEKER), None);
    }

    #[test]
    fn forced_reselect_avoids_the_previous_seeker() {
        let mut room = room(&["Alice", "Bob", "Carol"]);
        assert!(matches!(
            room.members[0].coordinator.begin_round(),
            RoundOutcome::Selected(_)
        ));
        for _ in 0..20 {
            let previous = room.seeker();
            let RoundOutcome::Selected(next) = room.members[0].coordinator.force_reselect() else {
                panic!("reselect failed");
            };
            assert_ne!(Some(next), previous);
        }
        assert!(room.seeker().is_some());
    }

    #[test]
    fn selection_failure_is_retried_on_next_trigger() {
        let mut room = room(&["Alice", "Bob"]);
        room.members[0].session.set_store_fault(Some("link down"));
        assert_eq!(room.members[0].coordinator.begin_round(), RoundOutcome::Failed);
        assert_eq!(room.hub.authoritative(KEY_SEEKER), None);

        room.members[0].session.set_store_fault(None);
        assert!(matches!(
            room.members[0].coordinator.begin_round(),
            RoundOutcome::Selected(_)
        ));
    }

    #[test]
    fn disconnected_participant_does_nothing() {
        let mut room = room(&["Alice", "Bob"]);
        room.members[0].session.set_connected(false);
        assert_eq!(room.members[0].coordinator.begin_round(), RoundOutcome::NotReady);
        assert_eq!(room.members[0].coordinator.force_reselect(), RoundOutcome::NotReady);
    }

    #[test]
    fn unknown_seeker_gets_a_synthetic_label() {
        let mut room = room(&["Alice", "Bob"]);
        let leader = room.members[0].session.clone();
        SeekerAssignment::chosen(ParticipantId(9)).write(&leader).unwrap();
        room.settle();
        assert_eq!(room.members[1].sink.take(), vec![announcement("Player 9")]);
    }

    #[test]
    fn round_began_waits_for_the_auto_delay() {
        let mut room = room(&["Alice", "Bob"]);
        let began = RoundBegan {
            level: "Forest".into(),
            peer_count: 2,
        };
        assert_eq!(room.members[0].coordinator.round_began(&began), RoundOutcome::Scheduled);
        assert!(room.members[0].coordinator.round_pending());
        room.clock.advance(Duration::from_millis(999));
        room.members[0].coordinator.tick();
        assert_eq!(room.seeker(), None);

        room.clock.advance(Duration::from_millis(1));
        room.members[0].coordinator.tick();
        assert!(room.seeker().is_some());
        assert!(!room.members[0].coordinator.round_pending());
    }

    #[test]
    fn cancelled_round_start_never_selects() {
        let mut room = room(&["Alice", "Bob"]);
        let began = RoundBegan {
            level: "Forest".into(),
            peer_count: 2,
        };
        room.members[0].coordinator.round_began(&began);
        room.members[0].coordinator.cancel_pending_round();

        room.clock.advance(Duration::from_secs(5));
        room.members[0].coordinator.tick();
        assert_eq!(room.seeker(), None);
    }

    #[test]
    fn auto_select_disabled_only_applies() {
        let mut room = room(&["Alice", "Bob"]);
        room.settings
            .send_modify(|config| config.seeker.auto_select_on_join = false);
        let began = RoundBegan {
            level: "Forest".into(),
            peer_count: 2,
        };
        assert_eq!(
            room.members[0].coordinator.round_began(&began),
            RoundOutcome::Applied(None)
        );
        assert_eq!(room.seeker(), None);

        // Manual reselect still works for the leader.
        assert!(matches!(
            room.members[0].coordinator.force_reselect(),
            RoundOutcome::Selected(_)
        ));
    }
}
