//! Round-readiness gate.
//!
//! Fuses the active scene, the level-change log line, the session roster and
//! elapsed time into a single edge: "the round for this level has begun". The
//! gate is polled once per frame; it fires at most once per detected level for
//! each entry into the required scene.

use std::{sync::Arc, time::Instant};

use tracing::{debug, info};

use crate::{
    clock::Clock,
    config::{GateConfig, SettingsWatch},
    session::SessionLayer,
};

/// Phrase the host logs whenever it switches level.
pub const LEVEL_CHANGE_MARKER: &str = "Changed level to:";

/// Extract the level name from a host log line.
///
/// Matching is a case-insensitive substring search for [`LEVEL_CHANGE_MARKER`]
/// and `prefix`; the name is whatever follows the prefix up to the first line
/// break. Lines that do not match, or that yield an empty name, return `None`.
pub fn parse_level_change(line: &str, prefix: &str) -> Option<String> {
    if line.is_empty() || prefix.is_empty() {
        return None;
    }
    // ASCII lowering keeps byte offsets aligned with `line`.
    let lowered = line.to_ascii_lowercase();
    if !lowered.contains(&LEVEL_CHANGE_MARKER.to_ascii_lowercase()) {
        return None;
    }
    let start = lowered.find(&prefix.to_ascii_lowercase())? + prefix.len();

    let rest = line[start..].trim();
    let name = match rest.find(['\r', '\n']) {
        Some(cut) => rest[..cut].trim(),
        None => rest,
    };
    (!name.is_empty()).then(|| name.to_owned())
}

/// Signals sampled on a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSignal {
    /// Scene currently loaded.
    pub active_scene_name: String,
    /// Level name taken from the last level-change log line.
    pub detected_level_name: Option<String>,
    /// When that line was observed.
    pub detected_at: Option<Instant>,
    /// Peers in the room, local participant included.
    pub peer_count: usize,
    /// Connected and inside an active room.
    pub room_ready: bool,
}

/// Debounce bookkeeping for the current round attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateState {
    /// Consecutive ticks on which every condition held.
    pub stable_ticks: u32,
    /// First tick of the current passing streak.
    pub ready_since: Option<Instant>,
    /// Set once the gate fired for the detected level.
    pub fired_for_this_level: bool,
}

impl GateState {
    fn reset_debounce(&mut self) {
        self.stable_ticks = 0;
        self.ready_since = None;
    }
}

/// Emitted exactly once per detected level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundBegan {
    /// Level the round takes place in.
    pub level: String,
    /// Peers present when the gate fired.
    pub peer_count: usize,
}

/// Returned by [`RoundGate::observe_log_line`] when a level change was recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDetected {
    /// Extracted level name.
    pub level: String,
}

/// Condition that held the gate closed on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// Active scene differs from the required one.
    WrongScene,
    /// No level-change line seen yet.
    NoLevel,
    /// Detected level contains the exclusion token.
    ExcludedLevel,
    /// Session not connected or not in a room.
    SessionNotReady,
    /// Not enough peers.
    TooFewPeers {
        /// Peers present.
        have: usize,
        /// Peers required.
        need: usize,
    },
    /// Still inside the cinematic hold.
    CinematicHold,
    /// Conditions hold but the debounce has not elapsed.
    Settling,
}

/// Outcome of one gate tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Gate disabled or already fired for this level.
    Idle,
    /// Gate still closed.
    Waiting(Blocked),
    /// The round began on this tick.
    Fired(RoundBegan),
}

#[derive(Debug, Clone)]
struct Detection {
    level: String,
    at: Instant,
}

/// Debounced multi-signal detector for the start of a round.
pub struct RoundGate {
    settings: SettingsWatch,
    session: Arc<dyn SessionLayer>,
    clock: Arc<dyn Clock>,
    state: GateState,
    last_scene: String,
    detection: Option<Detection>,
}

impl RoundGate {
    /// Build a gate reading live options from `settings`.
    pub fn new(
        settings: SettingsWatch,
        session: Arc<dyn SessionLayer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("round gate created");
        Self {
            settings,
            session,
            clock,
            state: GateState::default(),
            last_scene: String::new(),
            detection: None,
        }
    }

    /// Debounce bookkeeping, for inspection.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Level currently tracked by the gate.
    pub fn detected_level(&self) -> Option<&str> {
        self.detection.as_ref().map(|detection| detection.level.as_str())
    }

    /// Feed one line of the host log.
    ///
    /// A recognised level change always reopens the gate: the detection is
    /// replaced, the debounce restarts and the fired flag is cleared.
    pub fn observe_log_line(&mut self, line: &str) -> Option<LevelDetected> {
        let prefix = self.settings.borrow().gate.level_prefix.clone();
        let level = parse_level_change(line, &prefix)?;

        self.detection = Some(Detection {
            level: level.clone(),
            at: self.clock.now(),
        });
        self.state = GateState::default();
        info!(level = %level, "detected level from log");

        Some(LevelDetected { level })
    }

    /// Sample the session and evaluate the gate once.
    pub fn tick(&mut self) -> Option<RoundBegan> {
        match self.poll() {
            GateVerdict::Fired(began) => Some(began),
            _ => None,
        }
    }

    /// Like [`RoundGate::tick`] but reports why the gate stayed closed.
    pub fn poll(&mut self) -> GateVerdict {
        let config = self.settings.borrow().gate.clone();
        if !config.enabled {
            return GateVerdict::Idle;
        }

        let signal = self.sample();
        let now = self.clock.now();
        self.evaluate(&config, &signal, now)
    }

    fn sample(&self) -> RoundSignal {
        let room_ready = self.session.is_ready();
        RoundSignal {
            active_scene_name: self.session.active_scene_name(),
            detected_level_name: self.detection.as_ref().map(|d| d.level.clone()),
            detected_at: self.detection.as_ref().map(|d| d.at),
            peer_count: if room_ready {
                self.session.peers().len()
            } else {
                0
            },
            room_ready,
        }
    }

    fn evaluate(&mut self, config: &GateConfig, signal: &RoundSignal, now: Instant) -> GateVerdict {
        if signal.active_scene_name != self.last_scene {
            info!(scene = %signal.active_scene_name, "scene changed");
            self.last_scene.clone_from(&signal.active_scene_name);
            // The detection survives: the level line can precede the scene load.
            self.state = GateState::default();
        }

        if self.state.fired_for_this_level {
            return GateVerdict::Idle;
        }

        if let Err(blocked) = check_conditions(config, signal, now) {
            if self.state.stable_ticks > 0 {
                debug!(reason = ?blocked, "readiness streak broken");
            }
            self.state.reset_debounce();
            return GateVerdict::Waiting(blocked);
        }

        self.state.stable_ticks = self.state.stable_ticks.saturating_add(1);
        let ready_since = *self.state.ready_since.get_or_insert(now);

        let settled = now.saturating_duration_since(ready_since) >= config.extra_delay();
        if self.state.stable_ticks < config.stable_ticks() || !settled {
            return GateVerdict::Waiting(Blocked::Settling);
        }

        self.state.fired_for_this_level = true;
        let level = signal.detected_level_name.clone().unwrap_or_default();
        info!(
            scene = %signal.active_scene_name,
            level = %level,
            players = signal.peer_count,
            "round ready; beginning round"
        );
        GateVerdict::Fired(RoundBegan {
            level,
            peer_count: signal.peer_count,
        })
    }
}

fn check_conditions(config: &GateConfig, signal: &RoundSignal, now: Instant) -> Result<(), Blocked> {
    if !signal
        .active_scene_name
        .eq_ignore_ascii_case(&config.required_scene)
    {
        return Err(Blocked::WrongScene);
    }

    let (Some(level), Some(detected_at)) = (&signal.detected_level_name, signal.detected_at) else {
        return Err(Blocked::NoLevel);
    };
    if contains_ignore_case(level, &config.level_exclude) {
        return Err(Blocked::ExcludedLevel);
    }

    if !signal.room_ready {
        return Err(Blocked::SessionNotReady);
    }
    let need = config.min_players();
    if signal.peer_count < need {
        return Err(Blocked::TooFewPeers {
            have: signal.peer_count,
            need,
        });
    }

    if now.saturating_duration_since(detected_at) < config.cinematic_hold() {
        return Err(Blocked::CinematicHold);
    }

    Ok(())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    !needle.is_empty()
        && haystack
            .to_lowercase()
            .contains(needle.to_lowercase().as_str())
}
