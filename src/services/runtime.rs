//! Per-participant runtime driver.
//!
//! Owns the gate and the coordinator and drives both from one fixed-cadence
//! loop, alongside the host log feed and manual commands. All state changes
//! happen inside [`RuntimeDriver::step`] or the `handle_*` methods, one at a time.

use std::{future::Future, sync::Arc, time::Duration, time::Instant};

use tokio::{
    sync::{broadcast, mpsc},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::SettingsWatch,
    services::{
        coordinator::{RoundOutcome, SeekerCoordinator},
        notifications::{LogOverlay, NotificationSink},
        selection::RandomSource,
    },
    session::SessionLayer,
    state::gate::{RoundBegan, RoundGate},
};

/// Manual triggers delivered by the host's input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    /// Re-roll the seeker (leader only).
    ForceReselect,
    /// Black out the local screen without touching the room.
    TestBlackout,
}

/// Drives one participant's gate and coordinator.
pub struct RuntimeDriver {
    settings: SettingsWatch,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    gate: RoundGate,
    coordinator: Option<SeekerCoordinator>,
    overlay: Option<Arc<LogOverlay>>,
    next_heartbeat: Instant,
    auto_trigger_at: Option<Instant>,
}

impl RuntimeDriver {
    /// Wire the gate and, when enabled, the coordinator for one participant.
    pub fn new(
        settings: SettingsWatch,
        session: Arc<dyn SessionLayer>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        let config = settings.borrow().clone();
        let now = clock.now();

        let gate = RoundGate::new(settings.clone(), session.clone(), clock.clone());
        let coordinator = config.seeker.enabled.then(|| {
            SeekerCoordinator::new(
                settings.clone(),
                session.clone(),
                sink.clone(),
                clock.clone(),
                rng,
            )
        });
        let auto_trigger_at = (config.debug.auto_trigger_after_seconds > 0).then(|| {
            now + Duration::from_secs(u64::from(config.debug.auto_trigger_after_seconds))
        });

        Self {
            settings,
            clock,
            sink,
            gate,
            coordinator,
            overlay: None,
            next_heartbeat: now,
            auto_trigger_at,
        }
    }

    /// Expire overlay elements on every step.
    pub fn with_overlay(mut self, overlay: Arc<LogOverlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Round gate owned by this driver.
    pub fn gate(&self) -> &RoundGate {
        &self.gate
    }

    /// Coordinator owned by this driver, absent when the seeker system is off.
    pub fn coordinator(&self) -> Option<&SeekerCoordinator> {
        self.coordinator.as_ref()
    }

    /// Feed one host log line to the gate.
    pub fn handle_log_line(&mut self, line: &str) {
        if self.gate.observe_log_line(line).is_some() {
            if let Some(coordinator) = self.coordinator.as_mut() {
                coordinator.cancel_pending_round();
            }
        }
    }

    /// Execute a manual trigger.
    pub fn handle_command(&mut self, command: DriverCommand) -> Option<RoundOutcome> {
        match command {
            DriverCommand::ForceReselect => {
                let Some(coordinator) = self.coordinator.as_mut() else {
                    info!("force reselect ignored (seeker system disabled)");
                    return None;
                };
                Some(coordinator.force_reselect())
            }
            DriverCommand::TestBlackout => {
                self.test_blackout();
                None
            }
        }
    }

    /// One pass of the polling loop.
    pub fn step(&mut self) -> Option<RoundBegan> {
        let now = self.clock.now();

        let began = self.gate.tick();
        if let Some(began) = &began {
            match self.coordinator.as_mut() {
                Some(coordinator) => {
                    let outcome = coordinator.round_began(began);
                    debug!(level = %began.level, outcome = ?outcome, "round began");
                }
                None => info!(level = %began.level, "round began; seeker system disabled"),
            }
        }

        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.tick();
        }
        if let Some(overlay) = &self.overlay {
            overlay.tick();
        }

        if self.auto_trigger_at.is_some_and(|at| now >= at) {
            self.auto_trigger_at = None;
            info!("auto trigger elapsed; engaging test blackout");
            self.test_blackout();
        }

        if now >= self.next_heartbeat {
            let every = self.settings.borrow().debug.heartbeat_seconds.max(1);
            self.next_heartbeat = now + Duration::from_secs(u64::from(every));
            debug!(
                level = ?self.gate.detected_level(),
                seeker = ?self.coordinator.as_ref().and_then(|c| c.view().current_seeker()),
                "runtime driver heartbeat"
            );
        }

        began
    }

    /// Run until `shutdown` resolves.
    pub async fn run(
        mut self,
        mut logs: broadcast::Receiver<String>,
        mut commands: mpsc::Receiver<DriverCommand>,
        shutdown: impl Future<Output = ()>,
    ) {
        let period = Duration::from_millis(self.settings.borrow().debug.tick_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut logs_open = true;
        let mut commands_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.step();
                }
                line = logs.recv(), if logs_open => match line {
                    Ok(line) => self.handle_log_line(&line),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "log feed lagged; some lines were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("log feed closed");
                        logs_open = false;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        self.handle_command(command);
                    }
                    None => commands_open = false,
                },
            }
        }

        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.reset();
        }
        info!("runtime driver stopped");
    }

    fn test_blackout(&self) {
        let blindness = self.settings.borrow().blindness.clone();
        self.sink
            .on_became_seeker(blindness.duration(), blindness.keep_ui_visible);
    }
}
