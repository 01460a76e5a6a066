use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use tracing::info;

use crate::clock::Clock;

const MIN_BLACKOUT: Duration = Duration::from_secs(1);
const MIN_BANNER: Duration = Duration::from_millis(500);

/// Consumer of seeker notifications, usually the host's overlay layer.
pub trait NotificationSink: Send + Sync {
    /// The local participant is the seeker: black out the world.
    fn on_became_seeker(&self, duration: Duration, keep_overlay_visible: bool);
    /// Somebody else is the seeker: show a timed banner.
    fn on_other_became_seeker(&self, display_name: &str, duration: Duration);
}

/// Banner text shown to hiders.
pub fn announcement_text(display_name: &str) -> String {
    format!("{display_name} is the seeker! Go hide!")
}

#[derive(Debug, Default)]
struct OverlayState {
    blackout_until: Option<Instant>,
    keep_ui_visible: bool,
    banner: Option<(String, Instant)>,
}

/// Overlay model that logs what a renderer would draw and tracks how long each
/// element stays up.
pub struct LogOverlay {
    clock: Arc<dyn Clock>,
    state: Mutex<OverlayState>,
}

impl LogOverlay {
    /// Build an overlay with nothing showing.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(OverlayState::default()),
        }
    }

    /// Expire elements whose time is up.
    pub fn tick(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.blackout_until.is_some_and(|until| now >= until) {
            state.blackout_until = None;
            info!("blindness disabled");
        }
        if state.banner.as_ref().is_some_and(|(_, until)| now >= *until) {
            state.banner = None;
        }
    }

    /// Time left on the blackout, zero when inactive.
    pub fn blackout_remaining(&self) -> Duration {
        let now = self.clock.now();
        self.lock()
            .blackout_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }

    /// Whether the blackout is showing.
    pub fn is_blacked_out(&self) -> bool {
        self.blackout_remaining() > Duration::ZERO
    }

    /// Whether the HUD layer is drawn. Only a blackout without the
    /// keep-visible option hides it.
    pub fn hud_visible(&self) -> bool {
        let keep = self.lock().keep_ui_visible;
        keep || !self.is_blacked_out()
    }

    /// Banner currently showing.
    pub fn banner(&self) -> Option<String> {
        let now = self.clock.now();
        self.lock()
            .banner
            .as_ref()
            .filter(|(_, until)| now < *until)
            .map(|(text, _)| text.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OverlayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSink for LogOverlay {
    fn on_became_seeker(&self, duration: Duration, keep_overlay_visible: bool) {
        let duration = duration.max(MIN_BLACKOUT);
        let mut state = self.lock();
        state.blackout_until = Some(self.clock.now() + duration);
        state.keep_ui_visible = keep_overlay_visible;
        info!(
            seconds = duration.as_secs_f64(),
            keep_ui = keep_overlay_visible,
            "blindness enabled"
        );
    }

    fn on_other_became_seeker(&self, display_name: &str, duration: Duration) {
        let duration = duration.max(MIN_BANNER);
        let text = announcement_text(display_name);
        info!(banner = %text, seconds = duration.as_secs_f64(), "announcement shown");
        self.lock().banner = Some((text, self.clock.now() + duration));
    }
}


#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;

    use super::*;

    #[test]
    fn blackout_expires_after_its_duration() {
        let clock = ManualClock::new();
        let overlay = LogOverlay::new(Arc::new(clock.clone()));

        overlay.on_became_seeker(Duration::from_secs(30), true);
        assert!(overlay.is_blacked_out());

        clock.advance(Duration::from_secs(29));
        overlay.tick();
        assert_eq!(overlay.blackout_remaining(), Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        overlay.tick();
        assert!(!overlay.is_blacked_out());
    }

    #[test]
    fn hud_follows_the_keep_visible_option() {
        let clock = ManualClock::new();
        let overlay = LogOverlay::new(Arc::new(clock.clone()));
        assert!(overlay.hud_visible());

        overlay.on_became_seeker(Duration::from_secs(5), false);
        assert!(!overlay.hud_visible());

        overlay.on_became_seeker(Duration::from_secs(5), true);
        assert!(overlay.hud_visible());

        overlay.on_became_seeker(Duration::from_secs(5), false);
        clock.advance(Duration::from_secs(5));
        overlay.tick();
        assert!(overlay.hud_visible());
    }

    #[test]
    fn zero_length_blackout_still_lasts_a_second() {
        let clock = ManualClock::new();
        let overlay = LogOverlay::new(Arc::new(clock.clone()));
        overlay.on_became_seeker(Duration::ZERO, false);
        assert_eq!(overlay.blackout_remaining(), Duration::from_secs(1));
    }

    #[test]
    fn newest_banner_replaces_the_old_one() {
        let clock = ManualClock::new();
        let overlay = LogOverlay::new(Arc::new(clock.clone()));

        overlay.on_other_became_seeker("Bob", Duration::from_secs(10));
        overlay.on_other_became_seeker("Carol", Duration::from_secs(10));
        assert_eq!(
            overlay.banner().as_deref(),
            Some("Carol is the seeker! Go hide!")
        );

        clock.advance(Duration::from_secs(10));
        overlay.tick();
        assert_eq!(overlay.banner(), None);
    }
}
