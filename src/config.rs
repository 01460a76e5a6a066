//! Application-level configuration loading and the runtime settings channel.

use std::{env, fs, io::ErrorKind, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use validator::Validate;

use crate::error::ConfigError;

/// Default location on disk where the simulator looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/hide_seek.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "HIDE_SEEK_CONFIG_PATH";

/// Receiving half of the settings channel handed to every component.
pub type SettingsWatch = watch::Receiver<AppConfig>;
/// Sending half used to adjust options while the session runs.
pub type SettingsHandle = watch::Sender<AppConfig>;

/// Full option set consumed by the gate, the coordinator and the runtime driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// Blackout applied to the seeker.
    #[validate(nested)]
    pub blindness: BlindnessConfig,
    /// Seeker coordination options.
    #[validate(nested)]
    pub seeker: SeekerConfig,
    /// Round-readiness detection options.
    #[validate(nested)]
    pub gate: GateConfig,
    /// Debug helpers and loop cadence.
    #[validate(nested)]
    pub debug: DebugConfig,
}

/// How long and how the seeker is blinded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BlindnessConfig {
    /// Blackout length in seconds.
    #[validate(range(min = 1, max = 3600))]
    pub duration_seconds: u32,
    /// Keep the HUD layer visible while the world is blacked out.
    pub keep_ui_visible: bool,
}

impl Default for BlindnessConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 30,
            keep_ui_visible: true,
        }
    }
}

impl BlindnessConfig {
    /// Blackout duration, never shorter than one second.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_seconds.max(1)))
    }
}

/// Options for the seeker coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SeekerConfig {
    /// Create the coordinator at all.
    pub enabled: bool,
    /// Let the leader pick a seeker automatically when a round begins.
    pub auto_select_on_join: bool,
    /// Delay between the round-began event and the automatic pick.
    #[validate(range(min = 0.0, max = 60.0))]
    pub auto_delay_seconds: f64,
    /// Key binding the input layer maps to a forced re-roll.
    pub force_reselect_hotkey: String,
    /// Raise the default log level to debug.
    pub verbose_logs: bool,
    /// Cadence of the replicated store poll.
    #[validate(range(min = 0.05, max = 30.0))]
    pub poll_interval_seconds: f64,
    /// Pause before the blackout engages so camera and HUD state settle.
    #[validate(range(min = 0.0, max = 10.0))]
    pub settle_delay_seconds: f64,
    /// How long the "X is the seeker" banner stays up.
    #[validate(range(min = 0.5, max = 120.0))]
    pub announcement_seconds: f64,
}

impl Default for SeekerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_select_on_join: true,
            auto_delay_seconds: 1.0,
            force_reselect_hotkey: "LeftAlt+R".into(),
            verbose_logs: false,
            poll_interval_seconds: 0.5,
            settle_delay_seconds: 0.25,
            announcement_seconds: 10.0,
        }
    }
}

impl SeekerConfig {
    /// Delay before an automatic pick.
    pub fn auto_delay(&self) -> Duration {
        seconds(self.auto_delay_seconds)
    }

    /// Interval between two store polls.
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds)
    }

    /// Delay between becoming seeker and the blackout engaging.
    pub fn settle_delay(&self) -> Duration {
        seconds(self.settle_delay_seconds)
    }

    /// Display time of the seeker announcement.
    pub fn announcement(&self) -> Duration {
        seconds(self.announcement_seconds.max(0.5))
    }
}

/// Options for the round-readiness gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GateConfig {
    /// Evaluate the gate at all.
    pub enabled: bool,
    /// Scene that must be active during gameplay.
    pub required_scene: String,
    /// Text preceding the level name in the level-change log line.
    #[validate(length(min = 1))]
    pub level_prefix: String,
    /// Levels whose name contains this token never start a round.
    pub level_exclude: String,
    /// Peers required in the room.
    pub min_players: usize,
    /// Consecutive passing ticks required before firing.
    pub stable_ticks: u32,
    /// Time the conditions must hold after first passing.
    #[validate(range(min = 0.0, max = 60.0))]
    pub extra_delay_seconds: f64,
    /// Hold after the level log line, covering the intro cinematic.
    #[validate(range(min = 0.0, max = 120.0))]
    pub cinematic_hold_seconds: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required_scene: "Main".into(),
            level_prefix: "Level - ".into(),
            level_exclude: "Lobby".into(),
            min_players: 2,
            stable_ticks: 15,
            extra_delay_seconds: 0.35,
            cinematic_hold_seconds: 7.0,
        }
    }
}

impl GateConfig {
    /// Minimum peer count, at least one.
    pub fn min_players(&self) -> usize {
        self.min_players.max(1)
    }

    /// Stable tick threshold, at least one.
    pub fn stable_ticks(&self) -> u32 {
        self.stable_ticks.max(1)
    }

    /// Extra delay after readiness.
    pub fn extra_delay(&self) -> Duration {
        seconds(self.extra_delay_seconds)
    }

    /// Cinematic hold after level detection.
    pub fn cinematic_hold(&self) -> Duration {
        seconds(self.cinematic_hold_seconds)
    }
}

/// Debug helpers and driver cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DebugConfig {
    /// Fire one local test blackout this many seconds after start (0 disables).
    pub auto_trigger_after_seconds: u32,
    /// Interval of the driver heartbeat log.
    #[validate(range(min = 1))]
    pub heartbeat_seconds: u32,
    /// Gate tick cadence in milliseconds.
    #[validate(range(min = 1, max = 1000))]
    pub tick_interval_ms: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            auto_trigger_after_seconds: 0,
            heartbeat_seconds: 10,
            tick_interval_ms: 16,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match Self::load_from(&path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded configuration");
                config
            }
            Err(ConfigError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Read, parse and validate a configuration file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Publish this configuration on a fresh settings channel.
    pub fn into_watch(self) -> (SettingsHandle, SettingsWatch) {
        watch::channel(self)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
