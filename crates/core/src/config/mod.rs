use std::{collections::HashSet, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{HubError, Result};

/// Top-level configuration structure for the hub.
///
/// Every section falls back to its defaults when missing, so partial JSON
/// documents deserialise cleanly. Call [`HubConfig::validate`] before use;
/// [`Hub::new`](crate::Hub::new) does so once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub display: DisplayConfig,
    pub render: RenderConfig,
    pub scenes: SceneConfig,
    pub buttons: ButtonConfig,
    /// Directory for transient assets such as downloaded album art.
    pub cache_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            render: RenderConfig::default(),
            scenes: SceneConfig::default(),
            buttons: ButtonConfig::default(),
            cache_dir: std::env::temp_dir().join("speaker-hub"),
        }
    }
}

impl HubConfig {
    /// Defaults with intro and outro disabled, useful for tests and quick
    /// headless runs.
    pub fn without_transitions() -> Self {
        Self {
            scenes: SceneConfig {
                intro: false,
                outro: false,
            },
            ..Self::default()
        }
    }

    /// Checks every recognised option once; the hub never re-validates.
    pub fn validate(&self) -> Result<()> {
        self.display.validate()?;
        self.render.validate()?;
        self.buttons.validate()?;
        Ok(())
    }
}

/// Panel geometry, idle timeout and backlight limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Seconds of inactivity before the backlight dims.
    pub timeout_secs: f32,
    pub min_brightness: u8,
    pub max_brightness: u8,
    /// Backlight change applied per tick while ramping.
    pub brightness_step: u8,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 240,
            height: 240,
            timeout_secs: 8.0,
            min_brightness: 0,
            max_brightness: 80,
            brightness_step: 10,
        }
    }
}

impl DisplayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.timeout_secs).unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(HubError::Config(format!(
                "display size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        positive_secs("display.timeout_secs", self.timeout_secs)?;
        if self.max_brightness > 100 {
            return Err(HubError::Config(format!(
                "display.max_brightness {} exceeds 100",
                self.max_brightness
            )));
        }
        if self.min_brightness > self.max_brightness {
            return Err(HubError::Config(format!(
                "display.min_brightness {} is above max_brightness {}",
                self.min_brightness, self.max_brightness
            )));
        }
        if self.brightness_step == 0 {
            return Err(HubError::Config(
                "display.brightness_step must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Render loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Target tick rate of the render loop.
    pub fps: u32,
    /// While the device is active a frame is pushed at least this often.
    pub update_interval_secs: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            update_interval_secs: 1.0,
        }
    }
}

impl RenderConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::try_from_secs_f32(self.update_interval_secs).unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(HubError::Config("render.fps must be at least 1".into()));
        }
        positive_secs("render.update_interval_secs", self.update_interval_secs)?;
        Ok(())
    }
}

/// Accepts a positive number of seconds that fits in a [`Duration`].
fn positive_secs(name: &str, secs: f32) -> Result<Duration> {
    match Duration::try_from_secs_f32(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(HubError::Config(format!(
            "{name} must be a positive number of seconds, got {secs}"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub intro: bool,
    pub outro: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            intro: true,
            outro: true,
        }
    }
}

/// GPIO pin assignment for the four front buttons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    pub pin_play: u8,
    pub pin_next: u8,
    pub pin_volume_down: u8,
    pub pin_volume_up: u8,
    pub debounce_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin_play: 6,
            pin_next: 24,
            pin_volume_down: 5,
            pin_volume_up: 16,
            debounce_ms: 500,
        }
    }
}

impl ButtonConfig {
    /// Shortest debounce window accepted by [`HubConfig::validate`].
    pub const MIN_DEBOUNCE_MS: u64 = 500;

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.debounce_ms < Self::MIN_DEBOUNCE_MS {
            return Err(HubError::Config(format!(
                "buttons.debounce_ms {} is below the {} ms minimum",
                self.debounce_ms,
                Self::MIN_DEBOUNCE_MS
            )));
        }
        let pins = [
            self.pin_play,
            self.pin_next,
            self.pin_volume_down,
            self.pin_volume_up,
        ];
        let unique: HashSet<u8> = pins.iter().copied().collect();
        if unique.len() != pins.len() {
            return Err(HubError::Config(format!(
                "button pins {pins:?} must be distinct"
            )));
        }
        Ok(())
    }
}
