//! Backlight ramping and the idle-timeout policy that decides when the
//! device counts as awake.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::DisplayConfig;

/// Moves the backlight toward the floor or the ceiling by a fixed step per
/// tick, never leaving `[floor, ceiling]`.
#[derive(Debug, Clone)]
pub struct BrightnessController {
    level: u8,
    floor: u8,
    step: u8,
}

impl BrightnessController {
    /// Starts dark, at `floor`.
    pub fn new(floor: u8, step: u8) -> Self {
        Self {
            level: floor,
            floor,
            step: step.max(1),
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self::new(config.min_brightness, config.brightness_step)
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn floor(&self) -> u8 {
        self.floor
    }

    /// Whether [`BrightnessController::step`] would still move the level.
    pub fn is_ramping(&self, is_active: bool, ceiling: u8) -> bool {
        self.clone().step(is_active, ceiling).1
    }

    /// One tick of the ramp. Returns the new level and whether it differs
    /// from the previous one.
    pub fn step(&mut self, is_active: bool, ceiling: u8) -> (u8, bool) {
        let ceiling = ceiling.max(self.floor);
        let previous = self.level;
        let next = if is_active && previous < ceiling {
            previous.saturating_add(self.step)
        } else if !is_active && previous > self.floor {
            previous.saturating_sub(self.step)
        } else {
            previous
        };
        self.level = next.clamp(self.floor, ceiling);
        (self.level, self.level != previous)
    }
}

/// Awake/asleep state of the device.
#[derive(Debug, Clone)]
pub struct Activity {
    active: bool,
    since: Instant,
    timeout: Duration,
}

impl Activity {
    /// Starts awake.
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self {
            active: true,
            since: now,
            timeout,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn since(&self) -> Instant {
        self.since
    }

    /// Marks the device awake and restarts the timeout. Returns whether the
    /// device was asleep.
    pub fn wake(&mut self, now: Instant) -> bool {
        let was_asleep = !self.active;
        self.active = true;
        self.since = now;
        if was_asleep {
            debug!("device woke up");
        }
        was_asleep
    }

    /// Restarts the timeout without waking the device.
    pub fn touch(&mut self, now: Instant) {
        self.since = now;
    }

    /// Applies the idle-timeout policy: an alive scene keeps the device
    /// awake, and it only falls asleep once the timeout has passed with no
    /// animation in flight. Returns `true` when the state flipped.
    pub fn check_timeout(&mut self, now: Instant, scene_alive: bool) -> bool {
        if !self.active {
            return scene_alive && self.wake(now);
        }
        if !scene_alive && now.saturating_duration_since(self.since) > self.timeout {
            debug!("device went idle");
            self.active = false;
            return true;
        }
        false
    }
}
