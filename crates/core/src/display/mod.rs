use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{HubError, Result};

/// Panel driver the hub pushes finished frames to. Resolution is fixed at
/// construction.
pub trait DisplaySink: Send {
    fn size(&self) -> (u32, u32);
    fn start(&mut self) -> Result<()>;
    fn push_frame(&mut self, frame: &RgbaImage) -> Result<()>;
    /// Backlight duty cycle in `[0, 100]`.
    fn set_backlight(&mut self, level: u8) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Where and how often a headless display keeps frames on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub dir: PathBuf,
    /// Keep every n-th pushed frame.
    pub every: u32,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frames"),
            every: 30,
        }
    }
}

#[derive(Debug, Default)]
struct HeadlessState {
    started: bool,
    stopped: bool,
    frames_pushed: u64,
    last_frame: Option<RgbaImage>,
    backlight: u8,
    backlight_changes: usize,
    fail_pushes: bool,
    snapshots_written: usize,
}

/// Display sink without hardware. Keeps the last frame and backlight level
/// in memory and can write PNG snapshots.
#[derive(Debug)]
pub struct HeadlessDisplay {
    width: u32,
    height: u32,
    snapshots: Option<SnapshotSettings>,
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            snapshots: None,
            state: Arc::new(Mutex::new(HeadlessState::default())),
        }
    }

    pub fn with_snapshots(mut self, settings: SnapshotSettings) -> Self {
        self.snapshots = Some(settings);
        self
    }

    /// Handle for inspecting the display after it moved into the hub.
    pub fn probe(&self) -> DisplayProbe {
        DisplayProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, HeadlessState>> {
        self.state
            .lock()
            .map_err(|_| HubError::Poisoned("headless display"))
    }
}

impl DisplaySink for HeadlessDisplay {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn start(&mut self) -> Result<()> {
        if let Some(settings) = &self.snapshots {
            if settings.every == 0 {
                return Err(HubError::Display("snapshot interval must be positive".into()));
            }
            fs::create_dir_all(&settings.dir)?;
        }
        let mut state = self.state()?;
        state.started = true;
        state.stopped = false;
        info!(width = self.width, height = self.height, "headless display started");
        Ok(())
    }

    fn push_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let mut state = self.state()?;
        if !state.started || state.stopped {
            return Err(HubError::Display("display is not running".into()));
        }
        if state.fail_pushes {
            return Err(HubError::Display("frame transfer failed".into()));
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(HubError::Display(format!(
                "frame is {}x{}, panel is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        state.frames_pushed += 1;
        if let Some(settings) = &self.snapshots {
            if state.frames_pushed % u64::from(settings.every) == 0 {
                let path = settings.dir.join(format!("frame_{:06}.png", state.frames_pushed));
                frame.save(&path)?;
                state.snapshots_written += 1;
                debug!(path = %path.display(), "snapshot written");
            }
        }
        state.last_frame = Some(frame.clone());
        Ok(())
    }

    fn set_backlight(&mut self, level: u8) -> Result<()> {
        let mut state = self.state()?;
        state.backlight = level.min(100);
        state.backlight_changes += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state()?;
        state.stopped = true;
        info!(frames = state.frames_pushed, "headless display stopped");
        Ok(())
    }
}

/// Shared view of a [`HeadlessDisplay`]'s state.
#[derive(Debug, Clone)]
pub struct DisplayProbe {
    state: Arc<Mutex<HeadlessState>>,
}

impl DisplayProbe {
    fn read<T>(&self, f: impl FnOnce(&HeadlessState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    pub fn frames_pushed(&self) -> u64 {
        self.read(|state| state.frames_pushed)
    }

    pub fn last_frame(&self) -> Option<RgbaImage> {
        self.read(|state| state.last_frame.clone())
    }

    pub fn backlight(&self) -> u8 {
        self.read(|state| state.backlight)
    }

    pub fn backlight_changes(&self) -> usize {
        self.read(|state| state.backlight_changes)
    }

    pub fn is_started(&self) -> bool {
        self.read(|state| state.started)
    }

    pub fn is_stopped(&self) -> bool {
        self.read(|state| state.stopped)
    }

    pub fn snapshots_written(&self) -> usize {
        self.read(|state| state.snapshots_written)
    }

    /// Makes every following push fail until reset.
    pub fn fail_pushes(&self, fail: bool) {
        match self.state.lock() {
            Ok(mut state) => state.fail_pushes = fail,
            Err(poisoned) => poisoned.into_inner().fail_pushes = fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{self, BLACK};

    #[test]
    fn refuses_frames_before_start_and_after_stop() {
        let mut display = HeadlessDisplay::new(4, 4);
        let frame = draw::filled(4, 4, BLACK);
        assert!(display.push_frame(&frame).is_err());

        display.start().unwrap();
        display.push_frame(&frame).unwrap();
        display.stop().unwrap();
        assert!(display.push_frame(&frame).is_err());
        assert_eq!(display.probe().frames_pushed(), 1);
    }

    #[test]
    fn rejects_wrong_sized_frames() {
        let mut display = HeadlessDisplay::new(4, 4);
        display.start().unwrap();
        assert!(matches!(
            display.push_frame(&draw::filled(2, 2, BLACK)),
            Err(HubError::Display(_))
        ));
    }

    #[test]
    fn injected_failures_are_reported_and_cleared() {
        let mut display = HeadlessDisplay::new(4, 4);
        let probe = display.probe();
        display.start().unwrap();
        probe.fail_pushes(true);
        assert!(display.push_frame(&draw::filled(4, 4, BLACK)).is_err());
        probe.fail_pushes(false);
        assert!(display.push_frame(&draw::filled(4, 4, BLACK)).is_ok());
        assert!(probe.last_frame().is_some());
    }

    #[test]
    fn writes_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = HeadlessDisplay::new(4, 4).with_snapshots(SnapshotSettings {
            dir: dir.path().join("frames"),
            every: 2,
        });
        display.start().unwrap();
        for _ in 0..5 {
            display.push_frame(&draw::filled(4, 4, BLACK)).unwrap();
        }
        assert_eq!(display.probe().snapshots_written(), 2);
        assert!(dir.path().join("frames/frame_000004.png").exists());
        display.set_backlight(150).unwrap();
        assert_eq!(display.probe().backlight(), 100);
    }
}
