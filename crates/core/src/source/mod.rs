use std::{
    fmt,
    path::PathBuf,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{audio::AudioEvent, Result};

/// Default interval between availability probes of one source.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Stable handle of a registered source; equals its registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub usize);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of wireless audio source feeding the speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Bluetooth,
    #[serde(rename = "airplay")]
    AirPlay,
    Snapcast,
    Other,
}

impl SourceKind {
    /// Rank used by arbitration; lower wins.
    pub fn default_priority(self) -> u32 {
        match self {
            SourceKind::Bluetooth => 50,
            SourceKind::AirPlay | SourceKind::Snapcast | SourceKind::Other => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Bluetooth => "Bluetooth",
            SourceKind::AirPlay => "AirPlay",
            SourceKind::Snapcast => "Snapcast",
            SourceKind::Other => "Audio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Transport metadata reported by a source backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceInfo {
    pub status: PlaybackStatus,
    pub position_secs: Option<f32>,
    pub duration_secs: Option<f32>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    /// Image file holding the cover of the current track.
    pub album_art: Option<PathBuf>,
    pub volume: Option<u8>,
}

impl SourceInfo {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    /// Playback progress in `[0, 1]` when both position and duration are known.
    pub fn progress(&self) -> Option<f32> {
        match (self.position_secs, self.duration_secs) {
            (Some(position), Some(duration)) if duration > 0.0 => {
                Some((position / duration).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

/// Metadata and transport control for one source (Bluetooth media player,
/// AirPlay remote, ...). Every call may fail; the hub treats failures as
/// transient.
pub trait SourceBackend: Send {
    /// Whether the source is currently connected and routing audio.
    fn probe(&mut self) -> Result<bool>;
    fn info(&mut self) -> Result<SourceInfo>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn prev(&mut self) -> Result<()>;
    fn volume_up(&mut self) -> Result<()>;
    fn volume_down(&mut self) -> Result<()>;

    /// Called with every audio session event before the next poll.
    fn on_event(&mut self, _event: &AudioEvent) {}
}

/// One registered audio source as seen by the hub.
///
/// Only [`SourceClient::poll`] and [`SourceClient::handle_event`] mutate the
/// availability state; arbitration reads it.
pub struct SourceClient {
    name: String,
    kind: SourceKind,
    priority: u32,
    poll_interval: Duration,
    backend: Box<dyn SourceBackend>,
    active: bool,
    info: Option<SourceInfo>,
    last_poll: Option<Instant>,
    stale: bool,
}

impl SourceClient {
    pub fn new(name: impl Into<String>, kind: SourceKind, backend: Box<dyn SourceBackend>) -> Self {
        Self {
            name: name.into(),
            kind,
            priority: kind.default_priority(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backend,
            active: false,
            info: None,
            last_poll: None,
            stale: true,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn info(&self) -> Option<&SourceInfo> {
        self.info.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.info.as_ref().is_some_and(SourceInfo::is_playing)
    }

    /// Forwards an audio event to the backend and forces the next poll.
    pub fn handle_event(&mut self, event: &AudioEvent) {
        self.backend.on_event(event);
        self.stale = true;
    }

    /// Refreshes availability and metadata, at most once per poll interval
    /// unless an event marked the client stale. Returns `true` when a probe
    /// actually ran.
    pub fn poll(&mut self, now: Instant) -> bool {
        let due = self.stale
            || self
                .last_poll
                .map(|last| now.saturating_duration_since(last) >= self.poll_interval)
                .unwrap_or(true);
        if !due {
            return false;
        }
        self.stale = false;
        self.last_poll = Some(now);

        self.active = match self.backend.probe() {
            Ok(active) => active,
            Err(err) => {
                warn!(source = %self.name, error = %err, "probe failed, treating source as inactive");
                false
            }
        };

        self.info = if self.active {
            match self.backend.info() {
                Ok(info) => Some(info),
                Err(err) => {
                    debug!(source = %self.name, error = %err, "no metadata available");
                    None
                }
            }
        } else {
            None
        };
        true
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.command("pause", |backend| backend.pause());
            if let Some(info) = self.info.as_mut() {
                info.status = PlaybackStatus::Paused;
            }
        } else {
            self.command("play", |backend| backend.play());
            if let Some(info) = self.info.as_mut() {
                info.status = PlaybackStatus::Playing;
            }
        }
    }

    pub fn next(&mut self) {
        self.command("next", |backend| backend.next());
    }

    pub fn prev(&mut self) {
        self.command("prev", |backend| backend.prev());
    }

    pub fn volume_up(&mut self) {
        self.command("volume_up", |backend| backend.volume_up());
    }

    pub fn volume_down(&mut self) {
        self.command("volume_down", |backend| backend.volume_down());
    }

    fn command<F>(&mut self, name: &'static str, call: F)
    where
        F: FnOnce(&mut dyn SourceBackend) -> Result<()>,
    {
        if let Err(err) = call(self.backend.as_mut()) {
            warn!(source = %self.name, command = name, error = %err, "control call failed");
        }
        self.stale = true;
    }
}

impl fmt::Debug for SourceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceClient")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("active", &self.active)
            .field("info", &self.info)
            .finish()
    }
}
