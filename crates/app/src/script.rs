//! Scripted scenario for headless runs: fake sources, a fake audio event
//! feed and timed button presses.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use speaker_hub_core::{
    config::ButtonConfig, ArtCache, AudioEvent, AudioEventSource, ButtonAction, ButtonHandle,
    Facility, Hub, HubError, PlaybackStatus, Result, ScheduledEvent, Scheduler, SourceBackend,
    SourceClient, SourceInfo, SourceKind, StopHandle,
};
use tracing::{debug, info, warn};

/// Longest sleep of the driver thread, so it notices a stop quickly.
const DRIVER_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSource {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub priority: Option<u32>,
}

/// One scripted happening.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptAction {
    /// Changes what a source reports. Missing fields keep their value.
    Source {
        name: String,
        #[serde(default)]
        available: Option<bool>,
        #[serde(default)]
        info: Option<SourceInfo>,
        /// Image file copied into the art cache and used as album art.
        #[serde(default)]
        cover: Option<PathBuf>,
    },
    Press {
        button: ButtonAction,
    },
    AudioEvent {
        facility: Facility,
        #[serde(default)]
        index: u32,
    },
    Stop,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub sources: Vec<ScriptSource>,
    #[serde(default)]
    pub events: Vec<ScheduledEvent<ScriptAction>>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Built-in scenario: a phone connects over Bluetooth, AirPlay joins,
    /// the phone leaves, then the hub shuts down.
    pub fn demo() -> Self {
        let playing = |title: &str, artist: &str| SourceInfo {
            status: PlaybackStatus::Playing,
            position_secs: Some(12.0),
            duration_secs: Some(180.0),
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(String::from("Demo")),
            ..SourceInfo::default()
        };
        let source = |name: &str, available: bool, info: Option<SourceInfo>| ScriptAction::Source {
            name: name.to_string(),
            available: Some(available),
            info,
            cover: None,
        };
        Self {
            sources: vec![
                ScriptSource {
                    name: String::from("Phone"),
                    kind: SourceKind::Bluetooth,
                    priority: None,
                },
                ScriptSource {
                    name: String::from("Living room"),
                    kind: SourceKind::AirPlay,
                    priority: None,
                },
            ],
            events: vec![
                ScheduledEvent::new(1.0, source("Phone", true, Some(playing("First song", "The Band")))),
                ScheduledEvent::new(4.0, ScriptAction::Press { button: ButtonAction::Next }),
                ScheduledEvent::new(5.0, source("Living room", true, Some(playing("Other song", "Someone")))),
                ScheduledEvent::new(7.0, source("Phone", false, None)),
                ScheduledEvent::new(9.0, ScriptAction::Press { button: ButtonAction::TogglePlay }),
                ScheduledEvent::new(10.0, ScriptAction::Press { button: ButtonAction::VolumeUp }),
                ScheduledEvent::new(12.0, source("Living room", false, None)),
                ScheduledEvent::new(14.0, ScriptAction::Stop),
            ],
        }
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    available: bool,
    info: SourceInfo,
}

/// Source backend whose answers are set by the script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    name: String,
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, ScriptedState>> {
        self.state
            .lock()
            .map_err(|_| HubError::Poisoned("scripted source"))
    }

    fn update(&self, available: Option<bool>, info: Option<SourceInfo>) -> Result<()> {
        let mut state = self.state()?;
        if let Some(available) = available {
            state.available = available;
        }
        if let Some(info) = info {
            state.info = info;
        }
        Ok(())
    }

    fn set_status(&self, status: PlaybackStatus) -> Result<()> {
        self.state()?.info.status = status;
        Ok(())
    }

    fn nudge_volume(&self, delta: i16) -> Result<()> {
        let mut state = self.state()?;
        let volume = i16::from(state.info.volume.unwrap_or(50)) + delta;
        state.info.volume = Some(volume.clamp(0, 100) as u8);
        Ok(())
    }
}

impl SourceBackend for ScriptedBackend {
    fn probe(&mut self) -> Result<bool> {
        Ok(self.state()?.available)
    }

    fn info(&mut self) -> Result<SourceInfo> {
        let state = self.state()?;
        if !state.available {
            return Err(HubError::backend(&self.name, "not connected"));
        }
        Ok(state.info.clone())
    }

    fn play(&mut self) -> Result<()> {
        self.set_status(PlaybackStatus::Playing)
    }

    fn pause(&mut self) -> Result<()> {
        self.set_status(PlaybackStatus::Paused)
    }

    fn next(&mut self) -> Result<()> {
        let mut state = self.state()?;
        state.info.position_secs = Some(0.0);
        debug!(source = %self.name, "skipped to next track");
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.state()?.info.position_secs = Some(0.0);
        Ok(())
    }

    fn volume_up(&mut self) -> Result<()> {
        self.nudge_volume(10)
    }

    fn volume_down(&mut self) -> Result<()> {
        self.nudge_volume(-10)
    }
}

/// Audio event feed filled by the script driver.
pub struct ScriptedEvents {
    events: Receiver<AudioEvent>,
}

impl AudioEventSource for ScriptedEvents {
    fn listen(&mut self) -> Result<AudioEvent> {
        self.events
            .recv()
            .map_err(|_| HubError::msg("scripted event feed closed"))
    }
}

/// Registers the scripted sources with a hub and later plays the script
/// against it from a background thread.
pub struct ScriptRunner {
    script: Script,
    backends: HashMap<String, ScriptedBackend>,
    events: Sender<AudioEvent>,
    receiver: Option<Receiver<AudioEvent>>,
    art_cache: ArtCache,
    pins: ButtonConfig,
}

impl ScriptRunner {
    pub fn new(script: Script, hub: &mut Hub) -> Self {
        let mut backends = HashMap::new();
        for source in &script.sources {
            let backend = ScriptedBackend::new(&source.name);
            let mut client = SourceClient::new(&source.name, source.kind, Box::new(backend.clone()));
            if let Some(priority) = source.priority {
                client = client.with_priority(priority);
            }
            hub.add_source(client);
            backends.insert(source.name.clone(), backend);
        }

        let (events, receiver) = mpsc::channel();
        Self {
            script,
            backends,
            events,
            receiver: Some(receiver),
            art_cache: hub.art_cache().clone(),
            pins: hub.config().buttons.clone(),
        }
    }

    /// Event feed for [`Hub::attach_listener`]; available once.
    pub fn take_listener(&mut self) -> Option<ScriptedEvents> {
        self.receiver.take().map(|events| ScriptedEvents { events })
    }

    /// Plays the script on its own thread. Requests a graceful stop when
    /// the script runs out and gives up early once a stop is seen.
    pub fn spawn(self, buttons: ButtonHandle, stop: StopHandle) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("script".into())
            .spawn(move || self.drive(&buttons, &stop))?;
        Ok(handle)
    }

    fn drive(self, buttons: &ButtonHandle, stop: &StopHandle) {
        let mut scheduler = Scheduler::new();
        scheduler.set_events(self.script.events.clone());
        let started = Instant::now();
        info!(events = self.script.events.len(), "script started");

        while !scheduler.is_finished() && !stop.is_stop_requested() {
            let actions: Vec<ScriptAction> = scheduler
                .tick(started.elapsed())
                .into_iter()
                .cloned()
                .collect();
            for action in actions {
                if let Err(err) = self.apply(action, buttons, stop) {
                    warn!(error = %err, "script step failed");
                }
            }
            let wait = scheduler
                .next_at()
                .map(|at| at.saturating_sub(started.elapsed()))
                .unwrap_or(Duration::ZERO);
            thread::sleep(wait.min(DRIVER_SLICE));
        }

        info!("script finished");
        stop.request_stop();
    }

    fn apply(&self, action: ScriptAction, buttons: &ButtonHandle, stop: &StopHandle) -> Result<()> {
        debug!(?action, "script step");
        match action {
            ScriptAction::Source {
                name,
                available,
                mut info,
                cover,
            } => {
                let backend = self
                    .backends
                    .get(&name)
                    .ok_or_else(|| HubError::msg(format!("script names unknown source `{name}`")))?;
                if let Some(cover) = cover {
                    let bytes = fs::read(&cover)?;
                    let path = self.art_cache.store(&format!("{name}.png"), &bytes)?;
                    info.get_or_insert_with(SourceInfo::default).album_art = Some(path);
                }
                backend.update(available, info)?;
                self.notify(Facility::Card, 0);
            }
            ScriptAction::Press { button } => {
                let pin = match button {
                    ButtonAction::TogglePlay => self.pins.pin_play,
                    ButtonAction::Next => self.pins.pin_next,
                    ButtonAction::VolumeDown => self.pins.pin_volume_down,
                    ButtonAction::VolumeUp => self.pins.pin_volume_up,
                };
                if buttons.press(pin, Instant::now()).is_none() {
                    debug!(?button, "scripted press was debounced");
                }
            }
            ScriptAction::AudioEvent { facility, index } => self.notify(facility, index),
            ScriptAction::Stop => stop.request_stop(),
        }
        Ok(())
    }

    fn notify(&self, facility: Facility, index: u32) {
        if self.events.send(AudioEvent::new(facility, index)).is_err() {
            debug!("audio event listener is gone");
        }
    }
}
