//! The render loop: wires sources, arbitration, scenes, overlays, the
//! backlight and the display sink together.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, error, info, warn};

use crate::{
    arbiter::{Arbitrator, Transition},
    assets::{ArtCache, AssetStore},
    audio::{spawn_listener, AudioEvent, AudioEventSource, EventMailbox, Mixer},
    brightness::{Activity, BrightnessController},
    config::HubConfig,
    control::{ButtonAction, ButtonHandle},
    display::DisplaySink,
    overlay::{ButtonFeedback, OverlaySpec},
    render::Compositor,
    scene::{self, Phase, SceneContext, SceneKind, SourceView},
    source::{SourceClient, SourceId},
    timeline::Clock,
    HubError, Result,
};

const RUNNING: u8 = 0;
const GRACEFUL: u8 = 1;
const FORCED: u8 = 2;

/// Cloneable stop switch for the render loop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    state: Arc<AtomicU8>,
}

impl StopHandle {
    /// Asks the hub to play the outro and exit.
    pub fn request_stop(&self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, GRACEFUL, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Stops without the outro; [`Hub::run`] then reports
    /// [`HubError::Interrupted`] after teardown.
    pub fn force(&self) {
        self.state.store(FORCED, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    pub fn is_forced(&self) -> bool {
        self.state.load(Ordering::Acquire) == FORCED
    }
}

/// What one [`Hub::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub frame_pushed: bool,
    pub scene: Option<SceneKind>,
    pub current_source: Option<SourceId>,
    pub brightness: u8,
    pub active: bool,
}

struct Listener {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct Hub {
    config: HubConfig,
    display: Box<dyn DisplaySink>,
    mixer: Box<dyn Mixer>,
    clock: Arc<dyn Clock>,
    sources: Vec<SourceClient>,
    arbiter: Arbitrator,
    compositor: Compositor,
    brightness: BrightnessController,
    activity: Activity,
    mailbox: EventMailbox,
    buttons: ButtonHandle,
    stop: StopHandle,
    listener: Option<Listener>,
    art_cache: ArtCache,
    phase: Phase,
    last_push: Option<Instant>,
    /// A push failed; retry on the next tick even when nothing changed.
    push_pending: bool,
    started: bool,
    torn_down: bool,
}

impl Hub {
    /// Validates `config` and checks that the display matches it.
    pub fn new(
        config: HubConfig,
        display: Box<dyn DisplaySink>,
        mixer: Box<dyn Mixer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let expected = (config.display.width, config.display.height);
        if display.size() != expected {
            let (width, height) = display.size();
            return Err(HubError::Config(format!(
                "display is {width}x{height} but configuration expects {}x{}",
                expected.0, expected.1
            )));
        }

        let now = clock.now();
        Ok(Self {
            compositor: Compositor::new(expected.0, expected.1, AssetStore::new()),
            brightness: BrightnessController::from_config(&config.display),
            activity: Activity::new(now, config.display.timeout()),
            buttons: ButtonHandle::new(&config.buttons),
            art_cache: ArtCache::new(config.cache_dir.clone()),
            config,
            display,
            mixer,
            clock,
            sources: Vec::new(),
            arbiter: Arbitrator::new(),
            mailbox: EventMailbox::new(),
            stop: StopHandle::default(),
            listener: None,
            phase: Phase::Running,
            last_push: None,
            push_pending: false,
            started: false,
            torn_down: false,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Registers a source; ids follow registration order.
    pub fn add_source(&mut self, client: SourceClient) -> SourceId {
        let id = SourceId(self.sources.len());
        info!(source = %client.name(), kind = ?client.kind(), priority = client.priority(), %id, "source registered");
        self.sources.push(client);
        id
    }

    pub fn sources(&self) -> &[SourceClient] {
        &self.sources
    }

    pub fn set_assets(&mut self, assets: AssetStore) {
        self.compositor.set_assets(assets);
    }

    pub fn art_cache(&self) -> &ArtCache {
        &self.art_cache
    }

    /// Where audio session events are handed to the render loop.
    pub fn mailbox(&self) -> EventMailbox {
        self.mailbox.clone()
    }

    /// Entry point for button edge callbacks.
    pub fn buttons(&self) -> ButtonHandle {
        self.buttons.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn current_source(&self) -> Option<SourceId> {
        self.arbiter.current()
    }

    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }

    /// Runs `source` on its own thread, feeding [`Hub::mailbox`].
    pub fn attach_listener(&mut self, source: Box<dyn AudioEventSource>) -> Result<()> {
        if self.listener.is_some() {
            return Err(HubError::msg("an audio event listener is already attached"));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_listener(source, self.mailbox.clone(), Arc::clone(&stop))?;
        self.listener = Some(Listener { stop, handle });
        Ok(())
    }

    /// Starts the display. Failures here are fatal and returned as is.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.display.start()?;
        self.display.set_backlight(self.brightness.level())?;
        let now = self.clock.now();
        self.activity = Activity::new(now, self.config.display.timeout());
        self.started = true;
        info!(sources = self.sources.len(), "hub started");
        Ok(())
    }

    /// Whether a requested shutdown has finished its outro.
    pub fn is_finished(&self) -> bool {
        if self.phase != Phase::ShuttingDown {
            return false;
        }
        match self.compositor.scene_state() {
            Some(state) if state.kind == SceneKind::Outro => !state.alive,
            _ => !self.config.scenes.outro,
        }
    }

    /// One pass of the render loop.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        if self.phase == Phase::Running && self.stop.is_stop_requested() {
            info!("shutdown requested");
            self.phase = Phase::ShuttingDown;
        }

        self.refresh_sources(now);
        self.handle_buttons(now);

        let scene_alive = self
            .compositor
            .scene_state()
            .is_some_and(|state| state.alive);
        self.activity.check_timeout(now, scene_alive);
        self.apply_scene_policy(now);

        let (level, ramping) = self
            .brightness
            .step(self.activity.is_active(), self.config.display.max_brightness);
        if ramping {
            if let Err(err) = self.display.set_backlight(level) {
                warn!(level, error = %err, "could not set backlight");
            }
        }

        let current = self
            .arbiter
            .current()
            .and_then(|id| self.sources.get(id.0).map(|client| SourceView::of(id, client)));
        let mut ctx = SceneContext {
            now,
            local_time: self.clock.local_time(),
            current,
            sources: &self.sources,
            ramping,
            mixer: self.mixer.as_mut(),
        };
        let changed = self.compositor.tick(&mut ctx);

        let frame_pushed = self.push_frame(now, changed);
        TickReport {
            frame_pushed,
            scene: self.compositor.scene_kind(),
            current_source: self.arbiter.current(),
            brightness: level,
            active: self.activity.is_active(),
        }
    }

    /// Drains the audio mailbox, polls every client and re-arbitrates.
    fn refresh_sources(&mut self, now: Instant) {
        let events: Vec<AudioEvent> = match self.mailbox.take() {
            Ok(event) => event.into_iter().collect(),
            Err(err) => {
                warn!(error = %err, "audio events unavailable");
                Vec::new()
            }
        };
        for client in &mut self.sources {
            for event in &events {
                client.handle_event(event);
            }
            client.poll(now);
        }

        if let Some(transition) = self.arbiter.recompute(&self.sources, &events) {
            self.on_transition(transition, now);
        }
    }

    fn on_transition(&mut self, transition: Transition, now: Instant) {
        self.activity.wake(now);
        if self.phase != Phase::Running {
            return;
        }
        let kind_of = |id: SourceId| self.sources.get(id.0).map(SourceClient::kind);
        let spec = match (transition.to.and_then(kind_of), transition.from.and_then(kind_of)) {
            (Some(kind), _) => OverlaySpec::source_appeared(kind),
            (None, Some(kind)) => OverlaySpec::source_lost(kind),
            (None, None) => return,
        };
        debug!(kind = ?spec.kind, "source overlay");
        self.compositor.set_overlay(&spec);
    }

    fn handle_buttons(&mut self, now: Instant) {
        let actions = match self.buttons.drain() {
            Ok(actions) => actions,
            Err(err) => {
                warn!(error = %err, "button presses unavailable");
                return;
            }
        };
        let exclusive = self.compositor.scene_kind().is_some_and(SceneKind::is_exclusive);
        for action in actions {
            if exclusive || self.phase != Phase::Running {
                debug!(?action, "ignoring press during exclusive scene");
                continue;
            }
            self.on_button(action, now);
        }
    }

    fn on_button(&mut self, action: ButtonAction, now: Instant) {
        let was_asleep = self.activity.wake(now);
        let Some(client) = self
            .arbiter
            .current()
            .and_then(|id| self.sources.get_mut(id.0))
        else {
            debug!(?action, "no source to handle button");
            self.compositor.set_overlay(&OverlaySpec::unsupported());
            return;
        };
        if was_asleep {
            debug!(?action, "press only woke the screen");
            return;
        }

        let feedback = match action {
            ButtonAction::TogglePlay => {
                let feedback = if client.is_playing() {
                    ButtonFeedback::Pause
                } else {
                    ButtonFeedback::Play
                };
                client.toggle_play();
                feedback
            }
            ButtonAction::Next => {
                client.next();
                ButtonFeedback::Next
            }
            ButtonAction::VolumeDown => {
                client.volume_down();
                ButtonFeedback::VolumeDown
            }
            ButtonAction::VolumeUp => {
                client.volume_up();
                ButtonFeedback::VolumeUp
            }
        };
        self.compositor.set_overlay(&OverlaySpec::button(feedback));
    }

    fn apply_scene_policy(&mut self, now: Instant) {
        let state = self.compositor.scene_state();
        let Some(kind) = scene::next_scene(state, self.arbiter.current(), self.phase, &self.config.scenes)
        else {
            return;
        };

        let (width, height) = self.compositor.size();
        let next = scene::create(kind, width, height, &self.sources, &self.art_cache);
        if let Some(mut previous) = self.compositor.set_scene(next) {
            previous.leave(self.mixer.as_mut());
        }
        info!(from = ?state.map(|state| state.kind), to = ?kind, "scene changed");
        self.activity.touch(now);
    }

    fn push_frame(&mut self, now: Instant, changed: bool) -> bool {
        let refresh_due = self.activity.is_active()
            && self
                .last_push
                .map(|last| now.saturating_duration_since(last) >= self.config.render.update_interval())
                .unwrap_or(true);
        if !(changed || refresh_due || self.push_pending) {
            return false;
        }

        match self.display.push_frame(self.compositor.frame()) {
            Ok(()) => {
                self.last_push = Some(now);
                self.push_pending = false;
                true
            }
            Err(err) => {
                warn!(error = %err, "frame push failed, retrying next tick");
                self.push_pending = true;
                false
            }
        }
    }

    /// Starts the hub and ticks at the configured rate until stopped. A
    /// graceful stop plays the outro first; a forced one returns
    /// [`HubError::Interrupted`]. Teardown runs on every exit path.
    pub fn run(&mut self) -> Result<()> {
        let result = self.start().and_then(|()| self.run_loop());
        let teardown = self.shutdown();
        result.and(teardown)
    }

    fn run_loop(&mut self) -> Result<()> {
        let interval = self.config.render.tick_interval();
        loop {
            if self.stop.is_forced() {
                warn!("forced stop, skipping outro");
                return Err(HubError::Interrupted);
            }
            let started = Instant::now();
            self.tick();
            if self.is_finished() {
                return Ok(());
            }
            thread::sleep(interval.saturating_sub(started.elapsed()));
        }
    }

    /// Releases collaborators: stops the listener, darkens the backlight,
    /// stops the display and lets the last scene restore anything it
    /// changed. Runs once; later calls are no-ops.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        if let Some(listener) = self.listener.take() {
            listener.stop.store(true, Ordering::Release);
            if listener.handle.is_finished() {
                if listener.handle.join().is_err() {
                    error!("audio event listener panicked");
                }
            } else {
                debug!("audio event listener still blocked, detaching");
            }
        }

        if let Some(mut last) = self.compositor.take_scene() {
            last.leave(self.mixer.as_mut());
        }

        let mut first_error = None;
        if self.started {
            if let Err(err) = self.display.set_backlight(0) {
                error!(error = %err, "could not switch backlight off");
                first_error.get_or_insert(err);
            }
            if let Err(err) = self.display.stop() {
                error!(error = %err, "could not stop display");
                first_error.get_or_insert(err);
            }
        }
        info!("hub stopped");
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        audio::SoftMixer,
        display::{DisplayProbe, HeadlessDisplay},
        overlay::OverlayKind,
        source::{tests::FakeBackend, SourceKind},
        timeline::ManualClock,
    };

    fn hub(config: HubConfig) -> (Hub, ManualClock, DisplayProbe) {
        let clock = ManualClock::new();
        let display = HeadlessDisplay::new(config.display.width, config.display.height);
        let probe = display.probe();
        let hub = Hub::new(
            config,
            Box::new(display),
            Box::new(SoftMixer::default()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (hub, clock, probe)
    }

    fn small() -> HubConfig {
        let mut config = HubConfig::without_transitions();
        config.display.width = 48;
        config.display.height = 48;
        config
    }

    #[test]
    fn rejects_mismatched_display() {
        let display = HeadlessDisplay::new(10, 10);
        let result = Hub::new(
            HubConfig::default(),
            Box::new(display),
            Box::new(SoftMixer::default()),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(HubError::Config(_))));
    }

    #[test]
    fn first_tick_installs_idle_and_pushes() {
        let (mut hub, _clock, probe) = hub(small());
        hub.start().unwrap();
        let report = hub.tick();
        assert_eq!(report.scene, Some(SceneKind::Idle));
        assert!(report.frame_pushed);
        assert_eq!(report.brightness, 10);
        assert_eq!(probe.frames_pushed(), 1);
        assert_eq!(probe.backlight(), 10);
    }

    #[test]
    fn sleeps_after_timeout_and_dims() {
        let (mut hub, clock, probe) = hub(small());
        hub.start().unwrap();
        for _ in 0..10 {
            hub.tick();
        }
        assert_eq!(probe.backlight(), 80);

        clock.advance(Duration::from_secs(9));
        let report = hub.tick();
        assert!(!report.active);
        assert_eq!(report.brightness, 70);
        for _ in 0..10 {
            hub.tick();
        }
        assert_eq!(probe.backlight(), 0);

        let pushed = probe.frames_pushed();
        clock.advance(Duration::from_secs(5));
        assert!(!hub.tick().frame_pushed);
        assert_eq!(probe.frames_pushed(), pushed);
    }

    #[test]
    fn press_without_source_wakes_and_shows_unsupported() {
        let (mut hub, clock, probe) = hub(small());
        hub.start().unwrap();
        hub.tick();
        clock.advance(Duration::from_secs(9));
        hub.tick();
        assert!(!hub.is_active());

        let buttons = hub.buttons();
        buttons.press(hub.config().buttons.pin_play, clock.now());
        let pushed = probe.frames_pushed();
        let report = hub.tick();
        assert!(report.active);
        assert!(report.frame_pushed);
        assert_eq!(probe.frames_pushed(), pushed + 1);
        assert_eq!(hub.compositor().overlay_kind(), Some(OverlayKind::Unsupported));
    }

    #[test]
    fn press_with_awake_source_sends_command() {
        let (mut hub, clock, _probe) = hub(small());
        let backend = FakeBackend::default();
        backend.set_available(true);
        hub.add_source(SourceClient::new("bt", SourceKind::Bluetooth, Box::new(backend.clone())));
        hub.start().unwrap();
        hub.tick();

        let buttons = hub.buttons();
        buttons.press(hub.config().buttons.pin_next, clock.now());
        hub.tick();
        assert_eq!(backend.state.lock().unwrap().commands, vec!["next"]);
        assert_eq!(
            hub.compositor().overlay_kind(),
            Some(OverlayKind::Button(ButtonFeedback::Next))
        );
    }

    #[test]
    fn failed_push_is_retried() {
        let (mut hub, _clock, probe) = hub(small());
        hub.start().unwrap();
        probe.fail_pushes(true);
        assert!(!hub.tick().frame_pushed);
        probe.fail_pushes(false);
        assert!(hub.tick().frame_pushed);
    }

    #[test]
    fn graceful_stop_without_outro_finishes_at_once() {
        let (mut hub, _clock, probe) = hub(small());
        hub.start().unwrap();
        hub.tick();
        hub.stop_handle().request_stop();
        hub.tick();
        assert!(hub.is_finished());
        hub.shutdown().unwrap();
        assert!(probe.is_stopped());
        assert_eq!(probe.backlight(), 0);
        hub.shutdown().unwrap();
    }

    #[test]
    fn forced_run_tears_down_and_reports_interruption() {
        let (mut hub, _clock, probe) = hub(small());
        hub.stop_handle().force();
        assert!(matches!(hub.run(), Err(HubError::Interrupted)));
        assert!(probe.is_started());
        assert!(probe.is_stopped());
    }
}
