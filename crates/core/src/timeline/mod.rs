use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{Local, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Monotonic time source shared by every timed effect.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Wall-clock time of day for clock faces.
    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
///
/// Its time of day starts at noon unless set otherwise and advances with
/// the monotonic time.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
    origin: Instant,
    wall_origin: NaiveTime,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            origin: start,
            wall_origin: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    pub fn with_local_time(mut self, time: NaiveTime) -> Self {
        self.wall_origin = time;
        self
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += delta;
    }

    pub fn advance_secs(&self, secs: f32) {
        self.advance(Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn local_time(&self) -> NaiveTime {
        let elapsed = self.now().saturating_duration_since(self.origin);
        let millis = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        let delta = TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::zero());
        self.wall_origin.overflowing_add_signed(delta).0
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").field("now", &self.now()).finish()
    }
}

/// Start timestamp that is set exactly once, on the first update of the
/// owning effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stopwatch {
    started_at: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Starts the stopwatch unless it already runs. Returns `true` on the
    /// call that actually started it.
    pub fn start_at(&mut self, now: Instant) -> bool {
        if self.started_at.is_some() {
            return false;
        }
        self.started_at = Some(now);
        true
    }

    /// Time since the start; zero while not started.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or(Duration::ZERO)
    }
}

/// Rounds to two decimal digits so sub-percent jitter never counts as a
/// visual change.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Linear progress of `elapsed` through `length`, clamped to `[0, 1]`.
/// A zero-length ramp is already complete.
pub fn ramp(elapsed: f32, length: f32) -> f32 {
    if length <= 0.0 {
        return 1.0;
    }
    (elapsed / length).clamp(0.0, 1.0)
}

/// Payload released by a [`Scheduler`] once its offset has elapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent<T> {
    /// Offset from the start of the schedule, in seconds.
    pub at_secs: f32,
    pub event: T,
}

impl<T> ScheduledEvent<T> {
    pub fn new(at_secs: f32, event: T) -> Self {
        Self { at_secs, event }
    }
}

/// Releases scripted events in time order.
#[derive(Debug)]
pub struct Scheduler<T> {
    events: Vec<ScheduledEvent<T>>,
    next_event: usize,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_event: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_events(&mut self, mut events: Vec<ScheduledEvent<T>>) {
        events.retain(|event| {
            event.at_secs.is_finite() && Duration::try_from_secs_f32(event.at_secs.max(0.0)).is_ok()
        });
        events.sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
        self.events = events;
        self.next_event = 0;
    }

    /// Returns every event whose offset is at or before `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<&T> {
        let elapsed = elapsed.as_secs_f32();
        let start = self.next_event;
        while let Some(event) = self.events.get(self.next_event) {
            if event.at_secs > elapsed {
                break;
            }
            self.next_event += 1;
        }
        self.events[start..self.next_event]
            .iter()
            .map(|scheduled| &scheduled.event)
            .collect()
    }

    /// Offset of the next pending event, if any.
    pub fn next_at(&self) -> Option<Duration> {
        self.events
            .get(self.next_event)
            .map(|event| Duration::try_from_secs_f32(event.at_secs.max(0.0)).unwrap_or(Duration::MAX))
    }

    pub fn is_finished(&self) -> bool {
        self.next_event >= self.events.len()
    }
}
