use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{HubError, Result};

const LISTENER_BACKOFF: Duration = Duration::from_millis(500);

/// Subsystem of the audio server an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facility {
    Card,
    Sink,
    SinkInput,
    Source,
    Client,
    Server,
    Other,
}

/// Change notification from the audio session. The hub only uses it as a
/// trigger to re-evaluate sources; the payload is never interpreted beyond
/// the facility tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub facility: Facility,
    pub index: u32,
}

impl AudioEvent {
    pub fn new(facility: Facility, index: u32) -> Self {
        Self { facility, index }
    }
}

/// Blocking source of audio session events (e.g. a sound server
/// subscription).
pub trait AudioEventSource: Send {
    /// Blocks until the next event arrives.
    fn listen(&mut self) -> Result<AudioEvent>;
}

/// Single-slot, latest-wins handoff between the listener thread and the
/// render loop. Publishing replaces any event that was not taken yet.
#[derive(Clone, Default)]
pub struct EventMailbox {
    slot: Arc<Mutex<Option<AudioEvent>>>,
}

impl EventMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: AudioEvent) -> Result<()> {
        let mut slot = self.lock()?;
        *slot = Some(event);
        Ok(())
    }

    /// Removes and returns the pending event without waiting.
    pub fn take(&self) -> Result<Option<AudioEvent>> {
        let mut slot = self.lock()?;
        Ok(slot.take())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<AudioEvent>>> {
        self.slot
            .lock()
            .map_err(|_| HubError::Poisoned("audio event mailbox"))
    }
}

impl std::fmt::Debug for EventMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMailbox").finish()
    }
}

/// Runs `source` on a dedicated thread, publishing every event into
/// `mailbox` until `stop` is set.
///
/// `listen` blocks, so the thread only notices `stop` after its next event;
/// callers should not expect a prompt join.
pub fn spawn_listener(
    mut source: Box<dyn AudioEventSource>,
    mailbox: EventMailbox,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("audio-events".into())
        .spawn(move || {
            debug!("audio event listener started");
            while !stop.load(Ordering::Acquire) {
                match source.listen() {
                    Ok(event) => {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        if let Err(err) = mailbox.publish(event) {
                            warn!(error = %err, "dropping audio event");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "audio event listener failed, retrying");
                        thread::sleep(LISTENER_BACKOFF);
                    }
                }
            }
            info!("audio event listener stopped");
        })?;
    Ok(handle)
}

/// Hardware volume control.
pub trait Mixer: Send {
    /// Current volume in percent.
    fn volume(&self) -> Result<u8>;
    fn set_volume(&mut self, volume: u8) -> Result<()>;
}

/// In-memory mixer used when no hardware mixer is attached.
#[derive(Debug, Clone)]
pub struct SoftMixer {
    volume: u8,
}

impl SoftMixer {
    pub fn new(volume: u8) -> Self {
        Self {
            volume: volume.min(100),
        }
    }
}

impl Default for SoftMixer {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Mixer for SoftMixer {
    fn volume(&self) -> Result<u8> {
        Ok(self.volume)
    }

    fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.volume = volume.min(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::mpsc, time::Instant};

    use super::*;

    #[test]
    fn mailbox_keeps_only_latest_event() {
        let mailbox = EventMailbox::new();
        mailbox.publish(AudioEvent::new(Facility::Card, 1)).unwrap();
        mailbox.publish(AudioEvent::new(Facility::SinkInput, 7)).unwrap();

        let event = mailbox.take().unwrap().expect("event should be pending");
        assert_eq!(event, AudioEvent::new(Facility::SinkInput, 7));
        assert!(mailbox.take().unwrap().is_none());
    }

    struct Scripted {
        events: VecDeque<AudioEvent>,
        done: mpsc::Sender<()>,
    }

    impl AudioEventSource for Scripted {
        fn listen(&mut self) -> Result<AudioEvent> {
            match self.events.pop_front() {
                Some(event) => Ok(event),
                None => {
                    let _ = self.done.send(());
                    thread::sleep(Duration::from_millis(20));
                    Err(HubError::msg("no more events"))
                }
            }
        }
    }

    #[test]
    fn listener_publishes_into_mailbox() {
        let (done_tx, done_rx) = mpsc::channel();
        let source = Scripted {
            events: VecDeque::from(vec![
                AudioEvent::new(Facility::Client, 1),
                AudioEvent::new(Facility::Card, 2),
            ]),
            done: done_tx,
        };
        let mailbox = EventMailbox::new();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_listener(Box::new(source), mailbox.clone(), stop.clone()).unwrap();

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("listener should drain its script");
        stop.store(true, Ordering::Release);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished());
        handle.join().unwrap();

        assert_eq!(
            mailbox.take().unwrap(),
            Some(AudioEvent::new(Facility::Card, 2))
        );
    }

    #[test]
    fn soft_mixer_clamps_volume() {
        let mut mixer = SoftMixer::new(120);
        assert_eq!(mixer.volume().unwrap(), 100);
        mixer.set_volume(30).unwrap();
        assert_eq!(mixer.volume().unwrap(), 30);
    }
}
