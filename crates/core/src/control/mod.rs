use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{config::ButtonConfig, HubError, Result};

/// Presses queued beyond this count are dropped until the render loop
/// drains them.
const MAX_PENDING: usize = 8;

/// Logical action bound to a front button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    TogglePlay,
    Next,
    VolumeDown,
    VolumeUp,
}

/// Maps GPIO pins to actions.
#[derive(Debug, Clone)]
pub struct ButtonMap {
    bindings: [(u8, ButtonAction); 4],
}

impl ButtonMap {
    pub fn from_config(config: &ButtonConfig) -> Self {
        Self {
            bindings: [
                (config.pin_play, ButtonAction::TogglePlay),
                (config.pin_next, ButtonAction::Next),
                (config.pin_volume_down, ButtonAction::VolumeDown),
                (config.pin_volume_up, ButtonAction::VolumeUp),
            ],
        }
    }

    pub fn action(&self, pin: u8) -> Option<ButtonAction> {
        self.bindings
            .iter()
            .find(|(bound, _)| *bound == pin)
            .map(|(_, action)| *action)
    }

    pub fn pins(&self) -> impl Iterator<Item = u8> + '_ {
        self.bindings.iter().map(|(pin, _)| *pin)
    }
}

#[derive(Debug, Default)]
struct Pending {
    last_press: Option<Instant>,
    actions: VecDeque<ButtonAction>,
}

/// Cloneable entry point for edge callbacks running outside the render loop.
///
/// Presses are debounced and queued under one mutex; the hub drains the
/// queue once per tick, so button callbacks never touch display state.
#[derive(Debug, Clone)]
pub struct ButtonHandle {
    map: Arc<ButtonMap>,
    debounce: Duration,
    pending: Arc<Mutex<Pending>>,
}

impl ButtonHandle {
    pub fn new(config: &ButtonConfig) -> Self {
        Self {
            map: Arc::new(ButtonMap::from_config(config)),
            debounce: config.debounce(),
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn map(&self) -> &ButtonMap {
        &self.map
    }

    /// Records a falling edge on `pin` observed at `at`. Returns the queued
    /// action, or `None` when the press was unmapped or debounced.
    pub fn press(&self, pin: u8, at: Instant) -> Option<ButtonAction> {
        let Some(action) = self.map.action(pin) else {
            debug!(pin, "ignoring press on unmapped pin");
            return None;
        };

        let mut pending = match self.lock() {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "dropping button press");
                return None;
            }
        };

        let bounced = pending
            .last_press
            .is_some_and(|last| at.saturating_duration_since(last) < self.debounce);
        if bounced {
            return None;
        }
        pending.last_press = Some(at);

        if pending.actions.len() >= MAX_PENDING {
            warn!(?action, "button queue full, dropping press");
            return None;
        }
        pending.actions.push_back(action);
        Some(action)
    }

    /// Takes every queued action in press order.
    pub fn drain(&self) -> Result<Vec<ButtonAction>> {
        let mut pending = self.lock()?;
        Ok(pending.actions.drain(..).collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| HubError::Poisoned("button queue"))
    }
}
