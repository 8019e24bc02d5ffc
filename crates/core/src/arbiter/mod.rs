//! Picks the single "current" source out of every registered one.

use tracing::{debug, info};

use crate::{
    audio::AudioEvent,
    source::{SourceClient, SourceId},
};

/// Change of the current source produced by [`Arbitrator::recompute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<SourceId>,
    pub to: Option<SourceId>,
}

/// Tracks which source is current.
///
/// `current` is always `None` or the active client with the lowest
/// priority value; equal priorities go to the earliest registration.
#[derive(Debug, Default)]
pub struct Arbitrator {
    current: Option<SourceId>,
}

impl Arbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SourceId> {
        self.current
    }

    /// Re-evaluates the current source from the clients' present state.
    ///
    /// `clients` must be indexed by [`SourceId`]. `events` is the batch of
    /// notifications that triggered this pass and may be empty: polling can
    /// flip availability without any notification.
    pub fn recompute(&mut self, clients: &[SourceClient], events: &[AudioEvent]) -> Option<Transition> {
        if !events.is_empty() {
            debug!(events = events.len(), "recomputing current source after audio events");
        }

        let best = select(clients);
        if best == self.current {
            return None;
        }

        let transition = Transition {
            from: self.current,
            to: best,
        };
        info!(
            from = ?source_name(clients, transition.from),
            to = ?source_name(clients, transition.to),
            "current source changed"
        );
        self.current = best;
        Some(transition)
    }
}

fn source_name(clients: &[SourceClient], id: Option<SourceId>) -> Option<&str> {
    id.and_then(|id| clients.get(id.0)).map(SourceClient::name)
}

/// Active client with the lowest `(priority, registration order)`.
pub fn select(clients: &[SourceClient]) -> Option<SourceId> {
    clients
        .iter()
        .enumerate()
        .filter(|(_, client)| client.is_active())
        .min_by_key(|(index, client)| (client.priority(), *index))
        .map(|(index, _)| SourceId(index))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;
    use crate::source::{tests::FakeBackend, SourceKind};

    fn clients(priorities: &[u32]) -> (Vec<SourceClient>, Vec<FakeBackend>) {
        let backends: Vec<FakeBackend> = priorities.iter().map(|_| FakeBackend::default()).collect();
        let clients = priorities
            .iter()
            .zip(&backends)
            .enumerate()
            .map(|(index, (priority, backend))| {
                SourceClient::new(format!("src{index}"), SourceKind::Other, Box::new(backend.clone()))
                    .with_priority(*priority)
            })
            .collect();
        (clients, backends)
    }

    fn set_active(clients: &mut [SourceClient], backends: &[FakeBackend], active: &[bool]) {
        let now = Instant::now();
        for ((client, backend), active) in clients.iter_mut().zip(backends).zip(active) {
            backend.set_available(*active);
            client.handle_event(&AudioEvent::new(crate::audio::Facility::Card, 0));
            client.poll(now);
        }
    }

    #[test]
    fn nothing_active_means_no_current() {
        let (clients, _) = clients(&[50, 100]);
        let mut arbitrator = Arbitrator::new();
        assert_eq!(arbitrator.recompute(&clients, &[]), None);
        assert_eq!(arbitrator.current(), None);
    }

    #[test]
    fn lower_priority_wins_and_ties_go_to_first_registered() {
        let (mut clients, backends) = clients(&[100, 50, 50]);
        set_active(&mut clients, &backends, &[true, true, true]);
        let mut arbitrator = Arbitrator::new();
        let transition = arbitrator.recompute(&clients, &[]).unwrap();
        assert_eq!(transition.from, None);
        assert_eq!(transition.to, Some(SourceId(1)));
    }

    #[test]
    fn reports_loss_of_current_source() {
        let (mut clients, backends) = clients(&[50]);
        set_active(&mut clients, &backends, &[true]);
        let mut arbitrator = Arbitrator::new();
        arbitrator.recompute(&clients, &[]);

        set_active(&mut clients, &backends, &[false]);
        let transition = arbitrator.recompute(&clients, &[]).unwrap();
        assert_eq!(transition.from, Some(SourceId(0)));
        assert_eq!(transition.to, None);
    }

    #[test]
    fn recompute_never_mutates_clients() {
        let (mut clients, backends) = clients(&[50, 100]);
        set_active(&mut clients, &backends, &[false, true]);
        let before: Vec<bool> = clients.iter().map(SourceClient::is_active).collect();
        let mut arbitrator = Arbitrator::new();
        arbitrator.recompute(&clients, &[]);
        let after: Vec<bool> = clients.iter().map(SourceClient::is_active).collect();
        assert_eq!(before, after);
    }

    proptest! {
        #[test]
        fn current_is_lowest_active_priority_and_idempotent(
            flags in proptest::collection::vec(any::<bool>(), 1..6),
            repeats in 1usize..4,
        ) {
            let priorities: Vec<u32> = (0..flags.len() as u32).map(|i| 10 * (flags.len() as u32 - i)).collect();
            let (mut clients, backends) = clients(&priorities);
            set_active(&mut clients, &backends, &flags);

            let mut arbitrator = Arbitrator::new();
            arbitrator.recompute(&clients, &[]);
            for _ in 0..repeats {
                prop_assert_eq!(arbitrator.recompute(&clients, &[]), None);
            }

            let expected = priorities
                .iter()
                .enumerate()
                .filter(|(index, _)| flags[*index])
                .min_by_key(|(_, priority)| **priority)
                .map(|(index, _)| SourceId(index));
            prop_assert_eq!(arbitrator.current(), expected);
        }
    }
}
