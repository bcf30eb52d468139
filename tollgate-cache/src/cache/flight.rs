//! Per-key in-flight markers for single-flight generation
//!
//! The first caller to miss on a key registers a marker atomically (a
//! `DashMap` entry holding a `watch` sender) and becomes the leader. Later
//! callers subscribe to that marker and wait for the leader's outcome instead
//! of issuing their own generation call. No lock is held while generating.
//!
//! The marker is removed when the leader's [`FlightGuard`] drops. If the leader
//! is cancelled before publishing, the sender disappears with it and waiting
//! followers observe a closed channel; they then race to become the next leader.

use crate::cache::types::{CacheKey, CacheValue};
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

pub(crate) type Outcome = Result<CacheValue>;

struct Flight {
    id: u64,
    tx: watch::Sender<Option<Outcome>>,
}

pub(crate) enum Role<'a> {
    Leader(FlightGuard<'a>),
    Follower(watch::Receiver<Option<Outcome>>),
}

#[derive(Default)]
pub(crate) struct InFlight {
    flights: DashMap<CacheKey, Flight>,
    next_id: AtomicU64,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key`, or subscribe to the current leader
    pub(crate) fn join(&self, key: &CacheKey) -> Role<'_> {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(flight) => Role::Follower(flight.get().tx.subscribe()),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, _rx) = watch::channel(None);
                slot.insert(Flight { id, tx });
                Role::Leader(FlightGuard {
                    flights: &self.flights,
                    key: key.clone(),
                    id,
                })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }
}

/// Leadership of one key's flight; clears the marker on drop
pub(crate) struct FlightGuard<'a> {
    flights: &'a DashMap<CacheKey, Flight>,
    key: CacheKey,
    id: u64,
}

impl FlightGuard<'_> {
    /// Publish the outcome to every follower, then clear the marker
    pub(crate) fn complete(self, outcome: Outcome) {
        if let Some(flight) = self.flights.get(&self.key) {
            if flight.id == self.id {
                flight.tx.send_replace(Some(outcome));
            }
        }
        // Drop removes the marker.
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.flights.remove_if(&self.key, |_, flight| flight.id == id);
    }
}

/// Wait for the leader's outcome; `None` if the leader went away without one
pub(crate) async fn wait(mut rx: watch::Receiver<Option<Outcome>>) -> Option<Outcome> {
    match rx.wait_for(|outcome| outcome.is_some()).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    fn key() -> CacheKey {
        CacheKey::new("answer", "k")
    }

    #[tokio::test]
    async fn test_first_caller_leads_second_follows() {
        let flights = InFlight::new();
        let leader = flights.join(&key());
        assert!(matches!(leader, Role::Leader(_)));
        assert!(matches!(flights.join(&key()), Role::Follower(_)));
        assert_eq!(flights.len(), 1);
    }

    #[tokio::test]
    async fn test_follower_receives_outcome() {
        let flights = InFlight::new();
        let Role::Leader(guard) = flights.join(&key()) else {
            panic!("expected leader");
        };
        let Role::Follower(rx) = flights.join(&key()) else {
            panic!("expected follower");
        };

        guard.complete(Ok("value".to_string()));
        assert_eq!(wait(rx).await, Some(Ok("value".to_string())));
        assert_eq!(flights.len(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let flights = InFlight::new();
        let Role::Leader(guard) = flights.join(&key()) else {
            panic!("expected leader");
        };
        let Role::Follower(rx) = flights.join(&key()) else {
            panic!("expected follower");
        };

        let err = CacheError::GenerationFailed("boom".to_string());
        guard.complete(Err(err.clone()));
        assert_eq!(wait(rx).await, Some(Err(err)));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let flights = InFlight::new();
        let leader = flights.join(&key());
        let Role::Follower(rx) = flights.join(&key()) else {
            panic!("expected follower");
        };

        drop(leader);
        assert_eq!(wait(rx).await, None);
        assert!(matches!(flights.join(&key()), Role::Leader(_)));
    }
}
