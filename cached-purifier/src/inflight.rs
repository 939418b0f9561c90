//! Per-key miss coalescing.
//!
//! The first caller to miss on a key becomes its leader and computes; callers
//! that miss on the same key while the leader is running wait for it to
//! finish and then look the key up again. A slot lives only as long as its
//! leader's guard.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
pub(crate) struct Slot {
    done: Mutex<bool>,
    finished: Condvar,
}

impl Slot {
    /// Blocks until the leader that owns this slot has finished.
    pub(crate) fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self.finished.wait(done).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.finished.notify_all();
    }
}

pub(crate) enum Flight<'a> {
    Leader(LeaderGuard<'a>),
    Follower(Arc<Slot>),
}

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&self, key: &str) -> Flight<'_> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(key) {
            return Flight::Follower(Arc::clone(slot));
        }
        let slot = Arc::new(Slot::default());
        slots.insert(key.to_string(), Arc::clone(&slot));
        Flight::Leader(LeaderGuard { owner: self, key: key.to_string(), slot })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held by the computing caller. Dropping it (also on unwind) frees the key
/// and wakes every follower.
pub(crate) struct LeaderGuard<'a> {
    owner: &'a InFlight,
    key: String,
    slot: Arc<Slot>,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_caller_follows_until_leader_drops() {
        let flights = InFlight::new();
        let leader = match flights.begin("k") {
            Flight::Leader(guard) => guard,
            Flight::Follower(_) => panic!("first caller must lead"),
        };
        assert!(matches!(flights.begin("k"), Flight::Follower(_)));
        assert!(matches!(flights.begin("other"), Flight::Leader(_)));

        drop(leader);
        assert_eq!(flights.len(), 0);
        assert!(matches!(flights.begin("k"), Flight::Leader(_)));
    }

    #[test]
    fn followers_wake_when_leader_finishes() {
        let flights = Arc::new(InFlight::new());
        let woke = Arc::new(AtomicUsize::new(0));

        let leader = match flights.begin("k") {
            Flight::Leader(guard) => guard,
            Flight::Follower(_) => panic!("first caller must lead"),
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let woke = Arc::clone(&woke);
                thread::spawn(move || {
                    if let Flight::Follower(slot) = flights.begin("k") {
                        slot.wait();
                    }
                    woke.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(woke.load(Ordering::SeqCst), 0);
        drop(leader);

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(woke.load(Ordering::SeqCst), 4);
    }
}
