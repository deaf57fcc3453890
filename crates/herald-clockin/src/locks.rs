//! Per-event in-memory locks for clock-in mutations.
//!
//! The position roster is the one structure mutated concurrently (member
//! selections racing each other). Acquisition is strictly non-blocking: a
//! caller finding the lock held gets rejected immediately with a typed
//! "busy" result instead of interleaving, and the guard releases on Drop on
//! every path so a failed mutation can never wedge an event.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Debug, Clone, Default)]
/// Tracks which event ids currently hold their mutation lock.
pub struct LockRegistry {
    busy: Arc<Mutex<HashSet<String>>>,
}

/// Held lock for one event; released when dropped.
pub struct EventGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    event_id: String,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock for `event_id` without blocking.
    pub fn try_acquire(&self, event_id: &str) -> Option<EventGuard> {
        let mut busy = lock_busy(&self.busy);
        if !busy.insert(event_id.to_string()) {
            return None;
        }
        Some(EventGuard {
            busy: Arc::clone(&self.busy),
            event_id: event_id.to_string(),
        })
    }

    /// True when the event's lock is currently held.
    pub fn is_held(&self, event_id: &str) -> bool {
        lock_busy(&self.busy).contains(event_id)
    }
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        lock_busy(&self.busy).remove(&self.event_id);
    }
}

fn lock_busy(busy: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match busy.lock() {
        Ok(guard) => guard,
        // A panic while holding the set cannot leave it inconsistent; keep
        // serving rather than wedging every event forever.
        Err(poisoned) => poisoned.into_inner(),
    }
}
