//! Callback registry shared by the connectivity monitor and the orchestrator.
//!
//! Callbacks run synchronously on the notifying call path. A panicking
//! callback is caught and logged; the others still run and the caller
//! carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Handle returned by `add_listener`, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) struct Listeners<T> {
    name: &'static str,
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Listeners<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Call every listener; returns how many panicked
    pub(crate) fn notify(&self, value: &T) -> usize {
        // Snapshot so a callback may add or remove listeners
        let snapshot: Vec<_> = self.lock().iter().map(|(id, cb)| (*id, cb.clone())).collect();

        let mut failures = 0;
        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                failures += 1;
                warn!("{} listener {:?} panicked; ignoring", self.name, id);
            }
        }
        failures
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Callback<T>)>> {
        // A poisoned registry still holds valid entries
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
