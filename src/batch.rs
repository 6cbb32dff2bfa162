//! Batch/debounce coordinator.
//!
//! One window per object. The first edit opens it; later edits only record
//! the latest operation id (the pending queue has already coalesced them).
//! A window is due once `flush_interval` has passed since it opened, or as
//! soon as its gesture ends. Each window is drained exactly once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct Window {
    op_id: Uuid,
    opened_at: Instant,
    edits: u32,
    ready: bool,
}

#[derive(Debug)]
pub struct BatchCoordinator {
    flush_interval: Duration,
    windows: HashMap<Uuid, Window>,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

impl BatchCoordinator {
    #[must_use]
    pub fn new(flush_interval: Duration) -> Self {
        Self { flush_interval, windows: HashMap::new() }
    }

    /// Record an edit, opening a window if none is open for the object.
    pub fn schedule(&mut self, object_id: Uuid, op_id: Uuid, now: Instant) {
        let window = self
            .windows
            .entry(object_id)
            .or_insert(Window { op_id, opened_at: now, edits: 0, ready: false });
        window.op_id = op_id;
        window.edits += 1;
    }

    /// Record an edit that should go out on the next drain (creates, deletes).
    pub fn schedule_ready(&mut self, object_id: Uuid, op_id: Uuid, now: Instant) {
        self.schedule(object_id, op_id, now);
        self.end_gesture(object_id);
    }

    /// Mouse-up or equivalent: flush without waiting for the interval.
    pub fn end_gesture(&mut self, object_id: Uuid) {
        if let Some(window) = self.windows.get_mut(&object_id) {
            window.ready = true;
        }
    }

    /// Remove and return every due window as `(object_id, latest op_id)`.
    pub fn drain_due(&mut self, now: Instant) -> Vec<(Uuid, Uuid)> {
        let interval = self.flush_interval;
        let due: Vec<Uuid> = self
            .windows
            .iter()
            .filter(|(_, w)| w.ready || now.saturating_duration_since(w.opened_at) >= interval)
            .map(|(id, _)| *id)
            .collect();
        due.into_iter()
            .filter_map(|id| self.windows.remove(&id).map(|w| (id, w.op_id)))
            .collect()
    }

    /// Forget an object's window (cancelled or rolled back).
    pub fn discard(&mut self, object_id: &Uuid) {
        self.windows.remove(object_id);
    }

    pub fn rekey(&mut self, from: &Uuid, to: Uuid) {
        if let Some(window) = self.windows.remove(from) {
            self.windows.insert(to, window);
        }
    }

    #[must_use]
    pub fn is_scheduled(&self, object_id: &Uuid) -> bool {
        self.windows.contains_key(object_id)
    }

    /// Edits folded into the object's open window.
    #[must_use]
    pub fn edits(&self, object_id: &Uuid) -> u32 {
        self.windows.get(object_id).map_or(0, |w| w.edits)
    }

    /// Earliest instant any open window becomes due.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.windows
            .values()
            .map(|w| if w.ready { w.opened_at } else { w.opened_at + self.flush_interval })
            .min()
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;
