//! Live presence: who is on the canvas and where their cursor is.
//!
//! Entries are created on the first cursor or join event, updated in place,
//! and removed on `presence:left` or after a silence timeout.

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub cursor: Option<(f64, f64)>,
    /// Milliseconds since the Unix epoch of the last event from this user.
    pub last_heartbeat: i64,
}

#[derive(Debug, Default)]
pub struct PresenceMap {
    entries: HashMap<Uuid, PresenceEntry>,
}

impl PresenceMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, user_id: Uuid, name: Option<String>, now_ms: i64) -> &mut PresenceEntry {
        let entry = self.entries.entry(user_id).or_insert_with(|| PresenceEntry {
            user_id,
            name: None,
            cursor: None,
            last_heartbeat: now_ms,
        });
        if name.is_some() {
            entry.name = name;
        }
        entry.last_heartbeat = entry.last_heartbeat.max(now_ms);
        entry
    }

    pub fn join(&mut self, user_id: Uuid, name: Option<String>, now_ms: i64) {
        self.touch(user_id, name, now_ms);
    }

    pub fn move_cursor(&mut self, user_id: Uuid, name: Option<String>, x: f64, y: f64, now_ms: i64) {
        self.touch(user_id, name, now_ms).cursor = Some((x, y));
    }

    pub fn leave(&mut self, user_id: &Uuid) -> Option<PresenceEntry> {
        self.entries.remove(user_id)
    }

    /// Drop users silent for at least `timeout_ms`. Returns who was removed.
    pub fn prune(&mut self, now_ms: i64, timeout_ms: i64) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .entries
            .values()
            .filter(|e| now_ms - e.last_heartbeat >= timeout_ms)
            .map(|e| e.user_id)
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    #[must_use]
    pub fn get(&self, user_id: &Uuid) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<&PresenceEntry> {
        self.entries.values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
