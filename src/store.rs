//! Object store: the local view of one canvas.
//!
//! DESIGN
//! ======
//! Two layers. The confirmed layer holds authoritative objects and only
//! accepts strictly newer versions; this is the single ordering guard
//! against out-of-order delivery. The overlay layer holds optimistic local
//! state (an edited copy, or a local removal) and shadows the confirmed
//! layer on reads until it is cleared or rebased.
//!
//! Removals leave a tombstone at the last known version so a late update
//! for a deleted object can't resurrect it.

use std::collections::HashMap;

use uuid::Uuid;

use crate::object::CanvasObject;

/// Result of a version-guarded write.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// No previous confirmed entry.
    Inserted,
    /// Replaced an older confirmed version.
    Replaced { previous_version: i64 },
    /// Incoming version was not newer; nothing changed.
    Stale { current_version: i64 },
}

impl UpsertOutcome {
    #[must_use]
    pub fn applied(&self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

/// Optimistic local state shadowing a confirmed object.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Present(CanvasObject),
    Removed,
}

#[derive(Debug, Default)]
pub struct ObjectStore {
    confirmed: HashMap<Uuid, CanvasObject>,
    overlay: HashMap<Uuid, Overlay>,
    tombstones: HashMap<Uuid, i64>,
}

impl ObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The object as the UI should show it: overlay first, then confirmed.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&CanvasObject> {
        match self.overlay.get(id) {
            Some(Overlay::Present(obj)) => Some(obj),
            Some(Overlay::Removed) => None,
            None => self.confirmed.get(id),
        }
    }

    /// The last authoritative state, ignoring optimistic overlays.
    #[must_use]
    pub fn confirmed(&self, id: &Uuid) -> Option<&CanvasObject> {
        self.confirmed.get(id)
    }

    #[must_use]
    pub fn has_overlay(&self, id: &Uuid) -> bool {
        self.overlay.contains_key(id)
    }

    /// Version-guarded authoritative write. Applies only when the incoming
    /// version is strictly greater than both the stored and tombstoned ones.
    pub fn upsert(&mut self, object: CanvasObject) -> UpsertOutcome {
        if let Some(&tomb) = self.tombstones.get(&object.id)
            && object.version <= tomb
        {
            return UpsertOutcome::Stale { current_version: tomb };
        }
        match self.confirmed.get(&object.id) {
            Some(current) if object.version <= current.version => {
                UpsertOutcome::Stale { current_version: current.version }
            }
            Some(current) => {
                let previous_version = current.version;
                self.confirmed.insert(object.id, object);
                UpsertOutcome::Replaced { previous_version }
            }
            None => {
                self.tombstones.remove(&object.id);
                self.confirmed.insert(object.id, object);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Drop an object from both layers, tombstoning it at `version` or the
    /// last confirmed version, whichever is higher.
    pub fn remove(&mut self, id: &Uuid, version: Option<i64>) -> Option<CanvasObject> {
        self.overlay.remove(id);
        let removed = self.confirmed.remove(id);
        let known = removed.as_ref().map(|o| o.version);
        let tomb = match (known, version) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(tomb) = tomb {
            let entry = self.tombstones.entry(*id).or_insert(tomb);
            *entry = (*entry).max(tomb);
        }
        removed
    }

    /// Set the optimistic view of an object.
    pub fn set_overlay(&mut self, object: CanvasObject) {
        self.overlay.insert(object.id, Overlay::Present(object));
    }

    /// Hide an object locally pending server confirmation of its removal.
    pub fn mark_removed(&mut self, id: Uuid) {
        self.overlay.insert(id, Overlay::Removed);
    }

    /// Drop the optimistic view, falling back to the confirmed object.
    pub fn clear_overlay(&mut self, id: &Uuid) -> Option<Overlay> {
        self.overlay.remove(id)
    }

    /// Move every layer of `from` under `to`. Used when the server assigns a
    /// different id than the provisional client id.
    pub fn rekey(&mut self, from: &Uuid, to: Uuid) {
        if let Some(mut obj) = self.confirmed.remove(from) {
            obj.id = to;
            self.confirmed.insert(to, obj);
        }
        if let Some(overlay) = self.overlay.remove(from) {
            let overlay = match overlay {
                Overlay::Present(mut obj) => {
                    obj.id = to;
                    Overlay::Present(obj)
                }
                Overlay::Removed => Overlay::Removed,
            };
            self.overlay.insert(to, overlay);
        }
    }

    /// All visible objects, insertion order irrelevant.
    #[must_use]
    pub fn list(&self) -> Vec<&CanvasObject> {
        let mut out: Vec<&CanvasObject> = self
            .confirmed
            .values()
            .filter(|obj| !self.overlay.contains_key(&obj.id))
            .collect();
        out.extend(self.overlay.values().filter_map(|overlay| match overlay {
            Overlay::Present(obj) => Some(obj),
            Overlay::Removed => None,
        }));
        out
    }

    /// Visible objects sorted by `(z_index, id)` for draw order.
    #[must_use]
    pub fn list_sorted(&self) -> Vec<&CanvasObject> {
        let mut objs = self.list();
        objs.sort_by(|a, b| a.z_index.cmp(&b.z_index).then_with(|| a.id.cmp(&b.id)));
        objs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
