//! Conflict resolution for inbound object events.
//!
//! Last-confirmed-write-wins by version. Everything authoritative goes
//! through the store's version guard; this layer only decides what happens
//! to local pending work when a newer remote version lands:
//!
//! - an echo of our own in-flight op is that op's confirmation
//! - a newer remote version discards queued (unsent) edits; the in-flight
//!   one completes and is reconciled through the version guard
//! - a remote delete discards everything for the object
//!
//! No field-level merge is attempted.

use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::RemoteEvent;
use crate::notice::SyncNotice;
use crate::optimistic::OptimisticManager;
use crate::store::ObjectStore;
use crate::transport::ServerAck;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Applied to the confirmed layer without touching local edits.
    Applied,
    /// Not newer than what we hold; dropped.
    Stale,
    /// Echo of our own in-flight mutation, applied as its confirmation.
    /// `rekeyed_from` carries our provisional id when the server re-keyed a
    /// create.
    OwnEcho { object_id: Uuid, rekeyed_from: Option<Uuid> },
    /// A newer remote version replaced queued local edits.
    Superseded { object_id: Uuid, winning_version: i64, substantive: bool },
    /// Remote delete. `version` falls back to the last confirmed version
    /// when the event carries none. `discarded` when local pending work was
    /// dropped.
    Deleted { object_id: Uuid, version: Option<i64>, discarded: bool },
    /// Not an object event.
    NotObject,
}

impl Resolution {
    /// The conflict notice this resolution warrants, if any. Cosmetic
    /// losses are silent; deletes over pending work always notify.
    #[must_use]
    pub fn conflict_notice(&self) -> Option<SyncNotice> {
        match self {
            Self::Superseded { object_id, winning_version, substantive: true } => {
                Some(SyncNotice::Conflict { object_id: *object_id, winning_version: *winning_version })
            }
            Self::Deleted { object_id, version, discarded: true } => {
                Some(SyncNotice::Conflict { object_id: *object_id, winning_version: version.unwrap_or_default() })
            }
            _ => None,
        }
    }
}

/// Merge one inbound object event into the store and pending state.
pub fn resolve_remote(store: &mut ObjectStore, pending: &mut OptimisticManager, event: &RemoteEvent) -> Resolution {
    match event {
        RemoteEvent::ObjectCreated { object, operation_id } | RemoteEvent::ObjectUpdated { object, operation_id } => {
            if let Some(op_id) = operation_id.filter(|op| pending.is_in_flight(op))
                && let Ok(outcome) = pending.confirm(store, op_id, ServerAck::object(object.clone()))
            {
                debug!(%op_id, object_id = %outcome.object_id, "remote echo confirmed own mutation");
                return Resolution::OwnEcho { object_id: outcome.object_id, rekeyed_from: outcome.rekeyed_from };
            }

            let object_id = object.id;
            let winning_version = object.version;
            if !store.upsert(object.clone()).applied() {
                debug!(%object_id, version = winning_version, "stale remote event dropped");
                return Resolution::Stale;
            }
            let superseded = pending
                .base_version(&object_id)
                .is_some_and(|base| winning_version > base);
            if !superseded {
                pending.reproject(store, object_id);
                return Resolution::Applied;
            }
            match pending.discard_queued(store, object_id) {
                Some(substantive) => {
                    info!(%object_id, winning_version, substantive, "remote version superseded local edits");
                    Resolution::Superseded { object_id, winning_version, substantive }
                }
                None => Resolution::Applied,
            }
        }
        RemoteEvent::ObjectDeleted { id, version, operation_id } => {
            if let Some(op_id) = operation_id.filter(|op| pending.is_in_flight(op)) {
                let ack_version = version.unwrap_or_else(|| store.confirmed(id).map_or(1, |o| o.version + 1));
                if pending.confirm(store, op_id, ServerAck::deleted(ack_version)).is_ok() {
                    return Resolution::OwnEcho { object_id: *id, rekeyed_from: None };
                }
            }
            let last_confirmed = store.confirmed(id).map(|o| o.version);
            let discarded = pending.forget_object(*id);
            store.remove(id, *version);
            if discarded {
                info!(object_id = %id, "remote delete discarded local edits");
            }
            Resolution::Deleted { object_id: *id, version: version.or(last_confirmed), discarded }
        }
        _ => Resolution::NotObject,
    }
}

#[cfg(test)]
#[path = "conflict_test.rs"]
mod tests;
