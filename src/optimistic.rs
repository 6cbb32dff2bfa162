//! Optimistic update manager.
//!
//! ARCHITECTURE
//! ============
//! Every local edit lands in the store overlay immediately and becomes (or
//! folds into) a `PendingMutation`. Each object has a small queue:
//!
//! ```text
//! held       -- 401'd mutation parked until a token refresh or auth_hold
//! in_flight  -- at most one submission on the wire
//! next       -- coalesced successor, Queued
//! ```
//!
//! The overlay is always the projection of those three ops over the
//! confirmed object, so confirmation, rollback and conflict all reduce to
//! "update the queue, then re-project".
//!
//! INVARIANTS
//! ==========
//! - At most one in-flight mutation per object.
//! - Every mutation reaches a terminal status observable as a notice:
//!   `Confirmed`, or `Failed` followed by `RolledBack`.
//! - Operation ids are reused across retries and manual resubmission.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::RemoteEvent;
use crate::error::{ErrorCode, SyncError};
use crate::notice::SyncNotice;
use crate::object::{CanvasObject, ObjectPatch};
use crate::pending::{Coalesced, MutationOp, MutationStatus, PendingMutation, coalesce};
use crate::store::ObjectStore;
use crate::transport::ServerAck;

pub const DEFAULT_MAX_OFFLINE_MUTATIONS: usize = 256;
pub const DEFAULT_AUTH_HOLD: Duration = Duration::from_secs(60);

const SETTLED_HISTORY: usize = 1024;
const FAILED_HISTORY: usize = 256;

/// A user edit as the UI expresses it.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    Create(CanvasObject),
    Update { id: Uuid, patch: ObjectPatch },
    Delete { id: Uuid },
}

impl LocalChange {
    #[must_use]
    pub fn object_id(&self) -> Uuid {
        match self {
            Self::Create(obj) => obj.id,
            Self::Update { id, .. } | Self::Delete { id } => *id,
        }
    }

    fn into_op(self) -> MutationOp {
        match self {
            Self::Create(obj) => MutationOp::Create(obj),
            Self::Update { patch, .. } => MutationOp::Update(patch),
            Self::Delete { .. } => MutationOp::Delete,
        }
    }
}

/// Returned to the UI so it can track the optimistic indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationHandle {
    pub op_id: Uuid,
    pub object_id: Uuid,
}

/// Result of a successful confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    /// Object id after any server re-key.
    pub object_id: Uuid,
    /// Server already held a newer version; the ack lost.
    pub stale: bool,
    pub rekeyed_from: Option<Uuid>,
    /// Event to fan out to peers when the ack was applied.
    pub broadcast: Option<RemoteEvent>,
}

#[derive(Debug, Default)]
struct ObjectQueue {
    held: Option<PendingMutation>,
    in_flight: Option<PendingMutation>,
    next: Option<PendingMutation>,
}

impl ObjectQueue {
    fn is_empty(&self) -> bool {
        self.held.is_none() && self.in_flight.is_none() && self.next.is_none()
    }

    fn ops(&self) -> impl Iterator<Item = &MutationOp> {
        [&self.held, &self.in_flight, &self.next].into_iter().flatten().map(|m| &m.op)
    }

    fn find(&self, op_id: Uuid) -> Option<&PendingMutation> {
        [&self.held, &self.in_flight, &self.next].into_iter().flatten().find(|m| m.op_id == op_id)
    }
}

#[derive(Debug)]
pub struct OptimisticManager {
    queues: HashMap<Uuid, ObjectQueue>,
    by_op: HashMap<Uuid, Uuid>,
    failed: HashMap<Uuid, PendingMutation>,
    halted: HashSet<Uuid>,
    settled: VecDeque<(Uuid, MutationStatus)>,
    next_seq: u64,
    max_objects: usize,
    auth_hold: Duration,
    notices: Vec<SyncNotice>,
}

impl Default for OptimisticManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OFFLINE_MUTATIONS, DEFAULT_AUTH_HOLD)
    }
}

impl OptimisticManager {
    #[must_use]
    pub fn new(max_objects: usize, auth_hold: Duration) -> Self {
        Self {
            queues: HashMap::new(),
            by_op: HashMap::new(),
            failed: HashMap::new(),
            halted: HashSet::new(),
            settled: VecDeque::new(),
            next_seq: 0,
            max_objects,
            auth_hold,
            notices: Vec::new(),
        }
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Apply a local edit optimistically and queue it for submission.
    ///
    /// # Errors
    ///
    /// - `ValidationFailure` for malformed edits, duplicate creates, or edits
    ///   to a locally deleted object
    /// - `UnknownObject` when the target isn't on the canvas
    /// - `AuthorizationDenied` when the object is halted after a 403
    /// - `QueueFull` when too many objects already have pending work
    pub fn apply_local(
        &mut self,
        store: &mut ObjectStore,
        change: LocalChange,
        now: Instant,
    ) -> Result<MutationHandle, SyncError> {
        self.apply_with_id(store, change, now, None)
    }

    fn apply_with_id(
        &mut self,
        store: &mut ObjectStore,
        change: LocalChange,
        now: Instant,
        reuse_op_id: Option<Uuid>,
    ) -> Result<MutationHandle, SyncError> {
        let object_id = change.object_id();
        if self.halted.contains(&object_id) {
            return Err(SyncError::AuthorizationDenied);
        }
        self.check_change(store, &change)?;
        if !self.queues.contains_key(&object_id) && self.queues.len() >= self.max_objects {
            warn!(%object_id, capacity = self.max_objects, "pending queue full; rejecting edit");
            return Err(SyncError::QueueFull { capacity: self.max_objects });
        }

        let op = change.into_op();
        let base_version = store.confirmed(&object_id).map_or(0, |o| o.version);
        let queue = self.queues.entry(object_id).or_default();

        let handle = match queue.next.take() {
            Some(mut prev) => match coalesce(prev.op.clone(), op) {
                Some(Coalesced::Merged(merged)) => {
                    prev.op = merged;
                    let handle = MutationHandle { op_id: prev.op_id, object_id };
                    queue.next = Some(prev);
                    handle
                }
                Some(Coalesced::Cancelled) => {
                    let op_id = prev.op_id;
                    debug!(%object_id, %op_id, "unsent create cancelled by delete");
                    self.by_op.remove(&op_id);
                    self.settle(op_id, MutationStatus::RolledBack);
                    self.notices.push(SyncNotice::RolledBack { op_id, object_id });
                    self.reproject(store, object_id);
                    return Ok(MutationHandle { op_id, object_id });
                }
                None => {
                    queue.next = Some(prev);
                    return Err(SyncError::validation("edit conflicts with a queued delete"));
                }
            },
            None => {
                self.next_seq += 1;
                let mut mutation = PendingMutation::new(object_id, op, base_version, self.next_seq, now);
                if let Some(op_id) = reuse_op_id {
                    mutation.op_id = op_id;
                }
                let handle = MutationHandle { op_id: mutation.op_id, object_id };
                self.by_op.insert(mutation.op_id, object_id);
                queue.next = Some(mutation);
                handle
            }
        };

        self.reproject(store, object_id);
        self.notices.push(SyncNotice::Pending { op_id: handle.op_id, object_id });
        Ok(handle)
    }

    fn check_change(&self, store: &ObjectStore, change: &LocalChange) -> Result<(), SyncError> {
        match change {
            LocalChange::Create(obj) => {
                obj.validate()?;
                if store.get(&obj.id).is_some() || store.confirmed(&obj.id).is_some() || self.queues.contains_key(&obj.id) {
                    return Err(SyncError::validation(format!("object {} already exists", obj.id)));
                }
            }
            LocalChange::Update { id, patch } => {
                patch.validate()?;
                let mut preview = visible(store, id)?.clone();
                patch.apply_to(&mut preview);
                preview.validate()?;
            }
            LocalChange::Delete { id } => {
                visible(store, id)?;
            }
        }
        Ok(())
    }

    /// Drop queued (not in-flight) work for an object and restore the
    /// confirmed view. An uncommitted create disappears entirely.
    pub fn cancel(&mut self, store: &mut ObjectStore, object_id: Uuid) -> bool {
        let Some(queue) = self.queues.get_mut(&object_id) else {
            return false;
        };
        let dropped: Vec<PendingMutation> = [queue.held.take(), queue.next.take()].into_iter().flatten().collect();
        if dropped.is_empty() {
            return false;
        }
        for m in dropped {
            info!(%object_id, op_id = %m.op_id, "queued mutation cancelled");
            self.roll_back(m);
        }
        self.reproject(store, object_id);
        true
    }

    /// Resubmit a rolled-back mutation under its original operation id.
    ///
    /// # Errors
    ///
    /// - `UnknownOperation` when nothing retryable is recorded for `op_id`
    /// - `ValidationFailure` while the object has newer pending edits; the
    ///   mutation stays retryable until they settle
    /// - otherwise the same errors as [`Self::apply_local`]
    pub fn retry_failed(
        &mut self,
        store: &mut ObjectStore,
        op_id: Uuid,
        now: Instant,
    ) -> Result<MutationHandle, SyncError> {
        let object_id = self.failed.get(&op_id).ok_or(SyncError::UnknownOperation(op_id))?.object_id;
        if self.has_pending(&object_id) {
            debug!(%object_id, %op_id, "retry refused; newer edits pending");
            return Err(SyncError::validation("a newer edit supersedes this mutation"));
        }
        let mutation = self.failed.remove(&op_id).ok_or(SyncError::UnknownOperation(op_id))?;
        let change = match mutation.op.clone() {
            MutationOp::Create(obj) => LocalChange::Create(obj),
            MutationOp::Update(patch) => LocalChange::Update { id: object_id, patch },
            MutationOp::Delete => LocalChange::Delete { id: object_id },
        };
        match self.apply_with_id(store, change, now, Some(op_id)) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.failed.insert(op_id, mutation);
                Err(err)
            }
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Objects with a mutation ready to send, in original submission order.
    #[must_use]
    pub fn dispatchable(&self) -> Vec<Uuid> {
        let mut ready: Vec<(u64, Uuid)> = self
            .queues
            .iter()
            .filter(|(_, q)| q.in_flight.is_none())
            .filter_map(|(id, q)| match (&q.held, &q.next) {
                (Some(h), _) if !h.is_held() => Some((h.seq, *id)),
                (Some(_), _) => None,
                (None, Some(n)) => Some((n.seq, *id)),
                (None, None) => None,
            })
            .collect();
        ready.sort_unstable();
        ready.into_iter().map(|(_, id)| id).collect()
    }

    /// Move the object's next mutation to in-flight and return a copy for
    /// submission. `None` while something is already in flight or held.
    pub fn take_for_dispatch(&mut self, object_id: Uuid) -> Option<PendingMutation> {
        let queue = self.queues.get_mut(&object_id)?;
        if queue.in_flight.is_some() {
            return None;
        }
        let from_held = match &queue.held {
            Some(h) if h.is_held() => return None,
            Some(_) => true,
            None => false,
        };
        let mut mutation = if from_held { queue.held.take()? } else { queue.next.take()? };
        mutation.status = MutationStatus::InFlight;
        queue.in_flight = Some(mutation.clone());
        Some(mutation)
    }

    /// Record a transient failure that the retry policy will retry.
    pub fn note_retry(&mut self, op_id: Uuid, attempt: u32, delay: Duration) {
        let Some(object_id) = self.by_op.get(&op_id).copied() else {
            return;
        };
        if let Some(m) = self.queues.get_mut(&object_id).and_then(|q| q.in_flight.as_mut()).filter(|m| m.op_id == op_id) {
            m.retry_count = attempt;
            self.notices.push(SyncNotice::Retrying { op_id, object_id, attempt, delay });
        }
    }

    // =========================================================================
    // SETTLEMENT
    // =========================================================================

    /// Apply a server acknowledgement for an in-flight mutation.
    ///
    /// # Errors
    ///
    /// `UnknownOperation` when `op_id` isn't in flight: a duplicate or late
    /// ack for something already settled. Callers treat that as a no-op.
    pub fn confirm(&mut self, store: &mut ObjectStore, op_id: Uuid, ack: ServerAck) -> Result<ConfirmOutcome, SyncError> {
        let mut object_id = self.in_flight_object(op_id).ok_or(SyncError::UnknownOperation(op_id))?;
        let mutation = self
            .queues
            .get_mut(&object_id)
            .and_then(|q| q.in_flight.take())
            .ok_or(SyncError::UnknownOperation(op_id))?;
        self.by_op.remove(&op_id);

        let mut rekeyed_from = None;
        let (stale, broadcast) = match ack.object {
            Some(server) => {
                if server.id != object_id {
                    self.rekey(store, object_id, server.id);
                    rekeyed_from = Some(object_id);
                    object_id = server.id;
                }
                let outcome = store.upsert(server.clone());
                let event = match mutation.op {
                    MutationOp::Create(_) => RemoteEvent::ObjectCreated { object: server, operation_id: Some(op_id) },
                    _ => RemoteEvent::ObjectUpdated { object: server, operation_id: Some(op_id) },
                };
                (!outcome.applied(), outcome.applied().then_some(event))
            }
            None => {
                store.remove(&object_id, Some(ack.version));
                let event = RemoteEvent::ObjectDeleted { id: object_id, version: Some(ack.version), operation_id: Some(op_id) };
                (false, Some(event))
            }
        };

        self.settle(op_id, MutationStatus::Confirmed);
        self.notices.push(SyncNotice::Confirmed { op_id, object_id, version: ack.version });

        if stale {
            let winning_version = store.confirmed(&object_id).map_or(ack.version, |o| o.version);
            warn!(%object_id, %op_id, ack_version = ack.version, winning_version, "stale confirmation");
            let dropped = self.drop_queued(object_id);
            if mutation.op.is_substantive() || dropped {
                self.notices.push(SyncNotice::Conflict { object_id, winning_version });
            }
        } else if let Some(next) = self.queues.get_mut(&object_id).and_then(|q| q.next.as_mut()) {
            next.base_version = ack.version;
        }

        self.reproject(store, object_id);
        Ok(ConfirmOutcome { object_id, stale, rekeyed_from, broadcast })
    }

    /// Apply a terminal or held failure for an in-flight mutation.
    ///
    /// # Errors
    ///
    /// `UnknownOperation` when `op_id` isn't in flight.
    pub fn reject(&mut self, store: &mut ObjectStore, op_id: Uuid, error: &SyncError, now: Instant) -> Result<(), SyncError> {
        let object_id = self.in_flight_object(op_id).ok_or(SyncError::UnknownOperation(op_id))?;
        let Some(queue) = self.queues.get_mut(&object_id) else {
            return Err(SyncError::UnknownOperation(op_id));
        };
        let Some(mut mutation) = queue.in_flight.take() else {
            return Err(SyncError::UnknownOperation(op_id));
        };
        let kind = error.kind();
        warn!(%object_id, %op_id, code = error.error_code(), error = %error, "mutation rejected");
        mutation.status = MutationStatus::Failed(kind);
        self.notices.push(SyncNotice::Failed { op_id, object_id, kind, retryable: error.retryable() });

        match error {
            SyncError::AuthenticationRequired => {
                mutation.held_until = Some(now + self.auth_hold);
                queue.held = Some(mutation);
            }
            SyncError::VersionConflict { current } => {
                let substantive = mutation.op.is_substantive();
                self.roll_back(mutation);
                let dropped = self.drop_queued(object_id);
                if let Some(current) = current {
                    store.upsert((**current).clone());
                }
                if substantive || dropped {
                    let winning_version = store.confirmed(&object_id).map_or(0, |o| o.version);
                    self.notices.push(SyncNotice::Conflict { object_id, winning_version });
                }
            }
            SyncError::AuthorizationDenied => {
                self.roll_back(mutation);
                self.drop_queued(object_id);
                self.halted.insert(object_id);
            }
            SyncError::UnknownObject(_) => {
                self.roll_back(mutation);
                self.drop_queued(object_id);
                store.remove(&object_id, None);
            }
            _ => {
                let was_create = matches!(mutation.op, MutationOp::Create(_));
                if error.retryable() {
                    self.remember_failed(mutation.clone());
                }
                self.roll_back(mutation);
                if was_create {
                    self.drop_queued(object_id);
                }
            }
        }

        self.reproject(store, object_id);
        Ok(())
    }

    /// Roll back auth-held mutations whose hold expired.
    pub fn expire_held(&mut self, store: &mut ObjectStore, now: Instant) -> usize {
        let expired: Vec<Uuid> = self
            .queues
            .iter()
            .filter(|(_, q)| q.held.as_ref().and_then(|h| h.held_until).is_some_and(|until| now >= until))
            .map(|(id, _)| *id)
            .collect();
        for object_id in &expired {
            info!(%object_id, "auth hold expired; rolling back");
            self.drop_queued(*object_id);
            self.reproject(store, *object_id);
        }
        expired.len()
    }

    /// A fresh token arrived: held mutations become dispatchable again and
    /// halted objects are editable again.
    pub fn release_held(&mut self) -> usize {
        let mut released = 0;
        for queue in self.queues.values_mut() {
            if let Some(h) = queue.held.as_mut().filter(|h| h.is_held()) {
                h.held_until = None;
                h.status = MutationStatus::Queued;
                released += 1;
            }
        }
        self.halted.clear();
        released
    }

    // =========================================================================
    // CONFLICT HOOKS
    // =========================================================================

    /// Lowest base version among pending mutations for an object.
    #[must_use]
    pub fn base_version(&self, object_id: &Uuid) -> Option<i64> {
        self.queues.get(object_id)?.ops_base().min()
    }

    #[must_use]
    pub fn has_pending(&self, object_id: &Uuid) -> bool {
        self.queues.get(object_id).is_some_and(|q| !q.is_empty())
    }

    /// True when `op_id` is this client's in-flight mutation.
    #[must_use]
    pub fn is_in_flight(&self, op_id: &Uuid) -> bool {
        self.in_flight_object(*op_id).is_some()
    }

    /// Discard held and queued edits that lost to a newer remote version.
    /// Returns whether any discarded edit was substantive.
    pub fn discard_queued(&mut self, store: &mut ObjectStore, object_id: Uuid) -> Option<bool> {
        let queue = self.queues.get(&object_id)?;
        let substantive = [&queue.held, &queue.next].into_iter().flatten().any(|m| m.op.is_substantive());
        let any = queue.held.is_some() || queue.next.is_some();
        self.drop_queued(object_id);
        self.reproject(store, object_id);
        any.then_some(substantive)
    }

    /// Forget all pending work for an object deleted remotely, including
    /// the in-flight mutation. Its late result is ignored as unknown.
    pub fn forget_object(&mut self, object_id: Uuid) -> bool {
        let Some(mut queue) = self.queues.remove(&object_id) else {
            return false;
        };
        let dropped: Vec<PendingMutation> =
            [queue.held.take(), queue.in_flight.take(), queue.next.take()].into_iter().flatten().collect();
        let any = !dropped.is_empty();
        for m in dropped {
            self.roll_back(m);
        }
        any
    }

    /// Re-project the overlay for an object from its pending ops.
    pub fn reproject(&mut self, store: &mut ObjectStore, object_id: Uuid) {
        let empty = match self.queues.get(&object_id) {
            Some(queue) => {
                project(store, object_id, queue.ops());
                queue.is_empty()
            }
            None => {
                store.clear_overlay(&object_id);
                true
            }
        };
        if empty {
            self.queues.remove(&object_id);
        }
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Current or recently settled status of a mutation.
    #[must_use]
    pub fn status(&self, op_id: &Uuid) -> Option<MutationStatus> {
        if let Some(m) = self.by_op.get(op_id).and_then(|id| self.queues.get(id)).and_then(|q| q.find(*op_id)) {
            return Some(m.status);
        }
        self.settled.iter().rev().find(|(id, _)| id == op_id).map(|(_, s)| *s)
    }

    /// Snapshot of a pending mutation by operation id.
    #[must_use]
    pub fn pending(&self, op_id: &Uuid) -> Option<&PendingMutation> {
        self.by_op.get(op_id).and_then(|id| self.queues.get(id)).and_then(|q| q.find(*op_id))
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.queues.values().filter(|q| q.in_flight.is_some()).count()
    }

    #[must_use]
    pub fn pending_objects(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn is_halted(&self, object_id: &Uuid) -> bool {
        self.halted.contains(object_id)
    }

    pub fn take_notices(&mut self) -> Vec<SyncNotice> {
        std::mem::take(&mut self.notices)
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn in_flight_object(&self, op_id: Uuid) -> Option<Uuid> {
        let object_id = *self.by_op.get(&op_id)?;
        let queue = self.queues.get(&object_id)?;
        queue.in_flight.as_ref().filter(|m| m.op_id == op_id).map(|_| object_id)
    }

    /// Drop held and next. Returns whether any substantive edit was dropped.
    fn drop_queued(&mut self, object_id: Uuid) -> bool {
        let Some(queue) = self.queues.get_mut(&object_id) else {
            return false;
        };
        let dropped: Vec<PendingMutation> = [queue.held.take(), queue.next.take()].into_iter().flatten().collect();
        let substantive = dropped.iter().any(|m| m.op.is_substantive());
        for m in dropped {
            self.roll_back(m);
        }
        substantive
    }

    fn roll_back(&mut self, mutation: PendingMutation) {
        self.by_op.remove(&mutation.op_id);
        self.settle(mutation.op_id, MutationStatus::RolledBack);
        self.notices.push(SyncNotice::RolledBack { op_id: mutation.op_id, object_id: mutation.object_id });
    }

    fn settle(&mut self, op_id: Uuid, status: MutationStatus) {
        if self.settled.len() >= SETTLED_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back((op_id, status));
    }

    fn remember_failed(&mut self, mutation: PendingMutation) {
        if self.failed.len() >= FAILED_HISTORY
            && let Some(oldest) = self.failed.values().min_by_key(|m| m.seq).map(|m| m.op_id)
        {
            self.failed.remove(&oldest);
        }
        self.failed.insert(mutation.op_id, mutation);
    }

    fn rekey(&mut self, store: &mut ObjectStore, from: Uuid, to: Uuid) {
        debug!(%from, %to, "server assigned new object id");
        store.rekey(&from, to);
        if let Some(mut queue) = self.queues.remove(&from) {
            for m in [&mut queue.held, &mut queue.in_flight, &mut queue.next].into_iter().flatten() {
                m.object_id = to;
                self.by_op.insert(m.op_id, to);
            }
            self.queues.insert(to, queue);
        }
    }
}

impl ObjectQueue {
    fn ops_base(&self) -> impl Iterator<Item = i64> + '_ {
        [&self.held, &self.in_flight, &self.next].into_iter().flatten().map(|m| m.base_version)
    }
}

/// The object as the user currently sees it.
fn visible<'a>(store: &'a ObjectStore, id: &Uuid) -> Result<&'a CanvasObject, SyncError> {
    match store.get(id) {
        Some(obj) => Ok(obj),
        None if store.has_overlay(id) => Err(SyncError::validation(format!("object {id} is deleted"))),
        None => Err(SyncError::UnknownObject(*id)),
    }
}

/// Overlay = pending ops applied in order over the confirmed object.
fn project<'a>(store: &mut ObjectStore, id: Uuid, ops: impl Iterator<Item = &'a MutationOp>) {
    let mut view = store.confirmed(&id).cloned();
    let mut touched = false;
    for op in ops {
        touched = true;
        match op {
            MutationOp::Create(obj) => view = Some(obj.clone()),
            MutationOp::Update(patch) => {
                if let Some(obj) = view.as_mut() {
                    patch.apply_to(obj);
                }
            }
            MutationOp::Delete => view = None,
        }
    }
    match (touched, view) {
        (false, _) => {
            store.clear_overlay(&id);
        }
        (true, Some(obj)) => store.set_overlay(obj),
        (true, None) => store.mark_removed(id),
    }
}

#[cfg(test)]
#[path = "optimistic_test.rs"]
mod tests;
