//! Pending mutation state machine.
//!
//! Status is an explicit tagged variant so every transition is matched
//! exhaustively:
//!
//! ```text
//! Queued -> InFlight -> Confirmed
//!                    -> Failed(kind) -> RolledBack
//!                    -> Failed(AuthenticationRequired) -> Queued (token refresh)
//! Queued -> RolledBack (cancel, conflict)
//! ```

use std::time::Instant;

use uuid::Uuid;

use crate::error::ErrorKind;
use crate::object::{CanvasObject, ObjectPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Queued,
    InFlight,
    Confirmed,
    Failed(ErrorKind),
    RolledBack,
}

impl MutationStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::RolledBack)
    }
}

/// What a mutation asks the server to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    Create(CanvasObject),
    Update(ObjectPatch),
    Delete,
}

impl MutationOp {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }

    /// Creates and deletes always count as substantive.
    #[must_use]
    pub fn is_substantive(&self) -> bool {
        match self {
            Self::Create(_) | Self::Delete => true,
            Self::Update(patch) => patch.is_substantive(),
        }
    }
}

/// Result of folding a later local edit into a queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Coalesced {
    Merged(MutationOp),
    /// A never-sent create followed by a delete: nothing to submit.
    Cancelled,
}

/// Fold `later` into `earlier`. Returns `None` for sequences that can't be
/// expressed as one mutation.
///
/// A queued create has never reached the server, so a following delete
/// cancels both.
pub(crate) fn coalesce(earlier: MutationOp, later: MutationOp) -> Option<Coalesced> {
    match (earlier, later) {
        (MutationOp::Update(mut a), MutationOp::Update(b)) => {
            a.merge(&b);
            Some(Coalesced::Merged(MutationOp::Update(a)))
        }
        (MutationOp::Create(mut obj), MutationOp::Update(patch)) => {
            patch.apply_to(&mut obj);
            Some(Coalesced::Merged(MutationOp::Create(obj)))
        }
        (MutationOp::Create(_), MutationOp::Delete) => Some(Coalesced::Cancelled),
        (MutationOp::Update(_), MutationOp::Delete) => Some(Coalesced::Merged(MutationOp::Delete)),
        // Anything after a delete, or a second create, is not a valid sequence.
        (MutationOp::Delete, _) | (_, MutationOp::Create(_)) => None,
    }
}

#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub op_id: Uuid,
    pub object_id: Uuid,
    pub op: MutationOp,
    /// Submission order across all objects; used to replay deferred work in order.
    pub seq: u64,
    pub submitted_at: Instant,
    pub retry_count: u32,
    /// Confirmed version the edit was based on (`expected_version` on the wire).
    pub base_version: i64,
    pub status: MutationStatus,
    /// Set while a 401 keeps the mutation parked waiting for a fresh token.
    pub held_until: Option<Instant>,
}

impl PendingMutation {
    #[must_use]
    pub fn new(object_id: Uuid, op: MutationOp, base_version: i64, seq: u64, now: Instant) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            object_id,
            op,
            seq,
            submitted_at: now,
            retry_count: 0,
            base_version,
            status: MutationStatus::Queued,
            held_until: None,
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held_until.is_some()
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
