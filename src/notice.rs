//! UI-facing notices.
//!
//! Everything the UI layer needs to render sync state comes through here:
//! the optimistic indicator, retry spinners, terminal outcomes, conflicts,
//! auth prompts and connection changes. No terminal mutation state is
//! reported any other way.

use std::time::Duration;

use uuid::Uuid;

use crate::channel::ChannelState;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    /// Optimistic edit applied locally; show the pending indicator.
    Pending { op_id: Uuid, object_id: Uuid },
    /// Transient failure, another attempt follows after `delay`.
    Retrying { op_id: Uuid, object_id: Uuid, attempt: u32, delay: Duration },
    /// Server accepted the mutation; clear the indicator.
    Confirmed { op_id: Uuid, object_id: Uuid, version: i64 },
    /// Terminal or held failure. `retryable` means a retry action makes sense.
    Failed { op_id: Uuid, object_id: Uuid, kind: ErrorKind, retryable: bool },
    /// Local optimistic state was discarded.
    RolledBack { op_id: Uuid, object_id: Uuid },
    /// A substantive local edit lost to a newer server version.
    Conflict { object_id: Uuid, winning_version: i64 },
    /// Dispatch is blocked until a fresh token arrives.
    AuthenticationRequired,
    ConnectionChanged { from: ChannelState, to: ChannelState },
    /// Outbound broadcast dropped because the offline queue was full.
    BroadcastDropped { capacity: usize },
}
