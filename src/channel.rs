//! Real-time broadcast channel.
//!
//! DESIGN
//! ======
//! The connection lifecycle is a pure reducer, `transition(state, event)`,
//! so every edge is testable without a socket. `BroadcastChannel` wraps it
//! with heartbeat bookkeeping and the outbound queue; the `ws` task owns the
//! actual socket and only reports events in and carries frames out.
//!
//! Outbound object events produced while offline wait in a bounded FIFO and
//! flush in order on reconnect. When the FIFO is full the new event is
//! dropped with a warning. Cursor moves are ephemeral and never queued.
//! Object events the socket failed to write come back through `requeue`.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::frame::{self, Frame, Status};
use crate::object::CanvasObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connecting,
    Connected,
    Degraded,
    Disconnected,
}

impl ChannelState {
    /// Mutations and broadcasts go out only on a live channel.
    #[must_use]
    pub fn allows_dispatch(self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    HandshakeOk,
    HeartbeatMissed,
    HeartbeatResumed,
    Closed,
    HeartbeatFailed,
    ReconnectAttempt,
}

/// Connection lifecycle reducer. Unlisted pairs leave the state unchanged.
#[must_use]
pub fn transition(state: ChannelState, event: ChannelEvent) -> ChannelState {
    use ChannelEvent as E;
    use ChannelState as S;

    match (state, event) {
        (_, E::Closed | E::HeartbeatFailed) => S::Disconnected,
        (S::Connecting, E::HandshakeOk) => S::Connected,
        (S::Connected, E::HeartbeatMissed) => S::Degraded,
        (S::Degraded, E::HeartbeatResumed) => S::Connected,
        (S::Disconnected, E::ReconnectAttempt) => S::Connecting,
        (s, _) => s,
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Typed view of an inbound or outbound realtime frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    ObjectCreated { object: CanvasObject, operation_id: Option<Uuid> },
    ObjectUpdated { object: CanvasObject, operation_id: Option<Uuid> },
    ObjectDeleted { id: Uuid, version: Option<i64>, operation_id: Option<Uuid> },
    CursorMoved { user_id: Uuid, name: Option<String>, x: f64, y: f64 },
    PresenceJoined { user_id: Uuid, name: Option<String> },
    PresenceLeft { user_id: Uuid },
    /// Server accepted the `session:auth` handshake.
    SessionConnected,
    Heartbeat,
}

impl RemoteEvent {
    /// Parse an inbound frame. Presence events fall back to the frame sender
    /// when the payload has no `user_id`.
    ///
    /// # Errors
    ///
    /// - `AuthenticationRequired` when the server refused `session:auth`
    /// - `ValidationFailure` for other error replies, unknown syscalls or
    ///   malformed payloads
    pub fn from_frame(frame: &Frame) -> Result<Self, SyncError> {
        let data = &frame.data;
        if frame.status == Status::Error {
            if frame.syscall == frame::SESSION_AUTH {
                return Err(SyncError::AuthenticationRequired);
            }
            let message = opt_string(data, "message").unwrap_or_else(|| "request failed".to_owned());
            return Err(SyncError::validation(format!("{} failed: {message}", frame.syscall)));
        }
        let operation_id = opt_uuid(data, "operation_id");
        let event = match frame.syscall.as_str() {
            frame::OBJECT_CREATED => Self::ObjectCreated { object: object_field(data)?, operation_id },
            frame::OBJECT_UPDATED => Self::ObjectUpdated { object: object_field(data)?, operation_id },
            frame::OBJECT_DELETED => Self::ObjectDeleted {
                id: opt_uuid(data, "id").ok_or_else(|| SyncError::validation("object:deleted without id"))?,
                version: data.get("version").and_then(Value::as_i64),
                operation_id,
            },
            frame::CURSOR_MOVED => Self::CursorMoved {
                user_id: user_of(frame)?,
                name: opt_string(data, "name"),
                x: data.get("x").and_then(Value::as_f64).unwrap_or(0.0),
                y: data.get("y").and_then(Value::as_f64).unwrap_or(0.0),
            },
            frame::PRESENCE_JOINED => Self::PresenceJoined { user_id: user_of(frame)?, name: opt_string(data, "name") },
            frame::PRESENCE_LEFT => Self::PresenceLeft { user_id: user_of(frame)? },
            frame::SESSION_CONNECTED => Self::SessionConnected,
            frame::SESSION_HEARTBEAT => Self::Heartbeat,
            other => return Err(SyncError::validation(format!("unknown syscall {other}"))),
        };
        Ok(event)
    }

    /// Render as an outbound frame from `user_id` on `canvas_id`.
    #[must_use]
    pub fn to_frame(&self, canvas_id: Uuid, user_id: Uuid) -> Frame {
        let (syscall, data) = match self {
            Self::ObjectCreated { object, operation_id } => {
                (frame::OBJECT_CREATED, json!({ "object": object, "operation_id": operation_id }))
            }
            Self::ObjectUpdated { object, operation_id } => {
                (frame::OBJECT_UPDATED, json!({ "object": object, "operation_id": operation_id }))
            }
            Self::ObjectDeleted { id, version, operation_id } => {
                (frame::OBJECT_DELETED, json!({ "id": id, "version": version, "operation_id": operation_id }))
            }
            Self::CursorMoved { user_id, name, x, y } => {
                (frame::CURSOR_MOVED, json!({ "user_id": user_id, "name": name, "x": x, "y": y }))
            }
            Self::PresenceJoined { user_id, name } => {
                (frame::PRESENCE_JOINED, json!({ "user_id": user_id, "name": name }))
            }
            Self::PresenceLeft { user_id } => (frame::PRESENCE_LEFT, json!({ "user_id": user_id })),
            Self::SessionConnected => (frame::SESSION_CONNECTED, json!({})),
            Self::Heartbeat => (frame::SESSION_HEARTBEAT, json!({})),
        };
        Frame::request(syscall, data).with_canvas(canvas_id).with_from(user_id)
    }

    /// Cursor moves are worthless once stale.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::CursorMoved { .. })
    }
}

fn object_field(data: &Value) -> Result<CanvasObject, SyncError> {
    let raw = data.get("object").cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(|e| SyncError::validation(format!("malformed object payload: {e}")))
}

fn opt_uuid(data: &Value, key: &str) -> Option<Uuid> {
    data.get(key).and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
}

fn opt_string(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn is_object_frame(f: &Frame) -> bool {
    matches!(f.syscall.as_str(), frame::OBJECT_CREATED | frame::OBJECT_UPDATED | frame::OBJECT_DELETED)
}

fn user_of(frame: &Frame) -> Result<Uuid, SyncError> {
    opt_uuid(&frame.data, "user_id")
        .or_else(|| frame.sender())
        .ok_or_else(|| SyncError::validation(format!("{} without user", frame.syscall)))
}

// =============================================================================
// CHANNEL
// =============================================================================

/// What happened to a local broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Sent,
    Queued,
    /// Offline queue full; the event was dropped.
    Dropped,
    /// Ephemeral event produced while offline.
    Discarded,
}

/// A state change `(from, to)`.
pub type Transition = (ChannelState, ChannelState);

#[derive(Debug)]
pub struct BroadcastChannel {
    state: ChannelState,
    ready: Vec<Frame>,
    queued: VecDeque<Frame>,
    capacity: usize,
    heartbeat_interval: Duration,
    max_missed: u32,
    last_inbound: Instant,
    missed: u32,
}

impl BroadcastChannel {
    #[must_use]
    pub fn new(capacity: usize, heartbeat_interval: Duration, max_missed: u32, now: Instant) -> Self {
        Self {
            state: ChannelState::Connecting,
            ready: Vec::new(),
            queued: VecDeque::new(),
            capacity,
            heartbeat_interval,
            max_missed: max_missed.max(1),
            last_inbound: now,
            missed: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Feed a lifecycle event. Returns the change, if any. Reaching a live
    /// state flushes the offline queue in original order.
    pub fn apply(&mut self, event: ChannelEvent, now: Instant) -> Option<Transition> {
        let from = self.state;
        let to = transition(from, event);
        if from == to {
            return None;
        }
        self.state = to;
        debug!(%from, %to, ?event, "channel transition");
        if to == ChannelState::Connected && from != ChannelState::Degraded {
            self.missed = 0;
            self.last_inbound = now;
        }
        if to.allows_dispatch() && !self.queued.is_empty() {
            debug!(count = self.queued.len(), "flushing queued broadcasts");
            self.ready.extend(self.queued.drain(..));
        }
        Some((from, to))
    }

    /// Any inbound frame counts as a heartbeat.
    pub fn on_inbound(&mut self, now: Instant) -> Option<Transition> {
        self.last_inbound = now;
        self.missed = 0;
        if self.state == ChannelState::Degraded {
            return self.apply(ChannelEvent::HeartbeatResumed, now);
        }
        None
    }

    /// Count missed heartbeats on a live channel. Fails the channel after
    /// `max_missed` consecutive misses.
    pub fn check_heartbeat(&mut self, now: Instant) -> Option<Transition> {
        if !self.state.allows_dispatch() {
            return None;
        }
        let deadline = self.heartbeat_interval * (self.missed + 1);
        if now.saturating_duration_since(self.last_inbound) < deadline {
            return None;
        }
        self.missed += 1;
        if self.missed >= self.max_missed {
            warn!(missed = self.missed, "heartbeat failed");
            self.apply(ChannelEvent::HeartbeatFailed, now)
        } else {
            self.apply(ChannelEvent::HeartbeatMissed, now)
        }
    }

    /// Broadcast a confirmed local change to peers.
    pub fn broadcast_local(&mut self, event: &RemoteEvent, canvas_id: Uuid, user_id: Uuid) -> Outbound {
        if self.state.allows_dispatch() {
            self.ready.push(event.to_frame(canvas_id, user_id));
            return Outbound::Sent;
        }
        if event.is_ephemeral() {
            return Outbound::Discarded;
        }
        if self.queued.len() >= self.capacity {
            warn!(capacity = self.capacity, "outbound broadcast queue full; dropping event");
            return Outbound::Dropped;
        }
        self.queued.push_back(event.to_frame(canvas_id, user_id));
        Outbound::Queued
    }

    /// Take back frames the socket never wrote, ahead of anything queued
    /// since. Only object events survive; auth is re-sent on open and
    /// heartbeats and cursors are stale. Returns how many object events
    /// were dropped for lack of room.
    pub fn requeue(&mut self, frames: Vec<Frame>) -> usize {
        let mut kept: Vec<Frame> = frames.into_iter().filter(is_object_frame).collect();
        let room = if self.state.allows_dispatch() {
            self.capacity.saturating_sub(self.ready.len())
        } else {
            self.capacity.saturating_sub(self.queued.len())
        };
        let dropped = kept.len().saturating_sub(room);
        kept.truncate(room);
        if dropped > 0 {
            warn!(dropped, capacity = self.capacity, "no room to requeue unsent broadcasts");
        }
        debug!(count = kept.len(), "requeued unsent broadcasts");
        if self.state.allows_dispatch() {
            self.ready.splice(0..0, kept);
        } else {
            for f in kept.into_iter().rev() {
                self.queued.push_front(f);
            }
        }
        dropped
    }

    /// Protocol frames (`session:auth`) bypass the state gate.
    pub fn send_control(&mut self, frame: Frame) {
        self.ready.push(frame);
    }

    /// Frames ready for the socket, in order.
    pub fn take_ready(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.ready)
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
