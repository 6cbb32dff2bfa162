//! Sync engine: the single serialization point.
//!
//! ARCHITECTURE
//! ============
//! `SyncEngine` is synchronous and owns every piece of client-side sync
//! state: store, pending mutations, batch windows, session, channel and
//! presence. Local edits, server results, remote frames and timer ticks all
//! enter through `&mut self` methods, so no two of them ever interleave.
//! The async shell (`client`) only moves data in and out:
//!
//! ```text
//! apply_local / end_gesture   -> store overlay + pending queue + batch window
//! poll_dispatch               -> Vec<Dispatch> to submit
//! on_submit_result            -> confirm / reject
//! on_remote_frame             -> conflict layer or presence
//! take_notices / take_outbound
//! ```
//!
//! Dispatch rule: an object is sent when it has a dispatchable mutation and
//! no open batch window, in original submission order, and only while the
//! session is authenticated on a live channel.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::BatchCoordinator;
use crate::channel::{BroadcastChannel, ChannelEvent, ChannelState, Outbound, RemoteEvent};
use crate::config::SyncConfig;
use crate::conflict::{Resolution, resolve_remote};
use crate::error::SyncError;
use crate::frame::{self, Frame};
use crate::notice::SyncNotice;
use crate::object::CanvasObject;
use crate::optimistic::{LocalChange, MutationHandle, OptimisticManager};
use crate::pending::MutationStatus;
use crate::presence::PresenceMap;
use crate::session::{CanvasSession, Credential, DispatchBlock};
use crate::store::ObjectStore;
use crate::transport::{MutationRequest, ServerAck};

/// One submission the async shell should send.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub request: MutationRequest,
    pub credential: Credential,
}

#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    session: CanvasSession,
    store: ObjectStore,
    pending: OptimisticManager,
    batch: BatchCoordinator,
    channel: BroadcastChannel,
    presence: PresenceMap,
    notices: Vec<SyncNotice>,
    /// Heartbeats failed on a socket that may still be open.
    reconnect_requested: bool,
}

impl SyncEngine {
    #[must_use]
    pub fn new(config: SyncConfig, session: CanvasSession, now: Instant) -> Self {
        let channel = BroadcastChannel::new(
            config.outbound_capacity,
            config.heartbeat_interval,
            config.max_missed_heartbeats,
            now,
        );
        Self {
            pending: OptimisticManager::new(config.max_offline_mutations, config.auth_hold),
            batch: BatchCoordinator::new(config.flush_interval),
            store: ObjectStore::new(),
            presence: PresenceMap::new(),
            notices: Vec::new(),
            reconnect_requested: false,
            channel,
            session,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    #[must_use]
    pub fn session(&self) -> &CanvasSession {
        &self.session
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceMap {
        &self.presence
    }

    #[must_use]
    pub fn pending(&self) -> &OptimisticManager {
        &self.pending
    }

    #[must_use]
    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    #[must_use]
    pub fn status(&self, op_id: &Uuid) -> Option<MutationStatus> {
        self.pending.status(op_id)
    }

    /// Seed the confirmed layer from an initial canvas fetch.
    pub fn load_snapshot(&mut self, objects: impl IntoIterator<Item = CanvasObject>) {
        let mut loaded = 0usize;
        for object in objects {
            if self.store.upsert(object).applied() {
                loaded += 1;
            }
        }
        info!(canvas_id = %self.session.canvas_id, loaded, "canvas snapshot loaded");
    }

    // =========================================================================
    // LOCAL INPUT
    // =========================================================================

    /// Apply a local edit optimistically. Creates and deletes go out on the
    /// next dispatch; updates wait for their batch window.
    ///
    /// # Errors
    ///
    /// See [`OptimisticManager::apply_local`].
    pub fn apply_local(&mut self, change: LocalChange, now: Instant) -> Result<MutationHandle, SyncError> {
        let immediate = !matches!(change, LocalChange::Update { .. });
        let result = self.pending.apply_local(&mut self.store, change, now);
        if let Ok(handle) = &result {
            if !self.pending.has_pending(&handle.object_id) {
                self.batch.discard(&handle.object_id);
            } else if immediate {
                self.batch.schedule_ready(handle.object_id, handle.op_id, now);
            } else {
                self.batch.schedule(handle.object_id, handle.op_id, now);
            }
        }
        self.collect();
        result
    }

    /// Gesture finished (pointer up): flush the object without waiting.
    pub fn end_gesture(&mut self, object_id: Uuid) {
        self.batch.end_gesture(object_id);
    }

    /// Discard queued edits for an object (Escape mid-draw).
    pub fn cancel(&mut self, object_id: Uuid) -> bool {
        let cancelled = self.pending.cancel(&mut self.store, object_id);
        if cancelled {
            self.batch.discard(&object_id);
        }
        self.collect();
        cancelled
    }

    /// Resubmit a rolled-back mutation under its original operation id.
    ///
    /// # Errors
    ///
    /// See [`OptimisticManager::retry_failed`].
    pub fn retry_failed(&mut self, op_id: Uuid, now: Instant) -> Result<MutationHandle, SyncError> {
        let result = self.pending.retry_failed(&mut self.store, op_id, now);
        if let Ok(handle) = &result {
            self.batch.schedule_ready(handle.object_id, handle.op_id, now);
        }
        self.collect();
        result
    }

    /// Install a fresh token: held mutations and halted objects resume.
    pub fn refresh_token(&mut self, credential: Credential) {
        self.session.refresh_token(credential);
        let released = self.pending.release_held();
        info!(released, "token refreshed");
    }

    /// Broadcast our cursor. Dropped silently while offline.
    pub fn move_cursor(&mut self, x: f64, y: f64) {
        let event = RemoteEvent::CursorMoved { user_id: self.session.user_id, name: None, x, y };
        self.channel.broadcast_local(&event, self.session.canvas_id, self.session.user_id);
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Mutations ready to submit now, in original submission order.
    pub fn poll_dispatch(&mut self, now: Instant, now_ms: i64) -> Vec<Dispatch> {
        self.batch.drain_due(now);

        let credential = match self.session.dispatch_credential(now_ms) {
            Ok(credential) => credential,
            Err(DispatchBlock::Unauthenticated) => {
                if self.pending.pending_objects() > 0 && self.session.take_auth_prompt() {
                    warn!("dispatch blocked: authentication required");
                    self.notices.push(SyncNotice::AuthenticationRequired);
                }
                return Vec::new();
            }
            Err(DispatchBlock::Offline(state)) => {
                debug!(%state, "dispatch deferred while offline");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for object_id in self.pending.dispatchable() {
            if self.batch.is_scheduled(&object_id) {
                continue;
            }
            let Some(mutation) = self.pending.take_for_dispatch(object_id) else {
                continue;
            };
            debug!(op_id = %mutation.op_id, %object_id, op = mutation.op.name(), "dispatching mutation");
            out.push(Dispatch {
                request: MutationRequest {
                    op_id: mutation.op_id,
                    object_id,
                    canvas_id: self.session.canvas_id,
                    op: mutation.op,
                    expected_version: mutation.base_version,
                },
                credential: credential.clone(),
            });
        }
        out
    }

    /// A transient failure is being retried.
    pub fn on_retrying(&mut self, op_id: Uuid, attempt: u32, delay: Duration) {
        self.pending.note_retry(op_id, attempt, delay);
        self.collect();
    }

    /// Final outcome of a submission.
    pub fn on_submit_result(&mut self, op_id: Uuid, result: Result<ServerAck, SyncError>, now: Instant) {
        match result {
            Ok(ack) => match self.pending.confirm(&mut self.store, op_id, ack) {
                Ok(outcome) => {
                    if let Some(from) = outcome.rekeyed_from {
                        self.batch.rekey(&from, outcome.object_id);
                    }
                    if let Some(event) = outcome.broadcast {
                        self.broadcast(&event);
                    }
                }
                Err(err) => debug!(%op_id, error = %err, "ignoring ack for settled mutation"),
            },
            Err(error) => {
                if matches!(error, SyncError::AuthenticationRequired) {
                    self.session.invalidate();
                }
                if let Err(err) = self.pending.reject(&mut self.store, op_id, &error, now) {
                    debug!(%op_id, error = %err, "ignoring failure for settled mutation");
                }
            }
        }
        self.collect();
    }

    fn broadcast(&mut self, event: &RemoteEvent) {
        let outcome = self.channel.broadcast_local(event, self.session.canvas_id, self.session.user_id);
        if outcome == Outbound::Dropped {
            self.notices.push(SyncNotice::BroadcastDropped { capacity: self.config.outbound_capacity });
        }
    }

    // =========================================================================
    // CHANNEL INPUT
    // =========================================================================

    /// The socket opened: authenticate before anything else goes out.
    pub fn on_socket_open(&mut self, now_ms: i64) {
        let token = self
            .session
            .validate_at(now_ms)
            .map(|c| c.token().to_owned())
            .unwrap_or_default();
        let auth = Frame::request(frame::SESSION_AUTH, serde_json::json!({ "token": token }))
            .with_canvas(self.session.canvas_id)
            .with_from(self.session.user_id);
        self.channel.send_control(auth);
    }

    pub fn on_channel_event(&mut self, event: ChannelEvent, now: Instant) {
        if let Some((from, to)) = self.channel.apply(event, now) {
            self.on_transition(from, to);
        }
    }

    /// Frames the socket handed back without writing them.
    pub fn on_unsent(&mut self, frames: Vec<Frame>) {
        let dropped = self.channel.requeue(frames);
        if dropped > 0 {
            self.notices.push(SyncNotice::BroadcastDropped { capacity: self.config.outbound_capacity });
        }
    }

    fn on_transition(&mut self, from: ChannelState, to: ChannelState) {
        info!(%from, %to, "connection state changed");
        self.session.set_connection(to);
        self.notices.push(SyncNotice::ConnectionChanged { from, to });
    }

    /// Feed an inbound frame from the socket.
    pub fn on_remote_frame(&mut self, frame: &Frame, now: Instant, now_ms: i64) {
        if let Some((from, to)) = self.channel.on_inbound(now) {
            self.on_transition(from, to);
        }
        match RemoteEvent::from_frame(frame) {
            Ok(event) => self.on_remote_event(&event, now, now_ms),
            Err(SyncError::AuthenticationRequired) => {
                warn!("server rejected session:auth");
                self.session.invalidate();
                self.notices.push(SyncNotice::AuthenticationRequired);
            }
            Err(err) => warn!(syscall = %frame.syscall, error = %err, "dropping unreadable frame"),
        }
    }

    /// Merge one typed remote event.
    pub fn on_remote_event(&mut self, event: &RemoteEvent, now: Instant, now_ms: i64) {
        match event {
            RemoteEvent::SessionConnected => self.on_channel_event(ChannelEvent::HandshakeOk, now),
            RemoteEvent::Heartbeat => {}
            RemoteEvent::CursorMoved { user_id, name, x, y } => {
                self.presence.move_cursor(*user_id, name.clone(), *x, *y, now_ms);
            }
            RemoteEvent::PresenceJoined { user_id, name } => self.presence.join(*user_id, name.clone(), now_ms),
            RemoteEvent::PresenceLeft { user_id } => {
                self.presence.leave(user_id);
            }
            RemoteEvent::ObjectCreated { .. } | RemoteEvent::ObjectUpdated { .. } | RemoteEvent::ObjectDeleted { .. } => {
                let resolution = resolve_remote(&mut self.store, &mut self.pending, event);
                debug!(?resolution, "remote object event");
                if let Resolution::OwnEcho { object_id, rekeyed_from: Some(from) } = resolution {
                    self.batch.rekey(&from, object_id);
                }
                self.collect();
                if let Some(notice) = resolution.conflict_notice() {
                    self.notices.push(notice);
                }
            }
        }
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    /// Periodic housekeeping: heartbeats, auth-hold expiry, presence timeout.
    pub fn tick(&mut self, now: Instant, now_ms: i64) {
        if let Some((from, to)) = self.channel.check_heartbeat(now) {
            if to == ChannelState::Disconnected {
                self.reconnect_requested = true;
            }
            self.on_transition(from, to);
        }
        let expired = self.pending.expire_held(&mut self.store, now);
        if expired > 0 {
            info!(expired, "auth-held mutations expired");
        }
        let timeout = i64::try_from(self.config.presence_timeout.as_millis()).unwrap_or(i64::MAX);
        for user_id in self.presence.prune(now_ms, timeout) {
            debug!(%user_id, "presence timed out");
        }
        self.collect();
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    pub fn take_notices(&mut self) -> Vec<SyncNotice> {
        self.collect();
        std::mem::take(&mut self.notices)
    }

    /// Frames ready for the socket, in order.
    pub fn take_outbound(&mut self) -> Vec<Frame> {
        self.channel.take_ready()
    }

    /// True once after heartbeats fail: the socket must be dropped and
    /// reopened, since a silent connection never reports `Closed`.
    pub fn take_reconnect_request(&mut self) -> bool {
        std::mem::take(&mut self.reconnect_requested)
    }

    fn collect(&mut self) {
        self.notices.extend(self.pending.take_notices());
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
