//! Async sync client.
//!
//! ARCHITECTURE
//! ============
//! One tokio task owns the `SyncEngine`. Everything that can change sync
//! state arrives as a message on one of its inputs:
//!
//! - commands from `SyncClient` handles (local edits, token refresh, ...)
//! - completions from spawned submit tasks (retry notices, final results)
//! - `ChannelInput` from the socket task
//! - a housekeeping ticker
//!
//! After every message the actor pumps the engine: due mutations are
//! spawned as submit tasks, ready frames go to the socket, notices go out on
//! a broadcast channel. Frames the socket can't take right now go back to
//! the engine and are retried on the next pump. Submit tasks never touch state directly, so an
//! acknowledgement and a remote event for the same object are always
//! applied one after the other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::ChannelState;
use crate::config::SyncConfig;
use crate::engine::{Dispatch, SyncEngine};
use crate::error::SyncError;
use crate::frame::{Frame, now_ms};
use crate::notice::SyncNotice;
use crate::object::CanvasObject;
use crate::optimistic::{LocalChange, MutationHandle};
use crate::pending::MutationStatus;
use crate::presence::PresenceEntry;
use crate::retry::submit_with_retry;
use crate::session::{CanvasSession, Credential};
use crate::transport::{ServerAck, Transport};
use crate::ws::{ChannelInput, SocketCommand, SocketLink};

const COMMAND_CAPACITY: usize = 256;
const NOTICE_CAPACITY: usize = 1024;
const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("sync client stopped")]
    Stopped,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Point-in-time view for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasView {
    /// Visible objects, bottom to top.
    pub objects: Vec<CanvasObject>,
    pub connection: ChannelState,
    pub peers: Vec<PresenceEntry>,
    pub pending_objects: usize,
}

enum Command {
    LoadSnapshot(Vec<CanvasObject>),
    Apply { change: LocalChange, reply: oneshot::Sender<Result<MutationHandle, SyncError>> },
    EndGesture(Uuid),
    Cancel { object_id: Uuid, reply: oneshot::Sender<bool> },
    RetryFailed { op_id: Uuid, reply: oneshot::Sender<Result<MutationHandle, SyncError>> },
    RefreshToken(Credential),
    Cursor { x: f64, y: f64 },
    Status { op_id: Uuid, reply: oneshot::Sender<Option<MutationStatus>> },
    View { reply: oneshot::Sender<CanvasView> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Completion {
    Retrying { op_id: Uuid, attempt: u32, delay: Duration },
    Done { op_id: Uuid, result: Result<ServerAck, SyncError> },
}

/// Cloneable handle to a running sync actor.
#[derive(Clone)]
pub struct SyncClient {
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<SyncNotice>,
}

impl SyncClient {
    /// Spawn the actor. `link` is the socket side; without one the client
    /// stays in `Connecting` and only queues work.
    #[must_use]
    pub fn spawn(
        config: SyncConfig,
        session: CanvasSession,
        transport: Arc<dyn Transport>,
        link: Option<SocketLink>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let (socket_events, outbound, control) = match link {
            Some(link) => (Some(link.events), Some(link.outbound), Some(link.control)),
            None => (None, None, None),
        };
        let actor = Actor {
            engine: SyncEngine::new(config.clone(), session, Instant::now()),
            config,
            transport,
            completions: completion_tx,
            outbound,
            control,
            notices: notices.clone(),
        };
        let handle = tokio::spawn(actor.run(command_rx, completion_rx, socket_events));
        (Self { commands, notices }, handle)
    }

    /// Notices emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    /// Seed the confirmed layer from an initial canvas fetch.
    ///
    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn load_snapshot(&self, objects: Vec<CanvasObject>) -> Result<(), ClientError> {
        self.send(Command::LoadSnapshot(objects)).await
    }

    /// Apply a local edit optimistically.
    ///
    /// # Errors
    ///
    /// The edit's validation error, or `Stopped`.
    pub async fn apply(&self, change: LocalChange) -> Result<MutationHandle, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Apply { change, reply }).await?;
        Ok(rx.await.map_err(|_| ClientError::Stopped)??)
    }

    /// Flush an object's batch window now (pointer up).
    ///
    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn end_gesture(&self, object_id: Uuid) -> Result<(), ClientError> {
        self.send(Command::EndGesture(object_id)).await
    }

    /// Discard queued edits for an object.
    ///
    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn cancel(&self, object_id: Uuid) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { object_id, reply }).await?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Resubmit a failed mutation under its original operation id.
    ///
    /// # Errors
    ///
    /// `UnknownOperation` when nothing retryable is recorded, or `Stopped`.
    pub async fn retry_failed(&self, op_id: Uuid) -> Result<MutationHandle, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RetryFailed { op_id, reply }).await?;
        Ok(rx.await.map_err(|_| ClientError::Stopped)??)
    }

    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn refresh_token(&self, credential: Credential) -> Result<(), ClientError> {
        self.send(Command::RefreshToken(credential)).await
    }

    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn move_cursor(&self, x: f64, y: f64) -> Result<(), ClientError> {
        self.send(Command::Cursor { x, y }).await
    }

    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn status(&self, op_id: Uuid) -> Result<Option<MutationStatus>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { op_id, reply }).await?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// # Errors
    ///
    /// `Stopped` when the actor is gone.
    pub async fn view(&self) -> Result<CanvasView, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::View { reply }).await?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Stop the actor. In-flight submissions finish but their results are
    /// discarded.
    ///
    /// # Errors
    ///
    /// `Stopped` when the actor is already gone.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).await.map_err(|_| ClientError::Stopped)
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct Actor {
    engine: SyncEngine,
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    completions: mpsc::UnboundedSender<Completion>,
    outbound: Option<mpsc::Sender<Frame>>,
    control: Option<mpsc::Sender<SocketCommand>>,
    notices: broadcast::Sender<SyncNotice>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut socket: Option<mpsc::Receiver<ChannelInput>>,
    ) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(canvas_id = %self.engine.session().canvas_id, "sync client started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None => break,
                    Some(Command::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
                input = next_input(&mut socket) => match input {
                    Some(input) => self.on_input(input),
                    None => {
                        warn!("socket task ended");
                        socket = None;
                        self.outbound = None;
                        self.control = None;
                    }
                },
                _ = ticker.tick() => self.engine.tick(Instant::now(), now_ms()),
            }
            self.pump();
        }
        info!("sync client stopped");
    }

    fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::LoadSnapshot(objects) => self.engine.load_snapshot(objects),
            Command::Apply { change, reply } => {
                let _ = reply.send(self.engine.apply_local(change, now));
            }
            Command::EndGesture(object_id) => self.engine.end_gesture(object_id),
            Command::Cancel { object_id, reply } => {
                let _ = reply.send(self.engine.cancel(object_id));
            }
            Command::RetryFailed { op_id, reply } => {
                let _ = reply.send(self.engine.retry_failed(op_id, now));
            }
            Command::RefreshToken(credential) => self.engine.refresh_token(credential),
            Command::Cursor { x, y } => self.engine.move_cursor(x, y),
            Command::Status { op_id, reply } => {
                let _ = reply.send(self.engine.status(&op_id));
            }
            Command::View { reply } => {
                let _ = reply.send(self.view());
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Retrying { op_id, attempt, delay } => self.engine.on_retrying(op_id, attempt, delay),
            Completion::Done { op_id, result } => self.engine.on_submit_result(op_id, result, Instant::now()),
        }
    }

    fn on_input(&mut self, input: ChannelInput) {
        let now = Instant::now();
        match input {
            ChannelInput::Opened => self.engine.on_socket_open(now_ms()),
            ChannelInput::Frame(frame) => self.engine.on_remote_frame(&frame, now, now_ms()),
            ChannelInput::Lifecycle(event) => self.engine.on_channel_event(event, now),
            ChannelInput::Unsent(frames) => self.engine.on_unsent(frames),
        }
    }

    fn view(&self) -> CanvasView {
        CanvasView {
            objects: self.engine.store().list_sorted().into_iter().cloned().collect(),
            connection: self.engine.channel_state(),
            peers: self.engine.presence().list().into_iter().cloned().collect(),
            pending_objects: self.engine.pending().pending_objects(),
        }
    }

    fn pump(&mut self) {
        for dispatch in self.engine.poll_dispatch(Instant::now(), now_ms()) {
            self.submit(dispatch);
        }
        let frames = self.engine.take_outbound();
        if let Some(outbound) = &self.outbound {
            let mut frames = frames.into_iter();
            let mut unsent = Vec::new();
            for frame in frames.by_ref() {
                if let Err(e) = outbound.try_send(frame) {
                    unsent.push(e.into_inner());
                    break;
                }
            }
            if !unsent.is_empty() {
                unsent.extend(frames);
                debug!(count = unsent.len(), "socket outbound busy; holding frames");
                self.engine.on_unsent(unsent);
            }
        }
        if self.engine.take_reconnect_request()
            && let Some(control) = &self.control
        {
            warn!("heartbeats failed; asking socket to reconnect");
            if let Err(e) = control.try_send(SocketCommand::Reconnect) {
                debug!(error = %e, "reconnect already pending");
            }
        }
        for notice in self.engine.take_notices() {
            // No subscribers is fine.
            let _ = self.notices.send(notice);
        }
    }

    fn submit(&self, dispatch: Dispatch) {
        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();
        let policy = self.config.retry;
        let timeout = self.config.request_timeout;
        let op_id = dispatch.request.op_id;
        debug!(%op_id, "spawning submission");

        tokio::spawn(async move {
            let retry_tx = completions.clone();
            let result = submit_with_retry(
                transport.as_ref(),
                &dispatch.request,
                &dispatch.credential,
                policy,
                timeout,
                |attempt, delay| {
                    let _ = retry_tx.send(Completion::Retrying { op_id, attempt, delay });
                },
            )
            .await;
            let _ = completions.send(Completion::Done { op_id, result });
        });
    }
}

/// Next socket input, or pending forever when there is no socket.
async fn next_input(socket: &mut Option<mpsc::Receiver<ChannelInput>>) -> Option<ChannelInput> {
    match socket {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
