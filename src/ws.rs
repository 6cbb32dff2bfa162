//! WebSocket pump.
//!
//! The socket task owns the connection and nothing else. It reports
//! lifecycle events and decoded frames to the client actor and writes
//! whatever frames the actor hands it. Reconnects back off from 1s,
//! doubling up to 10s. The actor can also ask for a fresh connection when
//! heartbeats fail on a socket that never closed.
//!
//! Frames that never reached the server go back to the actor as
//! `ChannelInput::Unsent` before the next `Opened`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::channel::ChannelEvent;
use crate::frame::{self, Frame, decode_frame, encode_frame};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 256;
const CONTROL_CAPACITY: usize = 4;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the socket task reports to the actor.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelInput {
    /// Socket is open; authenticate before anything else.
    Opened,
    Frame(Frame),
    Lifecycle(ChannelEvent),
    /// Frames handed over for a connection that dropped before writing them.
    Unsent(Vec<Frame>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCommand {
    /// Drop the current connection and go through the reconnect path.
    Reconnect,
}

/// Actor side of a socket task.
#[derive(Debug)]
pub struct SocketLink {
    pub events: mpsc::Receiver<ChannelInput>,
    pub outbound: mpsc::Sender<Frame>,
    pub control: mpsc::Sender<SocketCommand>,
}

/// Socket-task side of a [`SocketLink`] with no task behind it.
#[derive(Debug)]
pub struct SocketPeer {
    pub events: mpsc::Sender<ChannelInput>,
    pub frames: mpsc::Receiver<Frame>,
    pub commands: mpsc::Receiver<SocketCommand>,
}

impl SocketLink {
    /// A link whose other end goes to the caller, which plays the socket.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, SocketPeer) {
        let (event_tx, events) = mpsc::channel(capacity);
        let (outbound, frames) = mpsc::channel(capacity);
        let (control, commands) = mpsc::channel(CONTROL_CAPACITY);
        (Self { events, outbound, control }, SocketPeer { events: event_tx, frames, commands })
    }
}

enum Exit {
    /// Server closed or the stream ended.
    Closed,
    /// The actor asked for a new connection.
    Dropped,
    /// The actor went away.
    Shutdown,
}

/// Spawn the connect/reconnect loop for `url`.
#[must_use]
pub fn spawn_socket(url: String, heartbeat_interval: Duration, outbound_capacity: usize) -> (SocketLink, JoinHandle<()>) {
    let (event_tx, events) = mpsc::channel(EVENT_CAPACITY);
    let (outbound, out_rx) = mpsc::channel(outbound_capacity.max(1));
    let (control, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let peer = SocketPeer { events: event_tx, frames: out_rx, commands: control_rx };
    let handle = tokio::spawn(socket_loop(url, heartbeat_interval, peer));
    (SocketLink { events, outbound, control }, handle)
}

async fn socket_loop(url: String, heartbeat_interval: Duration, peer: SocketPeer) {
    let SocketPeer { events, frames: mut outbound, mut commands } = peer;
    let mut backoff = INITIAL_BACKOFF;
    let mut first = true;
    let mut unsent = Vec::new();

    loop {
        if !first && events.send(ChannelInput::Lifecycle(ChannelEvent::ReconnectAttempt)).await.is_err() {
            return;
        }
        first = false;

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(%url, "websocket connected");
                backoff = INITIAL_BACKOFF;

                // Frames written for the previous connection predate its auth;
                // the actor requeues what is worth keeping.
                while let Ok(frame) = outbound.try_recv() {
                    unsent.push(frame);
                }
                while commands.try_recv().is_ok() {}
                if !unsent.is_empty() {
                    debug!(count = unsent.len(), "returning frames from previous connection");
                    if events.send(ChannelInput::Unsent(std::mem::take(&mut unsent))).await.is_err() {
                        return;
                    }
                }

                if events.send(ChannelInput::Opened).await.is_err() {
                    return;
                }
                let io = Io { events: &events, outbound: &mut outbound, commands: &mut commands, unsent: &mut unsent };
                match run_connection(stream, io, heartbeat_interval).await {
                    Ok(Exit::Shutdown) => return,
                    Ok(Exit::Closed) => info!("websocket closed by server"),
                    Ok(Exit::Dropped) => info!("websocket dropped for reconnect"),
                    Err(e) => warn!(error = %e, "websocket error"),
                }
            }
            Err(e) => warn!(%url, error = %e, "websocket connect failed"),
        }

        if events.send(ChannelInput::Lifecycle(ChannelEvent::Closed)).await.is_err() {
            return;
        }

        debug!(backoff_ms = backoff.as_millis(), "reconnecting after backoff");
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            () = events.closed() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

struct Io<'a> {
    events: &'a mpsc::Sender<ChannelInput>,
    outbound: &'a mut mpsc::Receiver<Frame>,
    commands: &'a mut mpsc::Receiver<SocketCommand>,
    /// Receives a frame whose write failed.
    unsent: &'a mut Vec<Frame>,
}

async fn run_connection(stream: WsStream, io: Io<'_>, heartbeat_interval: Duration) -> Result<Exit, tungstenite::Error> {
    let Io { events, outbound, commands, unsent } = io;
    let (mut write, mut read) = stream.split();
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            message = read.next() => match message {
                None | Some(Ok(Message::Close(_))) => return Ok(Exit::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(Message::Binary(bytes))) => match decode_frame(&bytes) {
                    Ok(frame) => {
                        if events.send(ChannelInput::Frame(frame)).await.is_err() {
                            return Ok(Exit::Shutdown);
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping undecodable frame"),
                },
                Some(Ok(_)) => {}
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write.send(Message::Binary(encode_frame(&frame).into())).await {
                        unsent.push(frame);
                        return Err(e);
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                }
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Reconnect) => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Exit::Dropped);
                }
                None => return Ok(Exit::Shutdown),
            },
            _ = ticker.tick() => {
                let ping = Frame::request(frame::SESSION_HEARTBEAT, serde_json::json!({}));
                write.send(Message::Binary(encode_frame(&ping).into())).await?;
            }
        }
    }
}
