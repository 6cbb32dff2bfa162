//! Client-side synchronization core for a collaborative canvas.
//!
//! Local edits render immediately as optimistic overlays, are coalesced per
//! object, and are submitted with versioned, idempotent requests. Server
//! acknowledgements and realtime broadcasts from peers merge into one
//! version-ordered object store.
//!
//! `engine::SyncEngine` is the synchronous core. `client::SyncClient` runs it
//! inside a tokio actor wired to an HTTP transport and a WebSocket.

pub mod batch;
pub mod channel;
pub mod client;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod frame;
pub mod notice;
pub mod object;
pub mod optimistic;
pub mod pending;
pub mod presence;
pub mod retry;
pub mod session;
pub mod store;
pub mod transport;
pub mod ws;

pub use channel::{ChannelState, RemoteEvent};
pub use client::{CanvasView, ClientError, SyncClient};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{ErrorCode, ErrorKind, SyncError};
pub use notice::SyncNotice;
pub use object::{CanvasObject, ObjectKind, ObjectPatch};
pub use optimistic::{LocalChange, MutationHandle};
pub use pending::MutationStatus;
pub use session::{CanvasSession, Credential};
pub use transport::{HttpTransport, Transport};
