//! Mutation transport seam.
//!
//! The engine never talks to the network directly. A `Transport` turns one
//! `MutationRequest` into one server acknowledgement or a classified
//! `SyncError`; retries, timeouts and backoff live above it in `retry`.

pub mod http;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::object::CanvasObject;
use crate::pending::MutationOp;
use crate::session::Credential;

pub use http::HttpTransport;

/// One network submission of a pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    /// Client operation id, identical across retries for idempotence.
    pub op_id: Uuid,
    pub object_id: Uuid,
    pub canvas_id: Uuid,
    pub op: MutationOp,
    pub expected_version: i64,
}

/// Server acknowledgement of an accepted mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerAck {
    /// Canonical object after the mutation. `None` for deletes.
    pub object: Option<CanvasObject>,
    /// Version assigned by the server.
    pub version: i64,
}

impl ServerAck {
    #[must_use]
    pub fn object(object: CanvasObject) -> Self {
        let version = object.version;
        Self { object: Some(object), version }
    }

    #[must_use]
    pub fn deleted(version: i64) -> Self {
        Self { object: None, version }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit one mutation. Implementations attach the credential and map
    /// every failure into the `SyncError` taxonomy.
    async fn submit(&self, request: &MutationRequest, credential: &Credential) -> Result<ServerAck, SyncError>;
}
