//! REST transport over reqwest.
//!
//! ERROR HANDLING
//! ==============
//! HTTP status codes are classified once, here, into the `SyncError`
//! taxonomy. Nothing above this layer inspects raw statuses:
//!
//! - 401 -> `AuthenticationRequired`, 403 -> `AuthorizationDenied`
//! - 409 -> `VersionConflict` (with the server's current object if sent)
//! - 429 -> `RateLimited` (honouring `Retry-After` seconds)
//! - 404 -> `UnknownObject`, 400/422 -> `ValidationFailure`
//! - 408 and 5xx -> `NetworkFailure`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{MutationRequest, ServerAck, Transport};
use crate::error::SyncError;
use crate::object::{CanvasObject, ObjectKind, ObjectPatch};
use crate::pending::MutationOp;
use crate::session::Credential;

#[derive(Serialize)]
struct CreateBody<'a> {
    canvas_id: Uuid,
    object_type: ObjectKind,
    properties: &'a CanvasObject,
    operation_id: Uuid,
    client_id: Uuid,
}

#[derive(Serialize)]
struct PatchBody<'a> {
    operation_id: Uuid,
    patch: &'a ObjectPatch,
    expected_version: i64,
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport rooted at `base_url` (e.g. `"http://127.0.0.1:3000"`).
    ///
    /// # Errors
    ///
    /// Returns `NetworkFailure` if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, request: &MutationRequest, credential: &Credential) -> Result<ServerAck, SyncError> {
        let builder = match &request.op {
            MutationOp::Create(object) => self.client.post(self.url("/api/objects")).json(&CreateBody {
                canvas_id: request.canvas_id,
                object_type: object.kind,
                properties: object,
                operation_id: request.op_id,
                client_id: request.object_id,
            }),
            MutationOp::Update(patch) => self
                .client
                .patch(self.url(&format!("/api/objects/{}", request.object_id)))
                .json(&PatchBody {
                    operation_id: request.op_id,
                    patch,
                    expected_version: request.expected_version,
                }),
            MutationOp::Delete => self
                .client
                .delete(self.url(&format!("/api/objects/{}", request.object_id)))
                .query(&[
                    ("operation_id", request.op_id.to_string()),
                    ("expected_version", request.expected_version.to_string()),
                ]),
        };

        let response = credential.attach(builder).send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response.text().await?;
        debug!(op_id = %request.op_id, op = request.op.name(), status = status.as_u16(), "mutation response");

        if !status.is_success() {
            return Err(classify_status(status, retry_after, &body, request.object_id));
        }
        parse_ack(&request.op, request.expected_version, &body)
    }
}

/// Map a non-success HTTP status into the error taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    object_id: Uuid,
) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED => SyncError::AuthenticationRequired,
        StatusCode::FORBIDDEN => SyncError::AuthorizationDenied,
        StatusCode::CONFLICT => SyncError::VersionConflict { current: parse_conflict_body(body).map(Box::new) },
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited { retry_after },
        StatusCode::NOT_FOUND => SyncError::UnknownObject(object_id),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::ValidationFailure(error_message(body).unwrap_or_else(|| status.to_string()))
        }
        StatusCode::REQUEST_TIMEOUT => SyncError::NetworkFailure(status.to_string()),
        s if s.is_server_error() => SyncError::NetworkFailure(format!("server returned {s}")),
        s => SyncError::ValidationFailure(format!("unexpected status {s}")),
    }
}

fn parse_ack(op: &MutationOp, expected_version: i64, body: &str) -> Result<ServerAck, SyncError> {
    match op {
        MutationOp::Create(_) | MutationOp::Update(_) => serde_json::from_str::<CanvasObject>(body)
            .map(ServerAck::object)
            .map_err(|e| SyncError::NetworkFailure(format!("malformed server object: {e}"))),
        MutationOp::Delete => {
            let version = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("version").and_then(serde_json::Value::as_i64))
                .unwrap_or(expected_version + 1);
            Ok(ServerAck::deleted(version))
        }
    }
}

/// 409 bodies carry the winning object either bare or under `"current"`.
fn parse_conflict_body(body: &str) -> Option<CanvasObject> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    let current = value.get("current").cloned().unwrap_or(value);
    serde_json::from_value(current).ok()
}

fn error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    let secs = value?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
