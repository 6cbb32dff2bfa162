//! Realtime wire frames and their protobuf codec.
//!
//! Frames travel as binary protobuf over the WebSocket. The payload stays a
//! flexible JSON value (`data`) encoded through `prost_types::Value`, so new
//! event fields never require a schema change.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const OBJECT_CREATED: &str = "object:created";
pub const OBJECT_UPDATED: &str = "object:updated";
pub const OBJECT_DELETED: &str = "object:deleted";
pub const CURSOR_MOVED: &str = "cursor:moved";
pub const PRESENCE_JOINED: &str = "presence:joined";
pub const PRESENCE_LEFT: &str = "presence:left";
pub const SESSION_AUTH: &str = "session:auth";
pub const SESSION_CONNECTED: &str = "session:connected";
pub const SESSION_HEARTBEAT: &str = "session:heartbeat";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Client-originated frame.
    Request,
    /// Server fan-out of another client's change.
    Item,
    /// Terminal reply to a request.
    Done,
    /// Failed reply; `data.message` says why.
    Error,
}

impl Status {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Request => WireFrameStatus::Request as i32,
            Self::Done => WireFrameStatus::Done as i32,
            Self::Error => WireFrameStatus::Error as i32,
            Self::Item => WireFrameStatus::Item as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireFrameStatus::try_from(value) {
            Ok(WireFrameStatus::Request) => Ok(Self::Request),
            Ok(WireFrameStatus::Done) => Ok(Self::Done),
            Ok(WireFrameStatus::Error) => Ok(Self::Error),
            Ok(WireFrameStatus::Item) => Ok(Self::Item),
            Err(_) => Err(CodecError::InvalidStatus(value)),
        }
    }
}

/// A single message on the realtime channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
    pub canvas_id: Option<String>,
    /// Sender user id, if any.
    pub from: Option<String>,
    /// Namespaced event name, e.g. `"object:updated"`.
    pub syscall: String,
    pub status: Status,
    pub data: Value,
}

impl Frame {
    /// New client-originated frame stamped with a fresh id and the current time.
    #[must_use]
    pub fn request(syscall: &str, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            canvas_id: None,
            from: None,
            syscall: syscall.to_owned(),
            status: Status::Request,
            data,
        }
    }

    #[must_use]
    pub fn with_canvas(mut self, canvas_id: Uuid) -> Self {
        self.canvas_id = Some(canvas_id.to_string());
        self
    }

    #[must_use]
    pub fn with_from(mut self, user_id: Uuid) -> Self {
        self.from = Some(user_id.to_string());
        self
    }

    /// Sender as a UUID, when present and well-formed.
    #[must_use]
    pub fn sender(&self) -> Option<Uuid> {
        self.from.as_deref().and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = WireFrame {
        id: frame.id.clone(),
        parent_id: frame.parent_id.clone(),
        ts: frame.ts,
        canvas_id: frame.canvas_id.clone(),
        from: frame.from.clone(),
        syscall: frame.syscall.clone(),
        status: frame.status.as_i32(),
        data: Some(json_to_proto(&frame.data)),
    };
    // Encoding into a growable Vec can't run out of buffer.
    wire.encode_to_vec()
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidStatus`] for unknown status values.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    Ok(Frame {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        canvas_id: wire.canvas_id,
        from: wire.from,
        syscall: wire.syscall,
        status: Status::from_i32(wire.status)?,
        data: wire.data.map_or(Value::Object(Map::new()), |v| proto_to_json(&v)),
    })
}

fn json_to_proto(value: &Value) -> prost_types::Value {
    use prost_types::value::Kind;

    let kind = match value {
        Value::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
        Value::Bool(v) => Kind::BoolValue(*v),
        Value::Number(v) => Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => Kind::StringValue(v.clone()),
        Value::Array(v) => Kind::ListValue(prost_types::ListValue { values: v.iter().map(json_to_proto).collect() }),
        Value::Object(v) => Kind::StructValue(prost_types::Struct {
            fields: v.iter().map(|(k, v)| (k.clone(), json_to_proto(v))).collect(),
        }),
    };
    prost_types::Value { kind: Some(kind) }
}

fn proto_to_json(value: &prost_types::Value) -> Value {
    use prost_types::value::Kind;

    let Some(kind) = &value.kind else {
        return Value::Null;
    };
    match kind {
        Kind::NullValue(_) => Value::Null,
        // Integral numbers come back as integers so ids and versions keep their JSON type.
        Kind::NumberValue(v) => number_to_json(*v),
        Kind::StringValue(v) => Value::String(v.clone()),
        Kind::BoolValue(v) => Value::Bool(*v),
        Kind::StructValue(v) => Value::Object(v.fields.iter().map(|(k, v)| (k.clone(), proto_to_json(v))).collect()),
        Kind::ListValue(v) => Value::Array(v.values.iter().map(proto_to_json).collect()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_json(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 {
        return Value::from(v as i64);
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    canvas_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    syscall: String,
    #[prost(enumeration = "WireFrameStatus", tag = "7")]
    status: i32,
    #[prost(message, optional, tag = "8")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireFrameStatus {
    Request = 0,
    Done = 1,
    Error = 2,
    Item = 4,
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
