//! Error taxonomy for the sync core.
//!
//! DESIGN
//! ======
//! Every failure a mutation can hit is folded into one `SyncError` at the
//! transport boundary. `ErrorKind` is the copyable classification stored on
//! failed `PendingMutation`s and carried in notices; `ErrorCode` gives each
//! variant a grepable code and a retryable flag.
//!
//! Transient kinds (`RateLimited`, `NetworkFailure`) are retried by the
//! retry policy. Everything else is terminal and always surfaced.

use std::time::Duration;

use uuid::Uuid;

use crate::object::CanvasObject;

/// Grepable error code and retryable flag for surfaced errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// No bearer token, or the token expired or was rejected.
    #[error("authentication required")]
    AuthenticationRequired,
    /// Valid token, insufficient permission.
    #[error("authorization denied")]
    AuthorizationDenied,
    /// Stale write. `current` carries the server's winning object when it sent one.
    #[error("version conflict")]
    VersionConflict { current: Option<Box<CanvasObject>> },
    /// Backend throttling (429).
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    /// Transient transport or server failure (5xx, connect error, timeout).
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// Malformed payload, rejected before or at submission.
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    /// Offline mutation queue is at capacity.
    #[error("offline queue full (max {capacity} objects)")]
    QueueFull { capacity: usize },
    #[error("unknown object: {0}")]
    UnknownObject(Uuid),
    #[error("unknown operation: {0}")]
    UnknownOperation(Uuid),
}

/// Copyable classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthenticationRequired,
    AuthorizationDenied,
    VersionConflict,
    RateLimited,
    NetworkFailure,
    ValidationFailure,
    QueueFull,
    UnknownObject,
    UnknownOperation,
}

impl ErrorKind {
    /// Transient kinds are recovered locally by retrying.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::NetworkFailure)
    }
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationRequired => ErrorKind::AuthenticationRequired,
            Self::AuthorizationDenied => ErrorKind::AuthorizationDenied,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::NetworkFailure(_) => ErrorKind::NetworkFailure,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::UnknownObject(_) => ErrorKind::UnknownObject,
            Self::UnknownOperation(_) => ErrorKind::UnknownOperation,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailure(message.into())
    }
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "E_AUTH_REQUIRED",
            Self::AuthorizationDenied => "E_FORBIDDEN",
            Self::VersionConflict { .. } => "E_VERSION_CONFLICT",
            Self::RateLimited { .. } => "E_RATE_LIMITED",
            Self::NetworkFailure(_) => "E_NETWORK",
            Self::ValidationFailure(_) => "E_VALIDATION",
            Self::QueueFull { .. } => "E_QUEUE_FULL",
            Self::UnknownObject(_) => "E_UNKNOWN_OBJECT",
            Self::UnknownOperation(_) => "E_UNKNOWN_OPERATION",
        }
    }

    fn retryable(&self) -> bool {
        // Manual retry is offered for anything that might succeed later.
        matches!(
            self,
            Self::RateLimited { .. } | Self::NetworkFailure(_) | Self::AuthenticationRequired
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::NetworkFailure(format!("malformed server response: {err}"));
        }
        Self::NetworkFailure(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
