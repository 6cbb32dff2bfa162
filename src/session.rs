//! Canvas session and auth guard.
//!
//! ARCHITECTURE
//! ============
//! The session is an explicit value owned by the engine, never ambient
//! state. It carries who we are, which canvas we're on, the bearer
//! credential issued by the identity provider, and the connection state
//! mirrored from the broadcast channel.
//!
//! Token issuance and refresh happen outside this crate; the session only
//! consumes them through `refresh_token`, `validate` and `attach`.

use std::fmt;

use uuid::Uuid;

use crate::channel::ChannelState;
use crate::error::SyncError;
use crate::frame::now_ms;

/// Opaque bearer token plus optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    /// Milliseconds since the Unix epoch; `None` means no known expiry.
    expires_at_ms: Option<i64>,
}

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at_ms: Option<i64>) -> Self {
        Self { token: token.into(), expires_at_ms }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.token.is_empty() || self.expires_at_ms.is_some_and(|exp| now_ms >= exp)
    }

    /// Add `Authorization: Bearer <token>` to an outgoing request.
    #[must_use]
    pub fn attach(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Why dispatch is currently withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchBlock {
    Offline(ChannelState),
    Unauthenticated,
}

#[derive(Debug, Clone)]
pub struct CanvasSession {
    pub user_id: Uuid,
    pub canvas_id: Uuid,
    credential: Option<Credential>,
    connection: ChannelState,
    auth_prompted: bool,
}

impl CanvasSession {
    #[must_use]
    pub fn new(user_id: Uuid, canvas_id: Uuid, credential: Option<Credential>) -> Self {
        Self { user_id, canvas_id, credential, connection: ChannelState::Connecting, auth_prompted: false }
    }

    #[must_use]
    pub fn connection(&self) -> ChannelState {
        self.connection
    }

    pub fn set_connection(&mut self, state: ChannelState) {
        self.connection = state;
    }

    /// True when a present, unexpired token is available.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.validate_at(now_ms()).is_ok()
    }

    /// The current credential, if present and unexpired at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationRequired` when the token is absent or expired.
    pub fn validate_at(&self, now_ms: i64) -> Result<&Credential, SyncError> {
        match &self.credential {
            Some(cred) if !cred.is_expired_at(now_ms) => Ok(cred),
            _ => Err(SyncError::AuthenticationRequired),
        }
    }

    /// Attach the bearer token to `builder` if it is valid.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationRequired` when no valid token is available.
    pub fn attach(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, SyncError> {
        Ok(self.validate_at(now_ms())?.attach(builder))
    }

    /// Install a fresh token from the identity provider.
    pub fn refresh_token(&mut self, credential: Credential) {
        self.credential = Some(credential);
        self.auth_prompted = false;
    }

    /// Drop the token after the server rejected it.
    pub fn invalidate(&mut self) {
        self.credential = None;
    }

    /// Gate for network dispatch: connected (or degraded) and authenticated.
    ///
    /// # Errors
    ///
    /// Returns the reason dispatch is blocked.
    pub fn dispatch_credential(&self, now_ms: i64) -> Result<Credential, DispatchBlock> {
        if !self.connection.allows_dispatch() {
            return Err(DispatchBlock::Offline(self.connection));
        }
        self.validate_at(now_ms)
            .cloned()
            .map_err(|_| DispatchBlock::Unauthenticated)
    }

    /// Returns true the first time it is called in a blocked-auth period, so
    /// the "Authentication required" prompt is raised once, not per tick.
    pub fn take_auth_prompt(&mut self) -> bool {
        if self.auth_prompted {
            return false;
        }
        self.auth_prompted = true;
        true
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
