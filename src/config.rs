//! Runtime configuration loaded from environment variables.
//!
//! Every knob has a compiled-in default; unset or unparsable values fall
//! back to it silently.

use std::time::Duration;

use crate::batch::DEFAULT_FLUSH_INTERVAL;
use crate::optimistic::{DEFAULT_AUTH_HOLD, DEFAULT_MAX_OFFLINE_MUTATIONS};
use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MAX_MISSED_HEARTBEATS: u32 = 3;
const DEFAULT_PRESENCE_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// REST base URL; the WebSocket URL is derived from it.
    pub base_url: String,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// How long a 401'd edit stays queued waiting for a fresh token.
    pub auth_hold: Duration,
    /// Objects allowed to hold pending work while offline.
    pub max_offline_mutations: usize,
    pub outbound_capacity: usize,
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
    pub presence_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Tests use this to avoid touching
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, default: u64| -> u64 { parse_or(&lookup, key, default) };
        let ms = |key: &str, default: Duration| -> Duration {
            Duration::from_millis(parse_or(&lookup, key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX)))
        };

        Self {
            base_url: lookup("SYNC_BASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            flush_interval: ms("SYNC_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL),
            retry: RetryPolicy {
                max_retries: parse_or(&lookup, "SYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                base_delay: ms("SYNC_RETRY_BASE_MS", DEFAULT_BASE_DELAY),
                max_delay: ms("SYNC_RETRY_MAX_MS", DEFAULT_MAX_DELAY),
            },
            request_timeout: Duration::from_millis(parse("SYNC_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)),
            auth_hold: Duration::from_secs(parse("SYNC_AUTH_HOLD_SECS", DEFAULT_AUTH_HOLD.as_secs())),
            max_offline_mutations: parse_or(&lookup, "SYNC_MAX_OFFLINE_MUTATIONS", DEFAULT_MAX_OFFLINE_MUTATIONS),
            outbound_capacity: parse_or(&lookup, "SYNC_OUTBOUND_CAPACITY", DEFAULT_OUTBOUND_CAPACITY),
            heartbeat_interval: Duration::from_millis(parse("SYNC_HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS)),
            max_missed_heartbeats: parse_or(&lookup, "SYNC_MAX_MISSED_HEARTBEATS", DEFAULT_MAX_MISSED_HEARTBEATS),
            presence_timeout: Duration::from_millis(parse("SYNC_PRESENCE_TIMEOUT_MS", DEFAULT_PRESENCE_TIMEOUT_MS)),
        }
    }

    /// `http(s)://host` -> `ws(s)://host/api/ws?canvas_id=<id>`.
    #[must_use]
    pub fn ws_url(&self, canvas_id: uuid::Uuid) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/api/ws?canvas_id={canvas_id}")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
