//! Session configuration.
//!
//! The retry cap, backoff shape, and heartbeat interval are policy
//! constants, not protocol requirements, so they are configurable here
//! with the canonical values as defaults. Environment overrides use the
//! `PEERSYNC_*` prefix.

use std::time::Duration;

use crate::session::backoff::ReconnectPolicy;

/// Default heartbeat self-check interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Default outbound event fan-out buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Configuration for a [`crate::session::SyncSession`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Topic family prefix; channels are named `"{prefix}:{user_id}"`.
    pub channel_prefix: String,
    /// Maximum automatic reconnect attempts before going dormant.
    pub max_reconnect_attempts: u32,
    /// First-retry backoff delay.
    pub reconnect_base: Duration,
    /// Backoff delay ceiling.
    pub reconnect_cap: Duration,
    /// Heartbeat self-check interval.
    pub heartbeat_interval: Duration,
    /// Capacity of the session event fan-out channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            channel_prefix: "sync".into(),
            max_reconnect_attempts: policy.max_attempts,
            reconnect_base: policy.base,
            reconnect_cap: policy.cap,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SyncConfig {
    /// Defaults with the given channel prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            channel_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Load defaults, then apply any `PEERSYNC_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("PEERSYNC_CHANNEL_PREFIX") {
            if !prefix.is_empty() {
                config.channel_prefix = prefix;
            }
        }
        if let Some(n) = env_u64("PEERSYNC_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = n as u32;
        }
        if let Some(ms) = env_u64("PEERSYNC_RECONNECT_BASE_MS") {
            config.reconnect_base = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("PEERSYNC_RECONNECT_CAP_MS") {
            config.reconnect_cap = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("PEERSYNC_HEARTBEAT_MS") {
            config.heartbeat_interval = Duration::from_millis(ms);
        }

        config
    }

    /// The reconnect policy this configuration describes.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: self.reconnect_base,
            cap: self.reconnect_cap,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

// ── Tests ────────────────────────────────────────────────────────
