//! Pub/sub provider boundary.
//!
//! The session never talks to a concrete realtime backend directly; it
//! drives everything through the [`PubSubProvider`] and [`Channel`] traits
//! defined here. A provider hands back a channel handle plus a stream of
//! [`ChannelEvent`]s, and the session owns both exclusively.
//!
//! ## Design
//! - Provider status is a closed enum ([`ChannelStatus`]) dispatched through
//!   a single event queue, not a callback per status kind
//! - Channels are opened with self-echo disabled and presence keyed by a
//!   per-connection device id
//! - Delivery is at-least-once and unordered across reconnects; a reconnect
//!   is a clean break with no replay

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

// ── Status & events ──────────────────────────────────────────────

/// Lifecycle status a provider reports for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Join handshake in flight.
    Joining,
    /// Subscribed and receiving.
    Joined,
    /// The provider reported a channel-level error.
    ChannelError,
    /// The join or the connection timed out.
    TimedOut,
    /// The channel was closed.
    Closed,
}

impl ChannelStatus {
    /// Whether the channel is in a state worth keeping alive.
    pub fn is_healthy(self) -> bool {
        matches!(self, ChannelStatus::Joining | ChannelStatus::Joined)
    }
}

/// An application-defined sync event carried over a channel.
///
/// Payloads are hints to refetch, not the data itself — receivers should
/// treat them as cache-invalidation signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Event name (e.g., "tasks_changed").
    pub event: String,
    /// Structured payload.
    pub payload: serde_json::Value,
}

impl SyncEvent {
    /// Create a new sync event.
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Everything a provider can push to the session for one channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Status transition reported by the provider.
    Status(ChannelStatus),
    /// Broadcast from a peer device.
    Broadcast(SyncEvent),
    /// The presence roster changed; call [`Channel::presence_state`] for
    /// the fresh snapshot.
    PresenceSync,
}

// ── Channel configuration ────────────────────────────────────────

/// Options applied when opening a channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Whether the sender receives its own broadcasts back.
    pub self_echo: bool,
    /// Key under which this connection appears in the presence roster.
    pub presence_key: String,
}

/// Presence metadata announced via [`Channel::track`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMeta {
    /// Device id of the announcing connection.
    pub device_id: String,
    /// Epoch seconds when the device came online.
    pub online_at: i64,
}

// ── Errors ───────────────────────────────────────────────────────

/// Failures at the provider boundary.
///
/// None of these reach the session's callers; the session recovers or logs.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The channel is no longer joined.
    #[error("channel is not joined")]
    ChannelClosed,
    /// The provider refused to open the topic.
    #[error("topic {0:?} unavailable")]
    TopicUnavailable(String),
    /// A send was accepted locally but failed to go out.
    #[error("send failed: {0}")]
    SendFailed(String),
}

// ── Traits ───────────────────────────────────────────────────────

/// A live channel handle, exclusively owned by one session.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Announce local presence under the channel's presence key.
    async fn track(&self, meta: PresenceMeta) -> Result<(), ProviderError>;

    /// Fire-and-forget broadcast to the other subscribers of the topic.
    async fn send(&self, event: &SyncEvent) -> Result<(), ProviderError>;

    /// Current presence snapshot: presence key → metadata entries.
    fn presence_state(&self) -> HashMap<String, Vec<PresenceMeta>>;

    /// Status the provider currently believes the channel to be in.
    ///
    /// This is a local, non-blocking read — it is what the heartbeat
    /// monitor polls to catch disconnects the provider never reported.
    fn status(&self) -> ChannelStatus;
}

/// A freshly opened channel: the handle plus its event stream.
pub struct OpenedChannel {
    /// The channel handle.
    pub channel: Box<dyn Channel>,
    /// Events the provider pushes for this channel, in delivery order.
    pub events: mpsc::Receiver<ChannelEvent>,
}

impl std::fmt::Debug for OpenedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedChannel").finish_non_exhaustive()
    }
}

/// A pub/sub backend capable of opening named channels.
#[async_trait]
pub trait PubSubProvider: Send + Sync {
    /// Open a channel on the given topic.
    async fn open_channel(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> Result<OpenedChannel, ProviderError>;

    /// Tear down a channel handle. Idempotent.
    ///
    /// The default drops the handle; providers that need an explicit
    /// server round-trip override this.
    async fn destroy_channel(&self, channel: Box<dyn Channel>) {
        drop(channel);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_statuses() {
        assert!(ChannelStatus::Joining.is_healthy());
        assert!(ChannelStatus::Joined.is_healthy());
        assert!(!ChannelStatus::ChannelError.is_healthy());
        assert!(!ChannelStatus::TimedOut.is_healthy());
        assert!(!ChannelStatus::Closed.is_healthy());
    }

    #[test]
    fn status_serialization_is_snake_case() {
        let json = serde_json::to_string(&ChannelStatus::ChannelError).unwrap();
        assert_eq!(json, "\"channel_error\"");

        let parsed: ChannelStatus = serde_json::from_str("\"timed_out\"").unwrap();
        assert_eq!(parsed, ChannelStatus::TimedOut);
    }

    #[test]
    fn sync_event_round_trip() {
        let event = SyncEvent::new("tasks_changed", serde_json::json!({"list": "inbox"}));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("tasks_changed"));

        let parsed: SyncEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn provider_error_display() {
        let err = ProviderError::TopicUnavailable("sync:alice".into());
        assert!(err.to_string().contains("sync:alice"));
    }
}
