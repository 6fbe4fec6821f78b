//! Resilient multi-device pub/sub session manager.
//!
//! Keeps one realtime channel per signed-in user alive across flaky
//! networks, app backgrounding, and device sleep, so every device of a user
//! sees the others' changes promptly without the app layer worrying about
//! reconnects.
//!
//! The moving parts:
//!
//! - **Provider boundary** (`provider`): the [`PubSubProvider`]/[`Channel`]
//!   traits any realtime backend implements, plus an in-process
//!   [`MemoryProvider`] hub
//! - **Session actor** (`session`): channel lifecycle, capped exponential
//!   reconnect backoff, heartbeat monitoring, presence-gated broadcasts
//! - **Host bridge** (`host`): visibility/network signals from the embedder
//!   that revive a dormant session immediately
//! - **Config** (`config`): policy constants with canonical defaults and
//!   `PEERSYNC_*` environment overrides
//!
//! ```no_run
//! use std::sync::Arc;
//! use peersync::{HostBridge, MemoryProvider, SyncConfig, SyncEvent, SyncSession};
//!
//! # async fn demo() {
//! let host = HostBridge::new();
//! let session = SyncSession::spawn(
//!     Arc::new(MemoryProvider::new()),
//!     host.clone(),
//!     SyncConfig::default(),
//! );
//!
//! let mut events = session.events();
//! session.subscribe("user-123");
//! session
//!     .broadcast(SyncEvent::new("tasks_changed", serde_json::json!({})))
//!     .await;
//! # }
//! ```

pub mod config;
pub mod host;
pub mod provider;
pub mod session;

pub use config::SyncConfig;
pub use host::{HostBridge, HostSignal};
pub use provider::memory::MemoryProvider;
pub use provider::{
    Channel, ChannelEvent, ChannelOptions, ChannelStatus, OpenedChannel, PresenceMeta,
    ProviderError, PubSubProvider, SyncEvent,
};
pub use session::backoff::ReconnectPolicy;
pub use session::state::SessionState;
pub use session::{SessionEvent, SessionSnapshot, SyncSession};
