//! Host lifecycle signal bridge.
//!
//! Backgrounded runtimes can suspend timers for minutes, so the session
//! cannot rely on its own backoff clock alone. The embedder forwards
//! "visibility restored" and "network online" signals from wherever it gets
//! them (a webview, a desktop power event, a netlink watcher) into a
//! [`HostBridge`]; every subscribed session reacts with an immediate
//! reconnect attempt that bypasses the backoff delay.

use tokio::sync::broadcast;

/// Host signal fan-out capacity. Signals are rare; a small buffer is plenty.
const SIGNAL_BUFFER: usize = 16;

/// A host runtime signal that can revive a dormant session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// The app returned to the foreground.
    VisibilityRestored,
    /// The host regained network connectivity.
    NetworkOnline,
}

/// Broadcast source for host lifecycle signals.
///
/// Cheap to clone; clones share the same subscriber set. Sessions register
/// by subscribing and deregister by dropping their receiver, which keeps
/// listener bookkeeping leak-free by construction.
#[derive(Debug, Clone)]
pub struct HostBridge {
    tx: broadcast::Sender<HostSignal>,
}

impl HostBridge {
    /// Create a bridge with no listeners.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_BUFFER);
        Self { tx }
    }

    /// Signal that the app became visible again.
    pub fn visibility_restored(&self) {
        let _ = self.tx.send(HostSignal::VisibilityRestored);
    }

    /// Signal that the host came back online.
    pub fn network_online(&self) {
        let _ = self.tx.send(HostSignal::NetworkOnline);
    }

    /// Register a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.tx.subscribe()
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
