//! Session connection state machine.
//!
//! The reconnect logic used to live implicitly in a handful of counters and
//! timer fields; here it is a closed enum with one authoritative transition
//! function, so the invariants (one channel, one timer, dormancy after
//! exhaustion) stay mechanically checkable.

use serde::Serialize;

/// Connection lifecycle of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No user subscribed; fully quiescent.
    Disconnected,
    /// A channel open is in flight.
    Connecting,
    /// Channel joined and heartbeat running.
    Connected,
    /// A reconnect timer is armed.
    ReconnectPending,
    /// Retry budget spent; dormant until subscribe or a host signal.
    Exhausted,
}

/// Inputs that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInput {
    /// `subscribe()` accepted a (new) user.
    SubscribeRequested,
    /// The provider reported a successful join.
    StatusJoined,
    /// A reconnect timer was armed.
    ReconnectScheduled,
    /// The retry budget ran out.
    ReconnectExhausted,
    /// A reconnect fired (timer or immediate host-signal reconnect).
    ReconnectFired,
    /// `unsubscribe()` ran.
    Unsubscribed,
}

impl SessionState {
    /// The single authoritative transition function. Inputs that make no
    /// sense in the current state (e.g., a stale join notification after
    /// unsubscribe) leave the state unchanged.
    pub fn apply(self, input: StateInput) -> SessionState {
        use SessionState::*;
        use StateInput::*;

        match (self, input) {
            (_, SubscribeRequested) => Connecting,
            (_, Unsubscribed) => Disconnected,
            (Connecting | Connected | ReconnectPending, StatusJoined) => Connected,
            (Connecting | Connected | ReconnectPending | Exhausted, ReconnectScheduled) => {
                ReconnectPending
            }
            (Connecting | Connected | ReconnectPending, ReconnectExhausted) => Exhausted,
            (Connected | ReconnectPending | Exhausted, ReconnectFired) => Connecting,
            (state, input) => {
                tracing::debug!(?state, ?input, "ignoring state input");
                state
            }
        }
    }

    /// Whether a user is currently subscribed in this state.
    pub fn is_subscribed(self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

// ── Tests ────────────────────────────────────────────────────────
