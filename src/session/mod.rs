//! Resilient sync session.
//!
//! One [`SyncSession`] owns exactly one logical channel per
//! (provider, topic, user) at a time and keeps it alive across flaky
//! networks, suspended hosts, and sleeping devices. It composes five
//! cooperating concerns inside a single actor task:
//!
//! - channel lifecycle (open, observe status, tear down)
//! - reconnection scheduling (capped exponential backoff)
//! - heartbeat monitoring (catches disconnects the provider never reported)
//! - presence bookkeeping (skip broadcasts nobody can receive)
//! - host lifecycle signals (immediate reconnect on visibility/online)
//!
//! ## Design
//! - All session state is owned by the actor task and mutated only there;
//!   the public handle just queues commands, so there is no shared-state
//!   locking and no true parallelism inside a session
//! - "Clear the timer" is dropping the armed deadline/interval, so at most
//!   one reconnect timer and one heartbeat ever exist
//! - Nothing here returns an error to the caller: transient failures are
//!   retried, exhaustion is logged, sends with no peers are dropped

pub mod backoff;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::host::{HostBridge, HostSignal};
use crate::provider::{
    Channel, ChannelEvent, ChannelOptions, ChannelStatus, PresenceMeta, PubSubProvider, SyncEvent,
};
use self::backoff::ReconnectPolicy;
use self::state::{SessionState, StateInput};

// ── Public surface ───────────────────────────────────────────────

/// Events a session delivers to its subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An application sync event from a peer device.
    Event(SyncEvent),
    /// Fired exactly once per successful rejoin after the initial
    /// connection of a subscribe lifetime.
    Reconnected,
}

/// Point-in-time view of a session's internal state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Connection state.
    pub state: SessionState,
    /// Subscribed user, if any.
    pub user_id: Option<String>,
    /// Device id of the current/pending connection.
    pub device_id: Option<String>,
    /// Consecutive failures since the last confirmed join.
    pub reconnect_attempts: u32,
    /// Peers of the same user currently online, excluding this device.
    pub other_devices_online: usize,
    /// Whether host lifecycle listeners are registered.
    pub host_listener_registered: bool,
    /// Whether the heartbeat interval is armed.
    pub heartbeat_running: bool,
    /// Whether a reconnect timer is armed.
    pub reconnect_timer_armed: bool,
}

enum Command {
    Subscribe(String),
    Broadcast(SyncEvent, oneshot::Sender<()>),
    Unsubscribe(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Handle to a running sync session.
///
/// Cheap to clone. Dropping the last handle shuts the actor down after a
/// full cleanup, but callers that care about prompt teardown should call
/// [`SyncSession::unsubscribe`] first.
#[derive(Clone)]
pub struct SyncSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SyncSession {
    /// Spawn a session actor on the current runtime.
    pub fn spawn(
        provider: Arc<dyn PubSubProvider>,
        host: HostBridge,
        config: SyncConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_buffer);

        let actor = SessionActor {
            provider,
            policy: config.reconnect_policy(),
            config,
            cmd_rx,
            event_tx: event_tx.clone(),
            host,
            host_rx: None,
            state: SessionState::Disconnected,
            user_id: None,
            device_id: None,
            channel: None,
            chan_rx: None,
            other_devices_online: 0,
            reconnect_attempts: 0,
            reconnect_at: None,
            heartbeat: None,
            connected_once: false,
        };
        tokio::spawn(actor.run());

        Self { cmd_tx, event_tx }
    }

    /// Subscribe to inbound session events. Dropping the receiver is the
    /// unsubscribe; inbound delivery never depends on presence state.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Open (or keep) the channel for `user_id`. Idempotent while the
    /// channel for the same user is healthy.
    pub fn subscribe(&self, user_id: &str) {
        let _ = self.cmd_tx.send(Command::Subscribe(user_id.to_string()));
    }

    /// Broadcast an event to the user's other devices.
    ///
    /// Dropped silently when there is no live channel or no peer is online;
    /// callers needing guaranteed delivery must refetch state instead.
    pub async fn broadcast(&self, event: SyncEvent) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Broadcast(event, ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Tear everything down: channel, timers, host listeners, counters.
    /// Idempotent; completion means the session is fully quiescent.
    pub async fn unsubscribe(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Unsubscribe(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Fetch a snapshot of the session's internal state.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Snapshot(tx)).is_ok() {
            if let Ok(snap) = rx.await {
                return snap;
            }
        }
        // Actor already gone — report the quiescent shape.
        SessionSnapshot {
            state: SessionState::Disconnected,
            user_id: None,
            device_id: None,
            reconnect_attempts: 0,
            other_devices_online: 0,
            host_listener_registered: false,
            heartbeat_running: false,
            reconnect_timer_armed: false,
        }
    }
}

// ── Actor ────────────────────────────────────────────────────────

struct SessionActor {
    provider: Arc<dyn PubSubProvider>,
    config: SyncConfig,
    policy: ReconnectPolicy,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    host: HostBridge,
    host_rx: Option<broadcast::Receiver<HostSignal>>,
    state: SessionState,
    user_id: Option<String>,
    device_id: Option<String>,
    channel: Option<Box<dyn Channel>>,
    chan_rx: Option<mpsc::Receiver<ChannelEvent>>,
    other_devices_online: usize,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    heartbeat: Option<tokio::time::Interval>,
    connected_once: bool,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            // Guards are read before the select so the disabled branches
            // never touch the fields their futures would borrow.
            let chan_active = self.chan_rx.is_some();
            let host_active = self.host_rx.is_some();
            let heartbeat_active = self.heartbeat.is_some();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Every handle dropped: clean up and exit.
                    None => break,
                },
                ev = Self::chan_recv(&mut self.chan_rx), if chan_active => match ev {
                    Some(ev) => self.handle_channel_event(ev).await,
                    None => {
                        // Provider dropped its side without a status event.
                        self.chan_rx = None;
                        self.on_channel_down(ChannelStatus::Closed);
                    }
                },
                sig = Self::host_recv(&mut self.host_rx), if host_active => match sig {
                    Ok(sig) => self.handle_host_signal(sig).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => self.host_rx = None,
                },
                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(far_future)),
                    if reconnect_at.is_some() =>
                {
                    self.on_reconnect_timer().await;
                }
                _ = Self::heartbeat_tick(&mut self.heartbeat), if heartbeat_active => {
                    self.on_heartbeat_tick();
                }
            }
        }
        self.unsubscribe().await;
    }

    async fn chan_recv(rx: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
        match rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn host_recv(
        rx: &mut Option<broadcast::Receiver<HostSignal>>,
    ) -> Result<HostSignal, broadcast::error::RecvError> {
        match rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn heartbeat_tick(heartbeat: &mut Option<tokio::time::Interval>) {
        match heartbeat.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    // ── Command handling ─────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe(user_id) => self.subscribe(user_id).await,
            Command::Broadcast(event, ack) => {
                self.broadcast(event).await;
                let _ = ack.send(());
            }
            Command::Unsubscribe(ack) => {
                self.unsubscribe().await;
                let _ = ack.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn subscribe(&mut self, user_id: String) {
        // Re-subscribe guard: same user with a healthy channel is a no-op.
        if self.user_id.as_deref() == Some(user_id.as_str()) {
            if let Some(channel) = &self.channel {
                if channel.status().is_healthy() {
                    debug!(user = %user_id, "already subscribed, ignoring");
                    return;
                }
            }
        }

        info!(user = %user_id, "subscribing");
        self.teardown_channel().await;
        self.stop_heartbeat();
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.other_devices_online = 0;
        self.connected_once = false;
        self.user_id = Some(user_id);

        if self.host_rx.is_none() {
            self.host_rx = Some(self.host.subscribe());
        }

        self.state = self.state.apply(StateInput::SubscribeRequested);
        self.open_channel().await;
    }

    async fn broadcast(&mut self, event: SyncEvent) {
        let Some(channel) = &self.channel else {
            debug!(event = %event.event, "broadcast dropped: no live channel");
            return;
        };
        if self.other_devices_online == 0 {
            debug!(event = %event.event, "broadcast dropped: no peers online");
            return;
        }
        if let Err(e) = channel.send(&event).await {
            warn!(event = %event.event, error = %e, "broadcast send failed");
        }
    }

    async fn unsubscribe(&mut self) {
        self.stop_heartbeat();
        self.reconnect_at = None;
        self.host_rx = None;
        self.teardown_channel().await;
        self.user_id = None;
        self.device_id = None;
        self.other_devices_online = 0;
        self.reconnect_attempts = 0;
        self.connected_once = false;
        self.state = self.state.apply(StateInput::Unsubscribed);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            reconnect_attempts: self.reconnect_attempts,
            other_devices_online: self.other_devices_online,
            host_listener_registered: self.host_rx.is_some(),
            heartbeat_running: self.heartbeat.is_some(),
            reconnect_timer_armed: self.reconnect_at.is_some(),
        }
    }

    // ── Channel lifecycle ────────────────────────────────────

    async fn open_channel(&mut self) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };

        // Fresh device id per connection so a device never counts itself
        // as a peer, even across quick reconnects.
        let device_id = Uuid::new_v4().to_string();
        self.device_id = Some(device_id.clone());

        let topic = format!("{}:{}", self.config.channel_prefix, user_id);
        let options = ChannelOptions {
            self_echo: false,
            presence_key: device_id,
        };

        match self.provider.open_channel(&topic, options).await {
            Ok(opened) => {
                debug!(%topic, "channel opened");
                self.channel = Some(opened.channel);
                self.chan_rx = Some(opened.events);
            }
            Err(e) => {
                warn!(%topic, error = %e, "channel open failed");
                self.schedule_reconnect();
            }
        }
    }

    async fn teardown_channel(&mut self) {
        self.chan_rx = None;
        if let Some(channel) = self.channel.take() {
            self.provider.destroy_channel(channel).await;
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status(status) => self.on_status(status).await,
            ChannelEvent::Broadcast(event) => {
                // Inbound delivery never depends on presence state.
                let _ = self.event_tx.send(SessionEvent::Event(event));
            }
            ChannelEvent::PresenceSync => self.refresh_presence(),
        }
    }

    async fn on_status(&mut self, status: ChannelStatus) {
        match status {
            ChannelStatus::Joining => {}
            ChannelStatus::Joined => self.on_joined().await,
            ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed => {
                self.on_channel_down(status);
            }
        }
    }

    async fn on_joined(&mut self) {
        self.reconnect_attempts = 0;
        self.reconnect_at = None;
        self.state = self.state.apply(StateInput::StatusJoined);
        self.start_heartbeat();

        if let (Some(channel), Some(device_id)) = (&self.channel, &self.device_id) {
            let meta = PresenceMeta {
                device_id: device_id.clone(),
                online_at: chrono::Utc::now().timestamp(),
            };
            if let Err(e) = channel.track(meta).await {
                warn!(error = %e, "presence track failed");
            }
        }

        if self.connected_once {
            info!("rejoined after disconnect");
            let _ = self.event_tx.send(SessionEvent::Reconnected);
        } else {
            info!("joined");
        }
        self.connected_once = true;
    }

    fn on_channel_down(&mut self, status: ChannelStatus) {
        warn!(?status, "channel left healthy state");
        self.stop_heartbeat();
        self.schedule_reconnect();
    }

    fn refresh_presence(&mut self) {
        let Some(channel) = &self.channel else {
            return;
        };
        let own_key = self.device_id.as_deref().unwrap_or_default();
        let peers = channel
            .presence_state()
            .keys()
            .filter(|key| key.as_str() != own_key)
            .count();
        if peers != self.other_devices_online {
            debug!(peers, "presence changed");
        }
        self.other_devices_online = peers;
    }

    // ── Reconnection scheduling ──────────────────────────────

    fn schedule_reconnect(&mut self) {
        // Never more than one outstanding timer.
        self.reconnect_at = None;

        match self.policy.delay(self.reconnect_attempts) {
            Some(delay) => {
                self.reconnect_attempts += 1;
                self.reconnect_at = Some(Instant::now() + delay);
                self.state = self.state.apply(StateInput::ReconnectScheduled);
                info!(
                    attempt = self.reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
            }
            None => {
                self.state = self.state.apply(StateInput::ReconnectExhausted);
                warn!(
                    attempts = self.reconnect_attempts,
                    "reconnect budget exhausted; dormant until subscribe or host signal"
                );
            }
        }
    }

    async fn on_reconnect_timer(&mut self) {
        self.reconnect_at = None;
        info!(attempt = self.reconnect_attempts, "reconnect timer fired");

        // The stale channel is destroyed only now, so the status it kept
        // reporting between failure and retry stayed observable.
        self.teardown_channel().await;
        self.other_devices_online = 0;
        self.state = self.state.apply(StateInput::ReconnectFired);
        self.open_channel().await;
    }

    async fn reconnect_now(&mut self, reason: HostSignal) {
        info!(signal = ?reason, "immediate reconnect, bypassing backoff");
        self.stop_heartbeat();
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.teardown_channel().await;
        self.other_devices_online = 0;
        self.state = self.state.apply(StateInput::ReconnectFired);
        self.open_channel().await;
    }

    // ── Heartbeat ────────────────────────────────────────────

    fn start_heartbeat(&mut self) {
        let period = self.config.heartbeat_interval;
        // interval() would tick immediately; the first check belongs one
        // full period after the join.
        self.heartbeat = Some(tokio::time::interval_at(Instant::now() + period, period));
    }

    fn stop_heartbeat(&mut self) {
        self.heartbeat = None;
    }

    fn on_heartbeat_tick(&mut self) {
        let healthy = self
            .channel
            .as_ref()
            .map(|c| c.status().is_healthy())
            .unwrap_or(false);
        if healthy {
            return;
        }
        warn!("heartbeat found unhealthy channel");
        self.stop_heartbeat();
        self.schedule_reconnect();
    }

    // ── Host lifecycle ───────────────────────────────────────

    async fn handle_host_signal(&mut self, signal: HostSignal) {
        if self.user_id.is_none() {
            return;
        }
        let healthy = self
            .channel
            .as_ref()
            .map(|c| c.status().is_healthy())
            .unwrap_or(false);
        if healthy {
            debug!(?signal, "host signal with healthy channel, ignoring");
            return;
        }
        self.reconnect_now(signal).await;
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryProvider;

    struct Harness {
        hub: MemoryProvider,
        host: HostBridge,
        session: SyncSession,
    }

    fn harness() -> Harness {
        let hub = MemoryProvider::new();
        let host = HostBridge::new();
        let session = SyncSession::spawn(
            Arc::new(hub.clone()),
            host.clone(),
            SyncConfig::default(),
        );
        Harness { hub, host, session }
    }

    /// Let the actor drain its queues without advancing the clock.
    async fn settle(session: &SyncSession) -> SessionSnapshot {
        let mut snap = session.snapshot().await;
        for _ in 0..25 {
            tokio::task::yield_now().await;
            snap = session.snapshot().await;
        }
        snap
    }

    /// Advance paused time until the condition holds.
    async fn wait_for(
        session: &SyncSession,
        what: &str,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        for _ in 0..600 {
            let snap = session.snapshot().await;
            if predicate(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_connects_and_tracks_presence() {
        let h = harness();
        h.session.subscribe("alice");

        let snap = settle(&h.session).await;
        assert_eq!(snap.state, SessionState::Connected);
        assert_eq!(snap.user_id.as_deref(), Some("alice"));
        assert!(snap.device_id.is_some());
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(snap.heartbeat_running);
        assert!(snap.host_listener_registered);
        assert!(!snap.reconnect_timer_armed);

        assert_eq!(h.hub.member_count("sync:alice"), 1);
        assert_eq!(h.hub.open_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_same_user_is_noop() {
        let h = harness();
        h.session.subscribe("alice");
        settle(&h.session).await;

        h.session.subscribe("alice");
        let snap = settle(&h.session).await;

        assert_eq!(snap.state, SessionState::Connected);
        assert_eq!(h.hub.open_calls(), 1, "healthy re-subscribe must not reopen");
    }

    #[tokio::test(start_paused = true)]
    async fn switching_user_replaces_channel() {
        let h = harness();
        h.session.subscribe("alice");
        settle(&h.session).await;

        h.session.subscribe("bob");
        let snap = settle(&h.session).await;

        assert_eq!(snap.user_id.as_deref(), Some("bob"));
        assert_eq!(h.hub.member_count("sync:alice"), 0);
        assert_eq!(h.hub.member_count("sync:bob"), 1);
        // The old channel was destroyed before the new one was opened.
        assert_eq!(h.hub.peak_member_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_error_schedules_reconnect_then_recovers() {
        let h = harness();
        let mut events = h.session.events();
        h.session.subscribe("alice");
        settle(&h.session).await;

        h.hub.fail_topic("sync:alice");
        let snap = settle(&h.session).await;
        assert_eq!(snap.state, SessionState::ReconnectPending);
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_timer_armed);
        assert!(!snap.heartbeat_running, "heartbeat stops on failure");

        let snap = wait_for(&h.session, "recovery", |s| {
            s.state == SessionState::Connected
        })
        .await;
        assert_eq!(snap.reconnect_attempts, 0, "attempts reset on join");
        assert!(snap.heartbeat_running);
        assert_eq!(h.hub.open_calls(), 2);

        let reconnects = drain_events(&mut events)
            .iter()
            .filter(|e| matches!(e, SessionEvent::Reconnected))
            .count();
        assert_eq!(reconnects, 1, "exactly one reconnected event per rejoin");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sequence_runs_to_exhaustion_and_host_signal_revives() {
        let h = harness();
        h.hub.refuse_opens(true);
        h.session.subscribe("alice");

        let snap = wait_for(&h.session, "exhaustion", |s| {
            s.state == SessionState::Exhausted
        })
        .await;
        assert_eq!(snap.reconnect_attempts, 10);
        assert!(!snap.reconnect_timer_armed);
        assert!(!snap.heartbeat_running);

        // Initial open plus one per scheduled retry.
        assert_eq!(h.hub.open_calls(), 11);

        // The gaps between attempts follow the exact backoff ladder.
        let times = h.hub.open_times();
        let expected_ms = [
            1_000u64, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000,
        ];
        for (i, expected) in expected_ms.iter().enumerate() {
            let gap = times[i + 1] - times[i];
            assert_eq!(
                gap,
                Duration::from_millis(*expected),
                "gap before attempt {}",
                i + 1
            );
        }

        // Dormant: no further attempts no matter how long we wait.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.hub.open_calls(), 11);

        // A host signal resets the budget and reconnects immediately.
        h.hub.refuse_opens(false);
        h.host.network_online();
        let snap = wait_for(&h.session, "revival", |s| {
            s.state == SessionState::Connected
        })
        .await;
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(h.hub.open_calls(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn host_signal_with_healthy_channel_is_noop() {
        let h = harness();
        h.session.subscribe("alice");
        settle(&h.session).await;

        h.host.visibility_restored();
        let snap = settle(&h.session).await;

        assert_eq!(snap.state, SessionState::Connected);
        assert_eq!(h.hub.open_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn host_signal_without_subscribe_is_noop() {
        let h = harness();
        h.host.network_online();
        let snap = settle(&h.session).await;

        assert_eq!(snap.state, SessionState::Disconnected);
        assert_eq!(h.hub.open_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_reaches_full_quiescence() {
        let h = harness();
        h.session.subscribe("alice");
        settle(&h.session).await;

        // Arm a reconnect timer first so unsubscribe has something to clear.
        h.hub.fail_topic("sync:alice");
        settle(&h.session).await;

        h.session.unsubscribe().await;
        let snap = h.session.snapshot().await;
        assert_eq!(snap.state, SessionState::Disconnected);
        assert_eq!(snap.user_id, None);
        assert_eq!(snap.device_id, None);
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(snap.other_devices_online, 0);
        assert!(!snap.reconnect_timer_armed);
        assert!(!snap.heartbeat_running);
        assert!(!snap.host_listener_registered);
        assert_eq!(h.host.listener_count(), 0);

        // No scheduled callback fires later, however long we wait.
        let opens_before = h.hub.open_calls();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.hub.open_calls(), opens_before);
        assert_eq!(h.hub.member_count("sync:alice"), 0);

        // Idempotent, including without a prior subscribe.
        h.session.unsubscribe().await;
        h.session.unsubscribe().await;
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_suppressed_with_no_peers() {
        let h = harness();
        h.session.subscribe("carol");
        settle(&h.session).await;

        h.session
            .broadcast(SyncEvent::new("tasks_changed", serde_json::json!({})))
            .await;

        assert_eq!(h.hub.send_calls(), 0, "send must not reach the provider");

        // And with no channel at all it is a silent no-op too.
        h.session.unsubscribe().await;
        h.session
            .broadcast(SyncEvent::new("tasks_changed", serde_json::json!({})))
            .await;
        assert_eq!(h.hub.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_reaches_peer_devices() {
        let hub = MemoryProvider::new();
        let host = HostBridge::new();
        let session_a = SyncSession::spawn(
            Arc::new(hub.clone()),
            host.clone(),
            SyncConfig::default(),
        );
        let session_b = SyncSession::spawn(
            Arc::new(hub.clone()),
            host.clone(),
            SyncConfig::default(),
        );
        let mut events_b = session_b.events();

        session_a.subscribe("alice");
        settle(&session_a).await;
        session_b.subscribe("alice");
        settle(&session_b).await;
        let snap_a = settle(&session_a).await;

        // Two presence keys, each device excludes itself.
        assert_eq!(snap_a.other_devices_online, 1);
        let snap_b = session_b.snapshot().await;
        assert_eq!(snap_b.other_devices_online, 1);

        session_a
            .broadcast(SyncEvent::new(
                "tasks_changed",
                serde_json::json!({"list": "inbox"}),
            ))
            .await;
        settle(&session_b).await;

        let received = drain_events(&mut events_b);
        assert!(received.iter().any(|e| matches!(
            e,
            SessionEvent::Event(ev) if ev.event == "tasks_changed"
        )));
        assert_eq!(hub.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_departure_updates_presence() {
        let hub = MemoryProvider::new();
        let host = HostBridge::new();
        let session_a = SyncSession::spawn(
            Arc::new(hub.clone()),
            host.clone(),
            SyncConfig::default(),
        );
        let session_b = SyncSession::spawn(
            Arc::new(hub.clone()),
            host.clone(),
            SyncConfig::default(),
        );

        session_a.subscribe("alice");
        settle(&session_a).await;
        session_b.subscribe("alice");
        settle(&session_b).await;
        let snap = settle(&session_a).await;
        assert_eq!(snap.other_devices_online, 1);

        session_b.unsubscribe().await;
        let snap = settle(&session_a).await;
        assert_eq!(snap.other_devices_online, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_detects_silent_drop() {
        let h = harness();
        h.session.subscribe("alice");
        settle(&h.session).await;

        // Kill the transport without any status event: only the heartbeat
        // poll can notice.
        h.hub.silence_topic("sync:alice");
        let snap = settle(&h.session).await;
        assert_eq!(snap.state, SessionState::Connected, "no event delivered yet");

        // The next heartbeat tick notices, schedules one retry, and the
        // retry lands on a fresh channel.
        for _ in 0..600 {
            if h.hub.open_calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(h.hub.open_calls(), 2, "exactly one reconnect scheduled");

        let snap = settle(&h.session).await;
        assert_eq!(snap.state, SessionState::Connected);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(snap.heartbeat_running);

        // Healthy again: further heartbeats change nothing.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.hub.open_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cleans_up() {
        let hub = MemoryProvider::new();
        let host = HostBridge::new();
        {
            let session = SyncSession::spawn(
                Arc::new(hub.clone()),
                host.clone(),
                SyncConfig::default(),
            );
            session.subscribe("alice");
            settle(&session).await;
            assert_eq!(hub.member_count("sync:alice"), 1);
        }

        // Actor notices the closed command queue and quiesces.
        for _ in 0..25 {
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.member_count("sync:alice"), 0);
        assert_eq!(host.listener_count(), 0);
    }
}
