//! In-process pub/sub provider.
//!
//! A pure in-memory hub implementing the provider traits: topics are rooms,
//! every open channel is a room member with its own event queue, presence is
//! a per-member metadata slot, and broadcasts fan out to every member except
//! the sender (unless self-echo is enabled). No data is written to disk.
//!
//! Used by single-process embedders and by the session tests, which also
//! rely on the fault-injection hooks ([`MemoryProvider::fail_topic`],
//! [`MemoryProvider::silence_topic`], [`MemoryProvider::refuse_opens`]) to
//! exercise the reconnect paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{
    Channel, ChannelEvent, ChannelOptions, ChannelStatus, OpenedChannel, PresenceMeta,
    ProviderError, PubSubProvider, SyncEvent,
};

/// Per-member event queue depth.
const MEMBER_QUEUE_DEPTH: usize = 256;

/// One subscriber of a topic room.
struct MemberSlot {
    id: u64,
    presence_key: String,
    self_echo: bool,
    tx: mpsc::Sender<ChannelEvent>,
    tracked: Option<PresenceMeta>,
    status: Arc<Mutex<ChannelStatus>>,
}

/// Shared hub state behind every provider and channel handle.
struct HubInner {
    /// topic → members.
    rooms: Mutex<HashMap<String, Vec<MemberSlot>>>,
    next_member_id: AtomicU64,
    refuse_opens: AtomicBool,
    // Diagnostics counters, also used by the session tests.
    open_calls: AtomicU64,
    send_calls: AtomicU64,
    members_now: AtomicUsize,
    peak_members: AtomicUsize,
    open_times: Mutex<Vec<tokio::time::Instant>>,
}

/// In-memory pub/sub hub. Cheap to clone; clones share the same rooms.
#[derive(Clone)]
pub struct MemoryProvider {
    inner: Arc<HubInner>,
}

impl MemoryProvider {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: Mutex::new(HashMap::new()),
                next_member_id: AtomicU64::new(1),
                refuse_opens: AtomicBool::new(false),
                open_calls: AtomicU64::new(0),
                send_calls: AtomicU64::new(0),
                members_now: AtomicUsize::new(0),
                peak_members: AtomicUsize::new(0),
                open_times: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Fault injection ──────────────────────────────────────

    /// Report a channel error to every member of a topic.
    pub fn fail_topic(&self, topic: &str) {
        self.inner
            .push_status(topic, ChannelStatus::ChannelError, true);
    }

    /// Close a topic, notifying every member.
    pub fn close_topic(&self, topic: &str) {
        self.inner.push_status(topic, ChannelStatus::Closed, true);
    }

    /// Kill a topic silently: members' status flips to closed but no event
    /// is delivered. Simulates a dead transport the provider never reported
    /// (the failure mode the heartbeat monitor exists for).
    pub fn silence_topic(&self, topic: &str) {
        self.inner.push_status(topic, ChannelStatus::Closed, false);
    }

    /// When set, `open_channel` refuses every topic.
    pub fn refuse_opens(&self, refuse: bool) {
        self.inner.refuse_opens.store(refuse, Ordering::SeqCst);
    }

    // ── Diagnostics ──────────────────────────────────────────

    /// Total `open_channel` calls, including refused ones.
    pub fn open_calls(&self) -> u64 {
        self.inner.open_calls.load(Ordering::SeqCst)
    }

    /// Total `Channel::send` calls, including failed ones.
    pub fn send_calls(&self) -> u64 {
        self.inner.send_calls.load(Ordering::SeqCst)
    }

    /// Current member count for a topic.
    pub fn member_count(&self, topic: &str) -> usize {
        self.inner
            .rooms
            .lock()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Highest number of simultaneously open channels ever observed.
    pub fn peak_member_count(&self) -> usize {
        self.inner.peak_members.load(Ordering::SeqCst)
    }

    /// Timestamps of every `open_channel` call, in order.
    pub fn open_times(&self) -> Vec<tokio::time::Instant> {
        self.inner.open_times.lock().clone()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HubInner {
    /// Flip every member of a topic to `status`, optionally delivering the
    /// status event to their queues.
    fn push_status(&self, topic: &str, status: ChannelStatus, notify: bool) {
        let rooms = self.rooms.lock();
        let Some(room) = rooms.get(topic) else {
            return;
        };
        for slot in room {
            *slot.status.lock() = status;
            if notify {
                let _ = slot.tx.try_send(ChannelEvent::Status(status));
            }
        }
    }

    /// Notify every member of a topic that the presence roster changed.
    fn presence_sync(&self, topic: &str) {
        let rooms = self.rooms.lock();
        let Some(room) = rooms.get(topic) else {
            return;
        };
        for slot in room {
            let _ = slot.tx.try_send(ChannelEvent::PresenceSync);
        }
    }

    /// Remove a member and tell the remaining ones the roster changed.
    fn remove_member(&self, topic: &str, member_id: u64) {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(topic) else {
            return;
        };
        let before = room.len();
        room.retain(|slot| slot.id != member_id);
        if room.len() < before {
            self.members_now.fetch_sub(1, Ordering::SeqCst);
            for slot in room.iter() {
                let _ = slot.tx.try_send(ChannelEvent::PresenceSync);
            }
        }
        if room.is_empty() {
            rooms.remove(topic);
        }
    }
}

#[async_trait]
impl PubSubProvider for MemoryProvider {
    async fn open_channel(
        &self,
        topic: &str,
        options: ChannelOptions,
    ) -> Result<OpenedChannel, ProviderError> {
        self.inner.open_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.open_times.lock().push(tokio::time::Instant::now());

        if self.inner.refuse_opens.load(Ordering::SeqCst) {
            return Err(ProviderError::TopicUnavailable(topic.to_string()));
        }

        let (tx, rx) = mpsc::channel(MEMBER_QUEUE_DEPTH);
        let id = self.inner.next_member_id.fetch_add(1, Ordering::SeqCst);
        let status = Arc::new(Mutex::new(ChannelStatus::Joining));

        {
            let mut rooms = self.inner.rooms.lock();
            rooms.entry(topic.to_string()).or_default().push(MemberSlot {
                id,
                presence_key: options.presence_key,
                self_echo: options.self_echo,
                tx: tx.clone(),
                tracked: None,
                status: status.clone(),
            });
            let now = self.inner.members_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.peak_members.fetch_max(now, Ordering::SeqCst);
        }

        // The join handshake is instant in-process.
        *status.lock() = ChannelStatus::Joined;
        let _ = tx.try_send(ChannelEvent::Status(ChannelStatus::Joined));

        Ok(OpenedChannel {
            channel: Box::new(MemoryChannel {
                hub: self.inner.clone(),
                topic: topic.to_string(),
                member_id: id,
                status,
            }),
            events: rx,
        })
    }
}

// ── Channel handle ───────────────────────────────────────────────

/// A member's handle into the hub. Dropping it leaves the room.
pub struct MemoryChannel {
    hub: Arc<HubInner>,
    topic: String,
    member_id: u64,
    status: Arc<Mutex<ChannelStatus>>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn track(&self, meta: PresenceMeta) -> Result<(), ProviderError> {
        if !self.status.lock().is_healthy() {
            return Err(ProviderError::ChannelClosed);
        }
        {
            let mut rooms = self.hub.rooms.lock();
            let room = rooms
                .get_mut(&self.topic)
                .ok_or(ProviderError::ChannelClosed)?;
            let slot = room
                .iter_mut()
                .find(|s| s.id == self.member_id)
                .ok_or(ProviderError::ChannelClosed)?;
            slot.tracked = Some(meta);
        }
        self.hub.presence_sync(&self.topic);
        Ok(())
    }

    async fn send(&self, event: &SyncEvent) -> Result<(), ProviderError> {
        self.hub.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.status.lock().is_healthy() {
            return Err(ProviderError::ChannelClosed);
        }
        let rooms = self.hub.rooms.lock();
        let room = rooms.get(&self.topic).ok_or(ProviderError::ChannelClosed)?;
        for slot in room {
            if slot.id == self.member_id && !slot.self_echo {
                continue;
            }
            let _ = slot.tx.try_send(ChannelEvent::Broadcast(event.clone()));
        }
        Ok(())
    }

    fn presence_state(&self) -> HashMap<String, Vec<PresenceMeta>> {
        let rooms = self.hub.rooms.lock();
        let mut state = HashMap::new();
        if let Some(room) = rooms.get(&self.topic) {
            for slot in room {
                if let Some(meta) = &slot.tracked {
                    state
                        .entry(slot.presence_key.clone())
                        .or_insert_with(Vec::new)
                        .push(meta.clone());
                }
            }
        }
        state
    }

    fn status(&self) -> ChannelStatus {
        *self.status.lock()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        *self.status.lock() = ChannelStatus::Closed;
        self.hub.remove_member(&self.topic, self.member_id);
    }
}

// ── Tests ────────────────────────────────────────────────────────
