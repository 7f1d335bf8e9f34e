//! Per-list fanout registry bridged to the pub/sub bus.
//!
//! The hub keeps an in-process map `list_id -> {session queues}`. The first
//! subscriber of a list starts one background reader on the bus channel;
//! the last one leaving cancels it. Local broadcast excludes the sender
//! (its frame already went to the bus for sibling processes); bus frames
//! deliver to every local session because the producer is a sibling.
//!
//! Bus frames carry an 8-byte origin tag so a hub can skip its own
//! publications when they come back from the bus; local peers already got
//! the frame on the direct path. The tag is stripped before delivery, so
//! socket-to-socket payloads stay verbatim.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::ports::ListBus;

/// Outbound frames buffered per socket; overflow drops silently.
pub const SESSION_QUEUE_CAPACITY: usize = 256;

/// Width of the origin tag prefixed to every bus frame.
const ORIGIN_TAG_LEN: usize = 8;

/// Identifier of one attached socket.
pub type SessionId = u64;

struct ListEntry {
    sessions: HashMap<SessionId, mpsc::Sender<Bytes>>,
    reader: JoinHandle<()>,
}

/// Fanout hub shared by every socket of one process.
pub struct ListHub {
    bus: Arc<dyn ListBus>,
    origin: u64,
    max_per_list: usize,
    subscribe_retry: Duration,
    next_session: AtomicU64,
    lists: RwLock<HashMap<i64, ListEntry>>,
}

impl ListHub {
    /// Build a hub over the shared bus.
    pub fn new(bus: Arc<dyn ListBus>, max_per_list: usize, subscribe_retry: Duration) -> Self {
        Self {
            bus,
            origin: rand::random(),
            max_per_list,
            subscribe_retry,
            next_session: AtomicU64::new(1),
            lists: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a session to a list. Returns `None` when the list is at its
    /// admission cap; otherwise the session's ID and its outbound frame
    /// queue.
    pub fn register(
        self: &Arc<Self>,
        list_id: i64,
    ) -> Option<(SessionId, mpsc::Receiver<Bytes>)> {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);

        let entry = match lists.entry(list_id) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.sessions.len() >= self.max_per_list {
                    return None;
                }
                entry
            }
            Entry::Vacant(vacant) => {
                let reader = tokio::spawn(Arc::clone(self).read_bus(list_id));
                vacant.insert(ListEntry {
                    sessions: HashMap::new(),
                    reader,
                })
            }
        };

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        entry.sessions.insert(session_id, tx);
        debug!(list_id, session_id, "session attached");
        Some((session_id, rx))
    }

    /// Detach a session; the last one out cancels the bus reader.
    pub fn unregister(&self, list_id: i64, session_id: SessionId) {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = lists.get_mut(&list_id) {
            entry.sessions.remove(&session_id);
            if entry.sessions.is_empty() {
                entry.reader.abort();
                lists.remove(&list_id);
                debug!(list_id, "last session left; bus reader cancelled");
            }
        }
    }

    /// Number of sessions currently attached to a list.
    pub fn session_count(&self, list_id: i64) -> usize {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&list_id)
            .map_or(0, |entry| entry.sessions.len())
    }

    /// Deliver a frame to local peers, excluding the originating session.
    /// A full session queue drops the frame for that session only.
    pub fn broadcast_local(&self, list_id: i64, frame: &Bytes, exclude: Option<SessionId>) {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = lists.get(&list_id) else {
            return;
        };
        for (session_id, queue) in &entry.sessions {
            if Some(*session_id) == exclude {
                continue;
            }
            if queue.try_send(frame.clone()).is_err() {
                debug!(list_id, session_id, "outbound queue full; frame dropped");
            }
        }
    }

    /// Forward a client frame to sibling processes via the bus.
    pub async fn publish(&self, list_id: i64, frame: Bytes) {
        let mut tagged = BytesMut::with_capacity(ORIGIN_TAG_LEN + frame.len());
        tagged.put_u64(self.origin);
        tagged.extend_from_slice(&frame);
        if let Err(err) = self.bus.publish(list_id, tagged.freeze()).await {
            warn!(list_id, error = %err, "bus publish failed");
        }
    }

    /// Background reader: one per list with subscribers. Subscription
    /// failures retry after a fixed delay; attached clients stay connected
    /// and simply miss remote frames until the bus returns.
    async fn read_bus(self: Arc<Self>, list_id: i64) {
        loop {
            match self.bus.subscribe(list_id).await {
                Ok(mut stream) => {
                    while let Some(tagged) = stream.next().await {
                        if tagged.len() < ORIGIN_TAG_LEN {
                            warn!(list_id, len = tagged.len(), "dropping malformed bus frame");
                            continue;
                        }
                        let (tag, payload) = tagged.split_at(ORIGIN_TAG_LEN);
                        let origin = u64::from_be_bytes(tag.try_into().unwrap_or_default());
                        if origin == self.origin {
                            // Our own publication: local peers were already
                            // served on the direct path.
                            continue;
                        }
                        // Remote producer: deliver to every local session.
                        self.broadcast_local(list_id, &Bytes::copy_from_slice(payload), None);
                    }
                    warn!(list_id, "bus stream ended; resubscribing");
                }
                Err(err) => {
                    warn!(list_id, error = %err, "bus subscribe failed; retrying");
                }
            }
            tokio::time::sleep(self.subscribe_retry).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::bus::MemoryListBus;
    use rstest::rstest;
    use tokio::time::{sleep, timeout};

    const RETRY: Duration = Duration::from_millis(50);
    const SETTLE: Duration = Duration::from_millis(200);
    const RECV: Duration = Duration::from_millis(500);

    fn hub_on(bus: &MemoryListBus, cap: usize) -> Arc<ListHub> {
        Arc::new(ListHub::new(Arc::new(bus.clone()), cap, RETRY))
    }

    #[rstest]
    #[tokio::test]
    async fn local_broadcast_excludes_the_sender() {
        let bus = MemoryListBus::new();
        let hub = hub_on(&bus, 500);

        let (sender_id, mut sender_rx) = hub.register(5).expect("under cap");
        let (_peer_id, mut peer_rx) = hub.register(5).expect("under cap");

        hub.broadcast_local(5, &Bytes::from_static(b"hi"), Some(sender_id));

        let frame = timeout(RECV, peer_rx.recv()).await.expect("peer receives");
        assert_eq!(frame, Some(Bytes::from_static(b"hi")));
        assert!(sender_rx.try_recv().is_err(), "sender must not echo");
    }

    #[rstest]
    #[tokio::test]
    async fn frames_cross_hubs_through_the_bus_exactly_once() {
        let bus = MemoryListBus::new();
        let first_hub = hub_on(&bus, 500);
        let second_hub = hub_on(&bus, 500);

        let (sender_id, mut sender_rx) = first_hub.register(5).expect("under cap");
        let (_remote_id, mut remote_rx) = second_hub.register(5).expect("under cap");
        sleep(SETTLE).await;

        // A client frame goes to local peers (none here) and to the bus.
        first_hub.broadcast_local(5, &Bytes::from_static(b"hi"), Some(sender_id));
        first_hub.publish(5, Bytes::from_static(b"hi")).await;

        let frame = timeout(RECV, remote_rx.recv()).await.expect("remote receives");
        assert_eq!(frame, Some(Bytes::from_static(b"hi")));

        // No duplicate delivery and no echo to the sender.
        assert!(timeout(SETTLE, remote_rx.recv()).await.is_err());
        assert!(sender_rx.try_recv().is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn own_publications_do_not_come_back_from_the_bus() {
        let bus = MemoryListBus::new();
        let hub = hub_on(&bus, 500);

        let (_sender_id, mut sender_rx) = hub.register(5).expect("under cap");
        let (_peer_id, mut peer_rx) = hub.register(5).expect("under cap");
        sleep(SETTLE).await;

        // Only the bus leg: the local leg is exercised separately above.
        hub.publish(5, Bytes::from_static(b"hi")).await;

        assert!(timeout(SETTLE, peer_rx.recv()).await.is_err());
        assert!(sender_rx.try_recv().is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn other_lists_never_see_the_frame() {
        let bus = MemoryListBus::new();
        let hub = hub_on(&bus, 500);
        let other_hub = hub_on(&bus, 500);

        let (_five, _rx_five) = hub.register(5).expect("under cap");
        let (_six, mut rx_six) = other_hub.register(6).expect("under cap");
        sleep(SETTLE).await;

        hub.broadcast_local(5, &Bytes::from_static(b"hi"), None);
        hub.publish(5, Bytes::from_static(b"hi")).await;

        assert!(timeout(SETTLE, rx_six.recv()).await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn admission_cap_refuses_the_overflow_session() {
        let bus = MemoryListBus::new();
        let hub = hub_on(&bus, 2);

        let _first = hub.register(5).expect("under cap");
        let _second = hub.register(5).expect("under cap");
        assert!(hub.register(5).is_none(), "cap reached");
        assert_eq!(hub.session_count(5), 2);

        // Another list is unaffected.
        assert!(hub.register(6).is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn last_session_out_cancels_the_reader() {
        let bus = MemoryListBus::new();
        let hub = hub_on(&bus, 500);
        let remote_hub = hub_on(&bus, 500);

        let (id, _rx) = hub.register(5).expect("under cap");
        assert_eq!(hub.session_count(5), 1);
        hub.unregister(5, id);
        assert_eq!(hub.session_count(5), 0);

        // Re-registering restarts a reader and still delivers.
        let (_id, mut rx) = hub.register(5).expect("under cap");
        sleep(SETTLE).await;
        remote_hub.publish(5, Bytes::from_static(b"back")).await;
        let frame = timeout(RECV, rx.recv()).await.expect("delivered");
        assert_eq!(frame, Some(Bytes::from_static(b"back")));
    }

    #[rstest]
    #[tokio::test]
    async fn full_queues_drop_frames_without_detaching() {
        let bus = MemoryListBus::new();
        let hub = hub_on(&bus, 500);

        let (_id, mut rx) = hub.register(5).expect("under cap");
        for _ in 0..(SESSION_QUEUE_CAPACITY + 16) {
            hub.broadcast_local(5, &Bytes::from_static(b"x"), None);
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SESSION_QUEUE_CAPACITY);
        assert_eq!(hub.session_count(5), 1);
    }
}
