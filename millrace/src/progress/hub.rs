//! Per-session topic hub with bounded, droppable subscribers.
//!
//! Publishing never blocks: each topic is a bounded `broadcast` channel
//! and a subscriber that falls behind loses the oldest events, counted in
//! the hub's `dropped` metric, while the pipeline runs on. A wildcard
//! topic mirrors every event for dashboards.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio::time::timeout;
use uuid::Uuid;

use super::event::ProgressEvent;

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Idle interval after which subscriber streams synthesize a heartbeat.
pub const IDLE_HEARTBEAT: Duration = Duration::from_secs(15);

/// Snapshot of hub health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressHubMetrics {
    pub capacity: usize,
    pub dropped: usize,
    pub open_topics: usize,
}

pub struct ProgressHub {
    topics: RwLock<FxHashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
    wildcard: broadcast::Sender<ProgressEvent>,
    capacity: usize,
    dropped: AtomicUsize,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (wildcard, _) = broadcast::channel(capacity);
        Arc::new(Self {
            topics: RwLock::new(FxHashMap::default()),
            wildcard,
            capacity,
            dropped: AtomicUsize::new(0),
        })
    }

    pub fn with_default_capacity() -> Arc<Self> {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// Publish to the session topic (if anyone is listening) and the
    /// wildcard. Send errors mean "no subscribers" and are ignored; this
    /// call never waits.
    pub fn publish(&self, event: ProgressEvent) {
        if let Some(sender) = self.topics.read().get(&event.session_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.wildcard.send(event);
    }

    /// Subscribe to one session's events, creating the topic if needed.
    pub fn subscribe(self: &Arc<Self>, session_id: Uuid) -> ProgressStream {
        let receiver = {
            let mut topics = self.topics.write();
            topics
                .entry(session_id)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        ProgressStream {
            receiver,
            hub: Arc::clone(self),
            session_id: Some(session_id),
        }
    }

    /// Subscribe to every session (dashboards).
    pub fn subscribe_all(self: &Arc<Self>) -> ProgressStream {
        ProgressStream {
            receiver: self.wildcard.subscribe(),
            hub: Arc::clone(self),
            session_id: None,
        }
    }

    /// Tear a topic down after its terminal event; open subscriber
    /// streams see end-of-stream once they drain.
    pub fn close_topic(&self, session_id: Uuid) {
        self.topics.write().remove(&session_id);
    }

    pub fn metrics(&self) -> ProgressHubMetrics {
        ProgressHubMetrics {
            capacity: self.capacity,
            dropped: self.dropped.load(Ordering::Relaxed),
            open_topics: self.topics.read().len(),
        }
    }

    fn record_lag(&self, missed: u64) {
        if missed == 0 {
            return;
        }
        let increment = usize::try_from(missed).unwrap_or(usize::MAX);
        let total = self
            .dropped
            .fetch_add(increment, Ordering::Relaxed)
            .saturating_add(increment);
        tracing::warn!(
            target: "millrace::progress",
            missed,
            total_dropped = total,
            "slow progress subscriber dropped events"
        );
    }
}

/// A subscriber's view of one topic (or the wildcard).
pub struct ProgressStream {
    receiver: broadcast::Receiver<ProgressEvent>,
    hub: Arc<ProgressHub>,
    session_id: Option<Uuid>,
}

impl ProgressStream {
    /// Next event; lag is absorbed (and counted), `None` means the topic
    /// closed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.hub.record_lag(missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event, or a synthesized heartbeat after [`IDLE_HEARTBEAT`] of
    /// silence. `None` still means closed.
    pub async fn next_or_heartbeat(&mut self) -> Option<ProgressEvent> {
        match timeout(IDLE_HEARTBEAT, self.recv()).await {
            Ok(next) => next,
            Err(_) => Some(ProgressEvent::heartbeat(
                self.session_id.unwrap_or_else(Uuid::nil),
            )),
        }
    }

    /// Drain until (and including) a terminal event, with heartbeats while
    /// idle. Intended for SSE handlers.
    pub async fn next_frame(&mut self) -> Option<(String, bool)> {
        let event = self.next_or_heartbeat().await?;
        let terminal = event.kind.is_terminal();
        Some((event.to_sse_frame(), terminal))
    }
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("ProgressHub")
            .field("capacity", &metrics.capacity)
            .field("dropped", &metrics.dropped)
            .field("open_topics", &metrics.open_topics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::progress::event::ProgressKind;

    fn event(session: Uuid, kind: ProgressKind) -> ProgressEvent {
        ProgressEvent::new(session, None, kind, json!({}))
    }

    #[tokio::test]
    async fn events_reach_topic_and_wildcard_subscribers() {
        let hub = ProgressHub::with_default_capacity();
        let session = Uuid::new_v4();
        let mut topic_stream = hub.subscribe(session);
        let mut all_stream = hub.subscribe_all();

        hub.publish(event(session, ProgressKind::Started));
        hub.publish(event(Uuid::new_v4(), ProgressKind::Started));

        assert_eq!(topic_stream.recv().await.unwrap().session_id, session);
        assert_eq!(all_stream.recv().await.unwrap().session_id, session);
        // The wildcard also sees the unrelated session.
        assert!(all_stream.recv().await.is_some());
    }

    #[tokio::test]
    async fn topic_isolation() {
        let hub = ProgressHub::with_default_capacity();
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let mut stream = hub.subscribe(mine);
        let _other = hub.subscribe(theirs);

        hub.publish(event(theirs, ProgressKind::Progress));
        hub.publish(event(mine, ProgressKind::Progress));

        let received = stream.recv().await.unwrap();
        assert_eq!(received.session_id, mine);
    }

    #[tokio::test]
    async fn slow_subscribers_drop_events_without_blocking() {
        let hub = ProgressHub::new(4);
        let session = Uuid::new_v4();
        let mut stream = hub.subscribe(session);

        for _ in 0..20 {
            hub.publish(event(session, ProgressKind::Progress));
        }
        // Publishing 20 events into a 4-slot buffer must not have blocked;
        // draining shows the lag was absorbed and counted.
        let mut received = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(20), stream.recv()).await
        {
            received += 1;
        }
        assert!(received <= 4);
        assert!(hub.metrics().dropped >= 16);
    }

    #[tokio::test]
    async fn closed_topic_ends_the_stream() {
        let hub = ProgressHub::with_default_capacity();
        let session = Uuid::new_v4();
        let mut stream = hub.subscribe(session);
        hub.publish(event(session, ProgressKind::Completed));
        hub.close_topic(session);

        assert_eq!(
            stream.recv().await.unwrap().kind,
            ProgressKind::Completed
        );
        assert!(stream.recv().await.is_none());
        assert_eq!(hub.metrics().open_topics, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_streams_heartbeat() {
        let hub = ProgressHub::with_default_capacity();
        let session = Uuid::new_v4();
        let mut stream = hub.subscribe(session);

        let next = stream.next_or_heartbeat().await.unwrap();
        assert_eq!(next.kind, ProgressKind::Heartbeat);
        assert_eq!(next.session_id, session);
    }
}
