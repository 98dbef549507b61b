//! In-process multicast of customer change events.
//!
//! [`EventHub`] fans every emitted [`CustomerEvent`] out to all attached
//! subscribers. Each subscriber owns an unbounded
//! [`tokio::sync::mpsc`] queue, so the emitting task never waits on a
//! reader and a slow reader only grows its own backlog. Unlike a
//! [`tokio::sync::broadcast`] channel, nothing is skipped when a reader
//! lags.
//!
//! # Replay
//!
//! The hub keeps the most recent `replay_capacity` events. A plain
//! [`subscribe`](EventHub::subscribe) starts at the subscription point;
//! [`subscribe_with_replay`](EventHub::subscribe_with_replay) first yields
//! up to `n` of the retained events in emission order. Replay and
//! registration happen under the same lock as emission, so a replaying
//! subscriber sees no gap and no duplicate at the seam.
//!
//! # Backpressure
//!
//! With `max_backlog` unset, backlogs are unbounded. With it set, a
//! subscriber whose undelivered backlog has reached the limit is
//! disconnected on the next emit: its stream ends after draining what is
//! queued. The limit is applied per subscriber and never slows the
//! producer or other subscribers. Replay is capped one below the limit, so
//! a freshly attached subscriber always accepts the next live event.
//!
//! # Lifecycle
//!
//! Dropping an [`EventStream`] removes its queue from the hub immediately.
//! [`EventHub::close`] detaches everybody; streams end once drained.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use patron_types::CustomerEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EventsConfig;

/// Default number of events retained for replay.
pub const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Sizing and backpressure settings for an [`EventHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Number of recent events retained for replay subscriptions.
    pub replay_capacity: usize,
    /// Per-subscriber backlog limit; `None` means unbounded.
    pub max_backlog: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            max_backlog: None,
        }
    }
}

impl From<&EventsConfig> for HubConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            replay_capacity: config.replay_capacity,
            max_backlog: config.max_backlog,
        }
    }
}

/// One attached subscriber, as seen from the emitting side.
struct Sink {
    tx: mpsc::UnboundedSender<CustomerEvent>,
    backlog: Arc<AtomicUsize>,
}

struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, Sink>,
    replay: VecDeque<CustomerEvent>,
    closed: bool,
}

struct HubInner {
    config: HubConfig,
    state: Mutex<HubState>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still safe to use.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Multicast hub for customer change events.
///
/// Cheap to clone; clones share the same subscribers and replay buffer.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create a hub with the given settings.
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                state: Mutex::new(HubState {
                    next_id: 0,
                    subscribers: HashMap::new(),
                    replay: VecDeque::with_capacity(config.replay_capacity),
                    closed: false,
                }),
            }),
        }
    }

    /// The settings this hub was created with.
    pub fn config(&self) -> HubConfig {
        self.inner.config
    }

    /// Publish an event to every attached subscriber.
    ///
    /// Never blocks on readers and never fails. Returns the number of
    /// subscribers the event was queued for; 0 when nobody is listening or
    /// the hub is closed (this is not an error).
    pub fn emit(&self, event: CustomerEvent) -> usize {
        let mut state = self.inner.lock();
        if state.closed {
            debug!(customer_id = %event.customer_id, "event hub closed, dropping event");
            return 0;
        }

        let capacity = self.inner.config.replay_capacity;
        if capacity > 0 {
            while state.replay.len() >= capacity {
                state.replay.pop_front();
            }
            state.replay.push_back(event.clone());
        }

        let limit = self.inner.config.max_backlog;
        let mut delivered: usize = 0;
        let mut detached = Vec::new();

        for (&id, sink) in &state.subscribers {
            if let Some(limit) = limit
                && sink.backlog.load(Ordering::Acquire) >= limit
            {
                warn!(subscriber = id, limit, "subscriber backlog limit reached, disconnecting");
                detached.push(id);
                continue;
            }
            // Count before sending so the reader can never decrement first.
            sink.backlog.fetch_add(1, Ordering::AcqRel);
            if sink.tx.send(event.clone()).is_ok() {
                delivered = delivered.saturating_add(1);
            } else {
                decrement(&sink.backlog);
                detached.push(id);
            }
        }

        for id in detached {
            state.subscribers.remove(&id);
        }

        debug!(
            customer_id = %event.customer_id,
            kind = ?event.kind,
            delivered,
            "event emitted"
        );
        delivered
    }

    /// Attach a subscriber that sees events emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        self.attach(0)
    }

    /// Attach a subscriber that first receives up to `last` retained
    /// events (oldest first), then live events.
    pub fn subscribe_with_replay(&self, last: usize) -> EventStream {
        self.attach(last)
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Number of events currently retained for replay.
    pub fn replay_len(&self) -> usize {
        self.inner.lock().replay.len()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Shut the hub down.
    ///
    /// Every attached stream ends after yielding what is already queued.
    /// Later subscriptions end immediately and later emits deliver nothing.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let detached = state.subscribers.len();
        state.subscribers.clear();
        info!(detached, "event hub closed");
    }

    fn attach(&self, replay: usize) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let mut state = self.inner.lock();

        if state.closed {
            return EventStream {
                id: None,
                hub: Weak::new(),
                rx,
                backlog,
                terminated: false,
            };
        }

        // Leave room under the limit for at least one live event.
        let wanted = match self.inner.config.max_backlog {
            Some(limit) => replay.min(limit.saturating_sub(1)),
            None => replay,
        };
        let skip = state.replay.len().saturating_sub(wanted);
        let mut replayed: usize = 0;
        for event in state.replay.iter().skip(skip) {
            backlog.fetch_add(1, Ordering::AcqRel);
            if tx.send(event.clone()).is_ok() {
                replayed = replayed.saturating_add(1);
            }
        }

        let id = state.next_id;
        state.next_id = state.next_id.saturating_add(1);
        state.subscribers.insert(
            id,
            Sink {
                tx,
                backlog: Arc::clone(&backlog),
            },
        );
        debug!(
            subscriber = id,
            replayed,
            subscribers = state.subscribers.len(),
            "subscriber attached"
        );

        EventStream {
            id: Some(id),
            hub: Arc::downgrade(&self.inner),
            rx,
            backlog,
            terminated: false,
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("EventHub")
            .field("config", &self.inner.config)
            .field("subscribers", &state.subscribers.len())
            .field("replay", &state.replay.len())
            .field("closed", &state.closed)
            .finish()
    }
}

fn decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        Some(n.saturating_sub(1))
    });
}

/// A subscriber's ordered view of the hub.
///
/// Implements `Stream<Item = CustomerEvent>`. The stream is open-ended; it
/// ends only when [`unsubscribe`](Self::unsubscribe) is called, the hub is
/// closed, or the subscriber was disconnected for exceeding its backlog
/// limit. Dropping the stream detaches it from the hub.
pub struct EventStream {
    id: Option<u64>,
    hub: Weak<HubInner>,
    rx: mpsc::UnboundedReceiver<CustomerEvent>,
    backlog: Arc<AtomicUsize>,
    terminated: bool,
}

impl EventStream {
    /// Hub-assigned subscriber id, or `None` once detached.
    pub const fn id(&self) -> Option<u64> {
        self.id
    }

    /// Events queued for this subscriber but not yet consumed.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Detach from the hub and end the stream, discarding anything queued.
    pub fn unsubscribe(&mut self) {
        self.detach();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        self.backlog.store(0, Ordering::Release);
        self.terminated = true;
    }

    fn detach(&mut self) {
        if let Some(id) = self.id.take()
            && let Some(hub) = self.hub.upgrade()
        {
            let mut state = hub.lock();
            state.subscribers.remove(&id);
            debug!(
                subscriber = id,
                subscribers = state.subscribers.len(),
                "subscriber detached"
            );
        }
    }
}

impl Stream for EventStream {
    type Item = CustomerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                decrement(&this.backlog);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                this.detach();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("backlog", &self.backlog())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use patron_types::{ChangeKind, CustomerId};
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn event(n: usize) -> CustomerEvent {
        CustomerEvent::new(CustomerId::from(format!("c-{n}")), ChangeKind::Created)
    }

    async fn next_id(stream: &mut EventStream) -> Option<String> {
        timeout(WAIT, stream.next())
            .await
            .ok()
            .flatten()
            .map(|e| e.customer_id.into_inner())
    }

    #[tokio::test]
    async fn subscribers_see_emission_order() {
        let hub = EventHub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        for n in 1..=3 {
            assert_eq!(hub.emit(event(n)), 2);
        }

        for stream in [&mut a, &mut b] {
            assert_eq!(next_id(stream).await.as_deref(), Some("c-1"));
            assert_eq!(next_id(stream).await.as_deref(), Some("c-2"));
            assert_eq!(next_id(stream).await.as_deref(), Some("c-3"));
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_fine() {
        let hub = EventHub::default();
        assert_eq!(hub.emit(event(1)), 0);
        assert_eq!(hub.replay_len(), 1);
    }

    #[tokio::test]
    async fn late_subscriber_misses_history() {
        let hub = EventHub::default();
        hub.emit(event(1));
        let mut late = hub.subscribe();
        hub.emit(event(2));

        assert_eq!(next_id(&mut late).await.as_deref(), Some("c-2"));
        assert!(
            timeout(Duration::from_millis(50), late.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_hold_back_others() {
        let hub = EventHub::default();
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for n in 0..1_000 {
            hub.emit(event(n));
        }
        for n in 0..1_000 {
            assert_eq!(next_id(&mut fast).await, Some(format!("c-{n}")));
        }
        assert_eq!(fast.backlog(), 0);

        // Nothing was lost for the reader that never kept up.
        assert_eq!(slow.backlog(), 1_000);
        for n in 0..1_000 {
            assert_eq!(next_id(&mut slow).await, Some(format!("c-{n}")));
        }
    }

    #[tokio::test]
    async fn replay_yields_recent_events_then_live() {
        let hub = EventHub::new(HubConfig {
            replay_capacity: 3,
            max_backlog: None,
        });
        for n in 1..=5 {
            hub.emit(event(n));
        }
        assert_eq!(hub.replay_len(), 3);

        let mut all = hub.subscribe_with_replay(10);
        let mut two = hub.subscribe_with_replay(2);
        hub.emit(event(6));

        for expected in ["c-3", "c-4", "c-5", "c-6"] {
            assert_eq!(next_id(&mut all).await.as_deref(), Some(expected));
        }
        for expected in ["c-4", "c-5", "c-6"] {
            assert_eq!(next_id(&mut two).await.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn zero_capacity_disables_replay() {
        let hub = EventHub::new(HubConfig {
            replay_capacity: 0,
            max_backlog: None,
        });
        hub.emit(event(1));
        assert_eq!(hub.replay_len(), 0);
        let mut stream = hub.subscribe_with_replay(5);
        hub.emit(event(2));
        assert_eq!(next_id(&mut stream).await.as_deref(), Some("c-2"));
    }

    #[tokio::test]
    async fn dropping_a_stream_detaches_it() {
        let hub = EventHub::default();
        let a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(), 1);

        b.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(b.next().await.is_none());
        assert_eq!(hub.emit(event(1)), 0);
    }

    #[tokio::test]
    async fn backlog_limit_disconnects_only_the_slow_subscriber() {
        let hub = EventHub::new(HubConfig {
            replay_capacity: 16,
            max_backlog: Some(2),
        });
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for n in 1..=3 {
            hub.emit(event(n));
            assert_eq!(next_id(&mut fast).await, Some(format!("c-{n}")));
        }

        // The slow reader hit its limit on the third emit and was detached.
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(next_id(&mut slow).await.as_deref(), Some("c-1"));
        assert_eq!(next_id(&mut slow).await.as_deref(), Some("c-2"));
        assert!(slow.next().await.is_none());

        hub.emit(event(4));
        assert_eq!(next_id(&mut fast).await.as_deref(), Some("c-4"));
    }

    #[tokio::test]
    async fn replay_leaves_room_for_the_next_live_event() {
        let hub = EventHub::new(HubConfig {
            replay_capacity: 8,
            max_backlog: Some(2),
        });
        hub.emit(event(1));
        hub.emit(event(2));

        let mut stream = hub.subscribe_with_replay(5);
        assert_eq!(stream.backlog(), 1);
        assert_eq!(hub.emit(event(3)), 1);
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(next_id(&mut stream).await.as_deref(), Some("c-2"));
        assert_eq!(next_id(&mut stream).await.as_deref(), Some("c-3"));
    }

    #[tokio::test]
    async fn close_ends_streams_after_draining() {
        let hub = EventHub::default();
        let mut stream = hub.subscribe();
        hub.emit(event(1));
        hub.close();

        assert!(hub.is_closed());
        assert_eq!(next_id(&mut stream).await.as_deref(), Some("c-1"));
        assert!(stream.next().await.is_none());

        let mut after = hub.subscribe();
        assert!(after.next().await.is_none());
        assert_eq!(hub.emit(event(2)), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_their_own_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let hub = EventHub::default();
        let mut stream = hub.subscribe();

        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..PER_PRODUCER {
                    hub.emit(CustomerEvent::new(
                        CustomerId::from(format!("{p}:{n}")),
                        ChangeKind::Updated,
                    ));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut last_seen = vec![None::<usize>; PRODUCERS];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let id = next_id(&mut stream).await.unwrap();
            let (p, n) = id.split_once(':').unwrap();
            let (p, n): (usize, usize) = (p.parse().unwrap(), n.parse().unwrap());
            if let Some(prev) = last_seen[p] {
                assert!(n > prev, "producer {p} delivered {n} after {prev}");
            }
            last_seen[p] = Some(n);
        }
    }
}
