//! The in-process publish/subscribe broker.
//!
//! [`EventBus`] is a cheap-to-clone handle; every clone shares the same
//! subscriber table. It is constructed explicitly and injected into the
//! store and controller, never reached through a global.
//!
//! # Delivery semantics
//!
//! - **Snapshot dispatch**: `publish` copies the topic's subscriber list and
//!   releases the table lock before invoking anything, so callbacks may
//!   subscribe, unsubscribe or publish re-entrantly.
//! - **Ordering**: subscribers of one topic are called in subscription
//!   order. There is no ordering guarantee across topics.
//! - **Isolation**: a callback returning `Err` or panicking is logged and
//!   counted; the remaining subscribers still run and the publisher never
//!   sees the failure.
//! - **Fire-and-forget**: no retry, no persistence, no at-least-once.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use campaign_types::{Event, Topic};

use crate::SubscriberError;

/// Default number of publish records kept for debugging.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Longest panic payload copied into a log line.
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

/// A subscriber callback.
pub type Callback = Arc<dyn Fn(&Event) -> Result<(), SubscriberError> + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    context: Option<String>,
    once: bool,
    callback: Callback,
}

/// One entry in the bus's debug history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// Topic it was published on.
    pub topic: Topic,
    /// Subscribers in the dispatch snapshot.
    pub subscribers: usize,
}

/// Outcome of a single `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Callbacks that returned `Err` or panicked.
    pub failed: usize,
}

/// Lifetime counters for the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events published.
    pub published: u64,
    /// Successful callback invocations.
    pub delivered: u64,
    /// Failed callback invocations.
    pub failed: u64,
    /// Live subscribers across all topics.
    pub subscribers: usize,
}

struct BusInner {
    subscribers: Mutex<BTreeMap<Topic, Vec<Subscriber>>>,
    history: Mutex<VecDeque<PublishRecord>>,
    history_capacity: usize,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl BusInner {
    fn table(&self) -> MutexGuard<'_, BTreeMap<Topic, Vec<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: Topic, id: u64) -> bool {
        let mut table = self.table();
        let Some(list) = table.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            table.remove(&topic);
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Handle returned by [`EventBus::subscribe`] and [`EventBus::once`].
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[derive(Debug, Clone)]
pub struct Subscription {
    topic: Topic,
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove this subscriber from the bus.
    ///
    /// Returns `false` when it was already gone (unsubscribed, cleared,
    /// consumed as a `once` subscriber, or the bus was dropped).
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|inner| inner.remove(self.topic, self.id))
    }
}

impl core::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusInner")
            .field("history_capacity", &self.history_capacity)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Synchronous publish/subscribe broker.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the default history capacity.
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a bus that keeps the last `capacity` publish records.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(BTreeMap::new()),
                history: Mutex::new(VecDeque::with_capacity(capacity)),
                history_capacity: capacity,
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe `callback` to `topic`.
    ///
    /// `context` is an optional label (e.g. `"controller"`) attached to log
    /// lines about this subscriber.
    pub fn subscribe<F>(&self, topic: Topic, callback: F, context: Option<&str>) -> Subscription
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.add(topic, Arc::new(callback), context, false)
    }

    /// Subscribe `callback` to `topic` for a single delivery.
    ///
    /// The subscriber is removed before its callback runs, so a re-entrant
    /// publish from inside the callback cannot reach it a second time.
    pub fn once<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.add(topic, Arc::new(callback), None, true)
    }

    fn add(
        &self,
        topic: Topic,
        callback: Callback,
        context: Option<&str>,
        once: bool,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .table()
            .entry(topic)
            .or_default()
            .push(Subscriber {
                id,
                context: context.map(str::to_owned),
                once,
                callback,
            });
        debug!(
            topic = %topic,
            subscriber = id,
            context = context.unwrap_or("-"),
            once,
            "subscribed"
        );
        Subscription {
            topic,
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every subscriber of `event.topic()`.
    pub fn publish(&self, event: &Event) -> PublishReport {
        let topic = event.topic();
        let snapshot = self.snapshot(topic);
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.record_history(topic, snapshot.len());

        let mut report = PublishReport::default();
        for subscriber in &snapshot {
            if dispatch(subscriber, topic, event) {
                report.delivered = report.delivered.saturating_add(1);
            } else {
                report.failed = report.failed.saturating_add(1);
            }
        }

        self.inner
            .delivered
            .fetch_add(as_count(report.delivered), Ordering::Relaxed);
        self.inner
            .failed
            .fetch_add(as_count(report.failed), Ordering::Relaxed);
        debug!(
            topic = %topic,
            delivered = report.delivered,
            failed = report.failed,
            "published"
        );
        report
    }

    /// Yield to the scheduler once, then [`publish`](Self::publish).
    ///
    /// Ordering and isolation are the same as the synchronous path; awaiting
    /// several `publish_async` calls in sequence delivers them in order.
    pub async fn publish_async(&self, event: Event) -> PublishReport {
        tokio::task::yield_now().await;
        self.publish(&event)
    }

    /// Copy the topic's subscriber list and drop its `once` subscribers.
    fn snapshot(&self, topic: Topic) -> Vec<Subscriber> {
        let mut table = self.inner.table();
        let Some(list) = table.get_mut(&topic) else {
            return Vec::new();
        };
        let snapshot = list.clone();
        list.retain(|s| !s.once);
        if list.is_empty() {
            table.remove(&topic);
        }
        snapshot
    }

    fn record_history(&self, topic: Topic, subscribers: usize) {
        if self.inner.history_capacity == 0 {
            return;
        }
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.inner.history_capacity {
            history.pop_front();
        }
        history.push_back(PublishRecord {
            timestamp: Utc::now(),
            topic,
            subscribers,
        });
    }

    /// Remove the subscribers of `topic`, or of every topic when `None`.
    pub fn clear(&self, topic: Option<Topic>) {
        let mut table = self.inner.table();
        match topic {
            Some(topic) => {
                table.remove(&topic);
            }
            None => table.clear(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner.table().get(&topic).map_or(0, Vec::len)
    }

    /// Topics that currently have subscribers.
    pub fn topics(&self) -> Vec<Topic> {
        self.inner.table().keys().copied().collect()
    }

    /// The most recent publish records, oldest first.
    pub fn history(&self) -> Vec<PublishRecord> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            subscribers: self.inner.table().values().map(Vec::len).sum(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn as_count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Invoke one subscriber, containing any failure. Returns `true` on success.
fn dispatch(subscriber: &Subscriber, topic: Topic, event: &Event) -> bool {
    let context = subscriber.context.as_deref().unwrap_or("-");
    match catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event))) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(
                topic = %topic,
                subscriber = subscriber.id,
                context,
                error = %err,
                "subscriber failed"
            );
            false
        }
        Err(payload) => {
            error!(
                topic = %topic,
                subscriber = subscriber.id,
                context,
                payload = %panic_summary(payload.as_ref()),
                "subscriber panicked"
            );
            false
        }
    }
}

fn panic_summary(payload: &(dyn std::any::Any + Send)) -> String {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    };
    let flat = message.replace(['\n', '\r'], " ");
    let mut truncated: String = flat.chars().take(MAX_PANIC_PAYLOAD_CHARS).collect();
    if flat.chars().count() > MAX_PANIC_PAYLOAD_CHARS {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use campaign_types::{ChangeAction, RecordId};
    use std::sync::Mutex as StdMutex;

    fn updated(n: u64) -> Event {
        Event::DataUpdated {
            action: ChangeAction::Add,
            id: Some(RecordId::new(format!("c-{n}"))),
            version: n,
        }
    }

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Callback) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &str| -> Callback {
                let log = Arc::clone(&log);
                let name = name.to_owned();
                Arc::new(move |_event: &Event| {
                    log.lock().unwrap().push(name.clone());
                    Ok(())
                })
            }
        };
        (log, make)
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        for name in ["a", "b", "c"] {
            let cb = make(name);
            bus.subscribe(Topic::DataUpdated, move |e| cb(e), None);
        }
        let report = bus.publish(&updated(1));
        assert_eq!(report.delivered, 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn only_matching_topic_is_notified() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let cb = make("loaded");
        bus.subscribe(Topic::DataLoaded, move |e| cb(e), None);
        let report = bus.publish(&updated(1));
        assert_eq!(report, PublishReport::default());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(
            Topic::DataUpdated,
            |_| Err(SubscriberError::new("grid exploded")),
            Some("grid"),
        );
        let cb = make("chart");
        bus.subscribe(Topic::DataUpdated, move |e| cb(e), Some("chart"));

        let report = bus.publish(&updated(1));
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["chart"]);
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(Topic::DataUpdated, |_| panic!("boom"), None);
        let cb = make("after");
        bus.subscribe(Topic::DataUpdated, move |e| cb(e), None);

        let report = bus.publish(&updated(1));
        assert_eq!(report.failed, 1);
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(bus.stats().failed, 1);
    }

    #[test]
    fn unsubscribe_removes_exactly_one() {
        let bus = EventBus::new();
        let first = bus.subscribe(Topic::DataUpdated, |_| Ok(()), None);
        let _second = bus.subscribe(Topic::DataUpdated, |_| Ok(()), None);
        assert_eq!(bus.subscriber_count(Topic::DataUpdated), 2);
        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert_eq!(bus.subscriber_count(Topic::DataUpdated), 1);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let cb = make("once");
        let sub = bus.once(Topic::DataUpdated, move |e| cb(e));
        bus.publish(&updated(1));
        bus.publish(&updated(2));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn subscribe_during_dispatch_applies_to_next_publish() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let inner_bus = bus.clone();
        let late: Callback = make("late");
        bus.subscribe(
            Topic::DataUpdated,
            move |_| {
                let late = Arc::clone(&late);
                inner_bus.subscribe(Topic::DataUpdated, move |e| late(e), None);
                Ok(())
            },
            None,
        );

        bus.publish(&updated(1));
        assert!(log.lock().unwrap().is_empty());
        bus.publish(&updated(2));
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn unsubscribe_during_dispatch_keeps_snapshot() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let victim = Arc::new(StdMutex::new(None::<Subscription>));
        let victim_in_cb = Arc::clone(&victim);
        bus.subscribe(
            Topic::DataUpdated,
            move |_| {
                if let Some(sub) = victim_in_cb.lock().unwrap().take() {
                    sub.unsubscribe();
                }
                Ok(())
            },
            None,
        );
        let cb = make("victim");
        *victim.lock().unwrap() = Some(bus.subscribe(Topic::DataUpdated, move |e| cb(e), None));

        bus.publish(&updated(1));
        bus.publish(&updated(2));
        assert_eq!(*log.lock().unwrap(), vec!["victim"]);
    }

    #[test]
    fn clear_by_topic_and_all() {
        let bus = EventBus::new();
        bus.subscribe(Topic::DataUpdated, |_| Ok(()), None);
        bus.subscribe(Topic::DataLoaded, |_| Ok(()), None);
        bus.clear(Some(Topic::DataUpdated));
        assert_eq!(bus.topics(), vec![Topic::DataLoaded]);
        bus.clear(None);
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::with_history_capacity(2);
        for n in 0..5 {
            bus.publish(&updated(n));
        }
        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(bus.stats().published, 5);
    }

    #[tokio::test]
    async fn async_publish_preserves_order() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_in_cb = Arc::clone(&seen);
        bus.subscribe(
            Topic::DataUpdated,
            move |event| {
                if let Event::DataUpdated { version, .. } = event {
                    seen_in_cb.lock().unwrap().push(*version);
                }
                Ok(())
            },
            None,
        );
        for n in 1..=3 {
            bus.publish_async(updated(n)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn panic_summary_truncates() {
        let long = "x".repeat(500);
        let summary = panic_summary(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), MAX_PANIC_PAYLOAD_CHARS + 3);
    }
}
