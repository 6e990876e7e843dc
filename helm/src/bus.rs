//! In-process topic bus: bounded FIFO queue per subscriber, drop-oldest on
//! overflow so publishers never block.
//!
//! Subscribers that cannot tolerate drops must read faster or use the
//! persistent catch-up path; the bus guarantees liveness, not completeness.
//! Mission topics are `mission:{id}`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

fn lock_queue<T>(mutex: &Mutex<VecDeque<T>>) -> MutexGuard<'_, VecDeque<T>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SubscriberQueue<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
}

/// A subscriber's end of one topic queue. Dropping it unsubscribes on the
/// next publish to the topic.
pub struct Subscription<T> {
    inner: Arc<SubscriberQueue<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next event on this subscription.
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            if let Some(event) = lock_queue(&self.inner.queue).pop_front() {
                return event;
            }
            notified.await;
        }
    }

    /// Non-blocking read; `None` when the queue is empty.
    pub fn try_recv(&self) -> Option<T> {
        lock_queue(&self.inner.queue).pop_front()
    }
}

/// Topic-keyed fanout with bounded per-subscriber queues.
pub struct EventBus<T> {
    topics: Mutex<HashMap<String, Vec<Arc<SubscriberQueue<T>>>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Bus with the given per-subscriber queue capacity (default 1024).
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Subscription<T> {
        let inner = Arc::new(SubscriberQueue {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.capacity,
        });
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(topic.to_string())
            .or_default()
            .push(Arc::clone(&inner));
        Subscription { inner }
    }

    pub fn unsubscribe(&self, topic: &str, subscription: &Subscription<T>) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| !Arc::ptr_eq(s, &subscription.inner));
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Enqueues the event for every subscriber of the topic; never blocks.
    /// Full queues drop their oldest entry and the bus-wide dropped counter
    /// increments. Queues whose subscription was dropped are pruned here.
    pub fn publish(&self, topic: &str, event: T) {
        let subscribers: Vec<Arc<SubscriberQueue<T>>> = {
            let mut topics = self
                .topics
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(subscribers) = topics.get_mut(topic) else {
                return;
            };
            subscribers.retain(|s| Arc::strong_count(s) > 1);
            if subscribers.is_empty() {
                topics.remove(topic);
                return;
            }
            subscribers.clone()
        };

        for subscriber in subscribers {
            {
                let mut queue = lock_queue(&subscriber.queue);
                if queue.len() >= subscriber.capacity {
                    queue.pop_front();
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(topic, dropped, "bus queue full, dropped oldest event");
                }
                queue.push_back(event.clone());
            }
            subscriber.notify.notify_one();
        }
    }

    /// Total events dropped to overflow since the bus was built.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
