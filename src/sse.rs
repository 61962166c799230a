//! # SSE Hub
//!
//! Pub/sub broadcaster for server-sent events, with a bounded FIFO per
//! subscriber (§4.4). Deliberately built on `tokio::sync::mpsc` rather
//! than `tokio::sync::broadcast`: broadcast's lag-based semantics count
//! *missed* messages per-receiver after the fact, where this hub needs an
//! exact drop count at the moment a full buffer forces one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::metrics::Metrics;

/// One SSE frame. An empty `event_type` renders no `event:` line (the
/// default, unnamed event per the wire format in §6).
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub payload: String,
}

impl Event {
    pub fn new(payload: impl Into<String>) -> Self {
        Self { event_type: String::new(), payload: payload.into() }
    }

    pub fn named(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), payload: payload.into() }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn json_named<T: Serialize>(event_type: impl Into<String>, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::named(event_type, serde_json::to_string(value)?))
    }

    /// Renders `event: <type>\n` (omitted when empty) + `data: <payload>\n\n`.
    pub fn to_wire(&self) -> String {
        if self.event_type.is_empty() {
            format!("data: {}\n\n", self.payload)
        } else {
            format!("event: {}\ndata: {}\n\n", self.event_type, self.payload)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SseStats {
    pub clients: usize,
    pub dropped_total: u64,
}

struct Subscriber {
    sender: mpsc::Sender<Event>,
}

/// Pub/sub broadcaster. Each subscriber owns a bounded FIFO; a full
/// buffer drops the event for that subscriber only, never blocking the
/// broadcaster or other subscribers.
pub struct SseHub {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
    buffer_size: usize,
    closed: AtomicBool,
    metrics: OnceCell<Arc<Metrics>>,
}

/// Returned by `subscribe`; dropping it (or calling `cancel` explicitly)
/// removes the subscriber and closes its channel exactly once.
pub struct Subscription {
    hub: Arc<SseHub>,
    id: u64,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub.subscribers.lock().remove(&self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl SseHub {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped_total: AtomicU64::new(0),
            buffer_size: buffer_size.max(1),
            closed: AtomicBool::new(false),
            metrics: OnceCell::new(),
        })
    }

    /// Threads the process-wide metrics handle in so a dropped delivery
    /// also feeds `sse_dropped_total` (§4.9, §11) alongside the hub's own
    /// atomic counter that backs [`SseHub::dropped_total`]. A no-op past
    /// the first call.
    pub fn set_metrics(&self, metrics: Arc<Metrics>) {
        let _ = self.metrics.set(metrics);
    }

    /// Returns `None` after `close()` has been called.
    pub fn subscribe(self: &Arc<Self>) -> Option<(mpsc::Receiver<Event>, Subscription)> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.subscribers.lock().insert(id, Subscriber { sender: tx });
        Some((
            rx,
            Subscription { hub: Arc::clone(self), id, cancelled: AtomicBool::new(false) },
        ))
    }

    /// Non-blocking fan-out of an unnamed event. A subscriber whose buffer
    /// is full drops this event only; the drop counter is incremented once
    /// per dropped delivery.
    pub fn broadcast(&self, payload: impl Into<String>) {
        self.dispatch(Event::new(payload));
    }

    pub fn broadcast_event(&self, event_type: impl Into<String>, payload: impl Into<String>) {
        self.dispatch(Event::named(event_type, payload));
    }

    fn dispatch(&self, event: Event) {
        let subscribers = self.subscribers.lock();
        for sub in subscribers.values() {
            if sub.sender.try_send(event.clone()).is_err() {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = self.metrics.get() {
                    metrics.sse_dropped_total.inc();
                }
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SseStats {
        SseStats { clients: self.client_count(), dropped_total: self.dropped_total() }
    }

    /// Removes and closes every subscriber, marking the hub closed so
    /// further `subscribe()` calls return `None`. Idempotent: a second
    /// call finds nothing left to close and returns 0.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let mut subscribers = self.subscribers.lock();
        let count = subscribers.len();
        subscribers.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn event_wire_format_omits_type_when_unnamed() {
        assert_eq!(Event::new("hi").to_wire(), "data: hi\n\n");
        assert_eq!(Event::named("request", "hi").to_wire(), "event: request\ndata: hi\n\n");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_all_subscribers_in_order() {
        let hub = SseHub::new(10);
        let (mut rx1, _s1) = hub.subscribe().unwrap();
        let (mut rx2, _s2) = hub.subscribe().unwrap();

        hub.broadcast("a");
        hub.broadcast("b");

        assert_eq!(rx1.recv().await.unwrap().payload, "a");
        assert_eq!(rx1.recv().await.unwrap().payload, "b");
        assert_eq!(rx2.recv().await.unwrap().payload, "a");
        assert_eq!(rx2.recv().await.unwrap().payload, "b");
    }

    #[tokio::test]
    async fn slow_subscriber_drops_overflow_and_counts_exactly() {
        let hub = SseHub::new(3);
        let (mut rx, _sub) = hub.subscribe().unwrap();

        for i in 0..5 {
            hub.broadcast(format!("msg-{i}"));
        }

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event.payload);
        }
        assert_eq!(received.len(), 3);
        assert_eq!(hub.dropped_total(), 2);
    }

    #[tokio::test]
    async fn cancel_removes_subscriber_and_is_idempotent() {
        let hub = SseHub::new(10);
        let (_rx, sub) = hub.subscribe().unwrap();
        assert_eq!(hub.client_count(), 1);

        sub.cancel();
        assert_eq!(hub.client_count(), 0);
        sub.cancel();
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_cancels_it() {
        let hub = SseHub::new(10);
        {
            let (_rx, _sub) = hub.subscribe().unwrap();
            assert_eq!(hub.client_count(), 1);
        }
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn close_removes_all_subscribers_and_blocks_future_subscribe() {
        let hub = SseHub::new(10);
        let (_rx1, _s1) = hub.subscribe().unwrap();
        let (_rx2, _s2) = hub.subscribe().unwrap();

        let closed = hub.close();
        assert_eq!(closed, 2);
        assert_eq!(hub.client_count(), 0);
        assert!(hub.subscribe().is_none());
        assert_eq!(hub.close(), 0);
    }

    #[tokio::test]
    async fn closed_channel_is_observed_by_receiver() {
        let hub = SseHub::new(10);
        let (mut rx, sub) = hub.subscribe().unwrap();
        sub.cancel();
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.unwrap().is_none());
    }
}
