use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_config::OutboundConfig;
use switchboard_core::{EventSink, GatewayEvent, SwitchboardError};

use crate::adapter::AdapterSet;

#[derive(Debug, Clone)]
pub struct OutboundSettings {
    pub capacity: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub workers: usize,
}

impl OutboundSettings {
    pub fn from_config(config: &OutboundConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            workers: config.workers.max(1),
        }
    }
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self::from_config(&OutboundConfig::default())
    }
}

/// One chunk waiting for delivery.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub channel_id: String,
    pub chat_id: String,
    pub text: String,
    attempts: u32,
    not_before: Instant,
}

impl OutboundItem {
    fn key(&self) -> (String, String) {
        (self.channel_id.clone(), self.chat_id.clone())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Default)]
struct Slots {
    items: VecDeque<OutboundItem>,
    /// Conversations with a chunk currently being sent.
    in_flight: HashSet<(String, String)>,
}

struct Inner {
    settings: OutboundSettings,
    adapters: AdapterSet,
    sink: Arc<dyn EventSink>,
    slots: Mutex<Slots>,
    notify: Notify,
    counters: Counters,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// `base * 2^(attempt-1)`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Bounded, retrying delivery queue.
///
/// Chunks for the same conversation go out in order; different
/// conversations are delivered concurrently by the worker pool. When full,
/// the oldest item is evicted.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

enum Next {
    Item(OutboundItem),
    WaitUntil(Option<Instant>),
}

impl OutboundQueue {
    pub fn new(settings: OutboundSettings, adapters: AdapterSet, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                adapters,
                sink,
                slots: Mutex::new(Slots::default()),
                notify: Notify::new(),
                counters: Counters::default(),
                cancel: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Add a chunk. Returns `false` if an older item had to be evicted to make room.
    pub fn enqueue(&self, channel_id: &str, chat_id: &str, text: &str) -> bool {
        let inner = &self.inner;
        let evicted = {
            let mut slots = inner.slots.lock();
            slots.items.push_back(OutboundItem {
                channel_id: channel_id.to_string(),
                chat_id: chat_id.to_string(),
                text: text.to_string(),
                attempts: 0,
                not_before: Instant::now(),
            });
            if slots.items.len() > inner.settings.capacity {
                slots.items.pop_front()
            } else {
                None
            }
        };
        inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        inner.notify.notify_one();

        match evicted {
            Some(old) => {
                inner.counters.evicted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = %old.channel_id,
                    chat_id = %old.chat_id,
                    capacity = inner.settings.capacity,
                    "outbound queue full, evicted oldest item"
                );
                false
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.slots.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            pending: self.len(),
        }
    }

    /// Spawn the worker pool. Calling twice is a no-op.
    pub fn start(&self) {
        let mut workers = self.inner.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for n in 0..self.inner.settings.workers {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(async move { worker(n, inner).await }));
        }
        info!(workers = self.inner.settings.workers, "outbound queue started");
    }

    /// Stop the workers after their current send. Undelivered items are discarded.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        let left = self.len();
        if left > 0 {
            warn!(left, "outbound queue shut down with undelivered items");
        }
    }

    /// Wait until nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        loop {
            {
                let slots = self.inner.slots.lock();
                if slots.items.is_empty() && slots.in_flight.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Inner {
    /// Take the first eligible item, skipping conversations that are busy or
    /// whose head item is still backing off.
    fn take_next(&self) -> Next {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let mut blocked: HashSet<(String, String)> = HashSet::new();
        let mut earliest: Option<Instant> = None;
        let mut pick = None;

        for (i, item) in slots.items.iter().enumerate() {
            let key = item.key();
            if blocked.contains(&key) || slots.in_flight.contains(&key) {
                continue;
            }
            if item.not_before > now {
                earliest = Some(earliest.map_or(item.not_before, |e| e.min(item.not_before)));
                blocked.insert(key);
                continue;
            }
            pick = Some(i);
            break;
        }

        match pick.and_then(|i| slots.items.remove(i)) {
            Some(item) => {
                slots.in_flight.insert(item.key());
                Next::Item(item)
            }
            None => Next::WaitUntil(earliest),
        }
    }

    fn finish(&self, item: &OutboundItem) {
        self.slots.lock().in_flight.remove(&item.key());
        self.notify.notify_one();
    }

    async fn deliver(&self, mut item: OutboundItem) {
        let adapter = self.adapters.read().get(&item.channel_id).cloned();
        let Some(adapter) = adapter else {
            self.give_up(&item, &SwitchboardError::UnknownChannel(item.channel_id.clone()));
            self.finish(&item);
            return;
        };

        item.attempts += 1;
        match adapter.send(&item.chat_id, &item.text).await {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %item.channel_id, chat_id = %item.chat_id, attempts = item.attempts, "delivered");
                self.finish(&item);
            }
            Err(e) => {
                let cap = adapter
                    .max_delivery_attempts()
                    .unwrap_or(self.settings.max_attempts)
                    .max(1);
                if e.is_transient() && item.attempts < cap {
                    let delay =
                        backoff_delay(item.attempts, self.settings.base_delay, self.settings.max_delay);
                    debug!(
                        channel = %item.channel_id,
                        attempt = item.attempts,
                        ?delay,
                        error = %e,
                        "delivery failed, will retry"
                    );
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    item.not_before = Instant::now() + delay;
                    let key = item.key();
                    let mut slots = self.slots.lock();
                    slots.in_flight.remove(&key);
                    slots.items.push_front(item);
                    drop(slots);
                    self.notify.notify_one();
                } else {
                    self.give_up(&item, &e);
                    self.finish(&item);
                }
            }
        }
    }

    fn give_up(&self, item: &OutboundItem, error: &SwitchboardError) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            channel = %item.channel_id,
            chat_id = %item.chat_id,
            attempts = item.attempts,
            error = %error,
            "dropping undeliverable message"
        );
        self.sink.emit(GatewayEvent::ChannelError {
            channel_id: item.channel_id.clone(),
            chat_id: item.chat_id.clone(),
            error: error.to_string(),
        });
    }
}

async fn worker(n: usize, inner: Arc<Inner>) {
    debug!(worker = n, "outbound worker started");
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }
        match inner.take_next() {
            Next::Item(item) => inner.deliver(item).await,
            Next::WaitUntil(deadline) => {
                let sleep = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = inner.notify.notified() => {}
                    _ = sleep => {}
                }
            }
        }
    }
    debug!(worker = n, "outbound worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(4, base, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(10, base, max), max);
        assert_eq!(backoff_delay(64, base, max), max);
    }
}
