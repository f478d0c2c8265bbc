//! # Work FIFO Capability
//!
//! The concurrent queue primitive underlying each [`DatabaseQueue`]. Every
//! queue owns exactly one FIFO; anything else holding the FIFO does so as a
//! non-owning reference. Payloads are opaque byte envelopes - the FIFO does
//! not understand query structure, only priority classes.
//!
//! [`DatabaseQueue`]: crate::queue::DatabaseQueue

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Concurrent-safe FIFO with priority classes.
///
/// Dequeue order is highest priority first; within a priority class,
/// submission order is preserved.
pub trait WorkFifo: Send + Sync {
    /// Queue name, used for diagnostics.
    fn name(&self) -> &str;

    /// Push a serialized payload at the given priority. Returns false when
    /// the payload is rejected (implementation-defined capacity policy).
    fn enqueue(&self, payload: Vec<u8>, priority: i32) -> bool;

    /// Pop the next payload, or None when empty.
    fn dequeue(&self) -> Option<Vec<u8>>;

    /// Number of queued payloads.
    fn size(&self) -> usize;

    /// Age of the oldest queued payload in milliseconds, or None when empty.
    fn oldest_element_age_ms(&self) -> Option<u64>;
}

struct QueuedPayload {
    bytes: Vec<u8>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct MemoryFifoInner {
    // Keyed by negated priority so iteration yields highest priority first.
    classes: BTreeMap<i32, VecDeque<QueuedPayload>>,
    size: usize,
}

/// In-memory [`WorkFifo`] implementation.
pub struct MemoryFifo {
    name: String,
    inner: Mutex<MemoryFifoInner>,
}

impl MemoryFifo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryFifoInner::default()),
        }
    }
}

impl WorkFifo for MemoryFifo {
    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&self, payload: Vec<u8>, priority: i32) -> bool {
        let mut inner = self.inner.lock();
        inner
            .classes
            .entry(-priority)
            .or_default()
            .push_back(QueuedPayload {
                bytes: payload,
                enqueued_at: Instant::now(),
            });
        inner.size += 1;
        true
    }

    fn dequeue(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let key = *inner.classes.keys().next()?;
        let class = inner.classes.get_mut(&key)?;
        let item = class.pop_front();
        if class.is_empty() {
            inner.classes.remove(&key);
        }
        if item.is_some() {
            inner.size -= 1;
        }
        item.map(|p| p.bytes)
    }

    fn size(&self) -> usize {
        self.inner.lock().size
    }

    fn oldest_element_age_ms(&self) -> Option<u64> {
        let inner = self.inner.lock();
        let oldest = inner
            .classes
            .values()
            .filter_map(|class| class.front())
            .map(|p| p.enqueued_at)
            .min()?;
        Some(oldest.elapsed().as_millis() as u64)
    }
}
