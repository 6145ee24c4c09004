//! # EarlyQueue: bounded pre-subscription holding area.
//!
//! Each [`BufferManager`](crate::BufferManager) owns one `EarlyQueue`. While the buffer
//! has no attached handler, `add` routes events here instead of the main sequence,
//! so events emitted during startup races are not lost.
//!
//! ## Rules
//! - **Fixed capacity**: a ring of `capacity` slots, allocated once; never grows.
//! - **Overwrite oldest**: `offer` on a full ring replaces the oldest entry (never blocks).
//! - **One-way retirement**: once the owning [`EarlyBuffers`] is disabled, the ring is
//!   emptied and refuses further entries forever.
//! - **Order preserving**: `drain` yields entries oldest first.
//!
//! ```text
//! offer(e5) on a full ring (cap = 4):
//!   head
//!    ▼
//!   [e1][e2][e3][e4]  ──►  [e5][e2][e3][e4]   drain() = e2, e3, e4, e5
//!                               ▲
//!                              head
//! ```

use std::sync::{Arc, Mutex, Weak};

use super::early_buffers::{Discard, EarlyBuffers};
use super::lock;

/// Slot storage guarded by the queue mutex.
struct Ring<E> {
    slots: Box<[Option<Arc<E>>]>,
    head: usize,
    len: usize,
    retired: bool,
}

impl<E> Ring<E> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            retired: false,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pushes at the tail; returns `true` if the oldest entry was overwritten.
    fn push(&mut self, event: Arc<E>) -> bool {
        let cap = self.capacity();
        if self.len < cap {
            let tail = (self.head + self.len) % cap;
            if let Some(slot) = self.slots.get_mut(tail) {
                *slot = Some(event);
            }
            self.len += 1;
            false
        } else {
            if let Some(slot) = self.slots.get_mut(self.head) {
                *slot = Some(event);
            }
            self.head = (self.head + 1) % cap;
            true
        }
    }

    fn drain(&mut self) -> Vec<Arc<E>> {
        let cap = self.capacity();
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(ev) = self.slots.get_mut((self.head + i) % cap).and_then(Option::take) {
                out.push(ev);
            }
        }
        self.head = 0;
        self.len = 0;
        out
    }

    fn retire(&mut self) -> usize {
        let dropped = self.len;
        self.slots = Box::default();
        self.head = 0;
        self.len = 0;
        self.retired = true;
        dropped
    }
}

/// Bounded ring of events emitted before any handler attached to a source.
pub struct EarlyQueue<E> {
    ring: Mutex<Ring<E>>,
    registry: Arc<EarlyBuffers>,
}

impl<E: Send + Sync + 'static> EarlyQueue<E> {
    /// Creates a queue and tracks it in `registry`.
    ///
    /// If the registry is already disabled the queue starts retired.
    pub fn new(capacity: usize, registry: &Arc<EarlyBuffers>) -> Arc<Self> {
        let queue = Arc::new(Self {
            ring: Mutex::new(Ring::new(capacity)),
            registry: Arc::clone(registry),
        });

        let weak: Weak<dyn Discard> = Arc::downgrade(&queue) as Weak<dyn Discard>;
        registry.track(weak);
        if registry.is_disabled() {
            queue.discard();
        }
        queue
    }
}

impl<E> EarlyQueue<E> {
    /// Offers an event; returns `false` if the queue is retired or has zero capacity.
    ///
    /// Overwrites the oldest entry when full.
    pub fn offer(&self, event: Arc<E>) -> bool {
        let mut ring = lock(&self.ring);
        // checked under the ring lock so a concurrent disable cannot leave a stale entry
        if ring.retired || ring.capacity() == 0 || self.registry.is_disabled() {
            return false;
        }
        if ring.push(event) {
            tracing::trace!(capacity = ring.capacity(), "early queue full; oldest entry overwritten");
        }
        true
    }

    /// Takes every queued event, oldest first, leaving the queue empty.
    pub fn drain(&self) -> Vec<Arc<E>> {
        lock(&self.ring).drain()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        lock(&self.ring).len
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity (0 once retired).
    pub fn capacity(&self) -> usize {
        lock(&self.ring).capacity()
    }

    /// Returns `true` once the queue no longer accepts entries.
    pub fn is_retired(&self) -> bool {
        lock(&self.ring).retired
    }
}

impl<E: Send + Sync> Discard for EarlyQueue<E> {
    fn discard(&self) -> usize {
        lock(&self.ring).retire()
    }
}
