//! # BufferManager: retained events and per-handler cursors for one source.
//!
//! A source publishes into its `BufferManager` with [`add`](BufferManager::add); every
//! attached handler reads the same sequence through its own cursor (multicast).
//!
//! ## Architecture
//! ```text
//! Source ── add(e) ──► BufferManager ("trace")
//!                        │
//!                        ├─ no attachment yet ──► EarlyQueue (bounded ring)
//!                        │                           └─ replayed on first attach
//!                        │
//!                        ├─ events: [e3][e4][e5][e6]      head = 3
//!                        │            ▲       ▲
//!                        │   cursor "metrics" "audit"
//!                        │
//!                        └─ sync handlers ──► synchronous_write(&e) on producer thread
//! ```
//!
//! ## Rules
//! - **Non-blocking add**: `add` takes the buffer lock briefly and never waits on readers.
//! - **FIFO per source**: insertion order is delivery order for every cursor.
//! - **Monotonic cursors**: a cursor only moves forward.
//! - **Late attach**: a cursor created after the first attachment starts at the tail.
//! - **Trimming**: events every cursor has passed are dropped; an optional retention
//!   cap drops the oldest event and moves lagging cursors forward.
//! - **Detach is final**: once a synchronous handler is detached and
//!   [`quiesce`](BufferManager::quiesce) returns, it receives no further write.
//! - **Replay outside locks**: a synchronous handler's early events are written by
//!   [`flush_sync`](BufferManager::flush_sync) with no lock held; live adds that race
//!   with it are queued behind the replay instead of blocking the producer.
//! - **Cancellable reads**: `next_event` / `events` suspend until data arrives, the
//!   token is cancelled ([`CollectorError::Cancelled`]) or the cursor is removed
//!   ([`CollectorError::NotAttached`]). A cancelled read consumes nothing.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{lock, read, write, EarlyBuffers, EarlyQueue};
use crate::error::CollectorError;
use crate::handlers::{panic_message, SyncHandler};

/// A synchronous handler attached to one buffer.
struct SyncSlot<E> {
    id: u64,
    handler: Arc<dyn SyncHandler<E>>,
    /// `Some` while the replay is pending: events are held here, in order,
    /// until [`BufferManager::flush_sync`] hands them over.
    backlog: Option<Vec<Arc<E>>>,
}

/// Mutable buffer state, guarded by one mutex per buffer.
struct Inner<E> {
    /// Retained events; `events[0]` has absolute index `head`.
    events: VecDeque<Arc<E>>,
    head: u64,
    /// Handler name → absolute index of its next unread event.
    cursors: HashMap<String, u64>,
    sync: Vec<SyncSlot<E>>,
    next_sync_id: u64,
    closed: bool,
}

impl<E> Inner<E> {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            head: 0,
            cursors: HashMap::new(),
            sync: Vec::new(),
            next_sync_id: 0,
            closed: false,
        }
    }

    #[inline]
    fn tail(&self) -> u64 {
        self.head + self.events.len() as u64
    }

    #[inline]
    fn is_unattached(&self) -> bool {
        self.cursors.is_empty() && self.sync.is_empty()
    }

    fn push(&mut self, event: Arc<E>, limit: Option<usize>, source: &str) {
        if let Some(limit) = limit {
            while self.events.len() >= limit {
                self.events.pop_front();
                self.head += 1;
                let head = self.head;
                for (handler, cursor) in self.cursors.iter_mut() {
                    if *cursor < head {
                        *cursor = head;
                        tracing::warn!(
                            source,
                            handler = %handler,
                            "handler lagged; oldest retained event dropped"
                        );
                    }
                }
            }
        }
        self.events.push_back(event);
    }

    /// Queues `event` for handlers still replaying; returns those written inline.
    fn live_sync(&mut self, event: &Arc<E>) -> Vec<Arc<dyn SyncHandler<E>>> {
        let mut live = Vec::with_capacity(self.sync.len());
        for slot in &mut self.sync {
            match &mut slot.backlog {
                Some(held) => held.push(Arc::clone(event)),
                None => live.push(Arc::clone(&slot.handler)),
            }
        }
        live
    }

    /// Takes up to `max` events for `handler`; `None` if it has no cursor.
    fn take(&mut self, handler: &str, max: usize) -> Option<Vec<Arc<E>>> {
        let head = self.head;
        let cursor = self.cursors.get_mut(handler)?;
        let start = usize::try_from(cursor.saturating_sub(head)).unwrap_or(usize::MAX);
        let batch: Vec<Arc<E>> = self.events.iter().skip(start).take(max).cloned().collect();
        *cursor += batch.len() as u64;
        if !batch.is_empty() {
            self.trim();
        }
        Some(batch)
    }

    /// Drops events that every cursor has already passed.
    fn trim(&mut self) {
        let floor = self.cursors.values().copied().min().unwrap_or_else(|| self.tail());
        while self.head < floor && self.events.pop_front().is_some() {
            self.head += 1;
        }
    }
}

/// Retained event sequence of one source with one cursor per attached handler.
pub struct BufferManager<E> {
    source: String,
    inner: Mutex<Inner<E>>,
    early: Arc<EarlyQueue<E>>,
    notify: Notify,
    /// Held shared while writing to synchronous handlers, exclusively by `quiesce`.
    delivery: RwLock<()>,
    retention: Option<usize>,
}

impl<E: Send + Sync + 'static> BufferManager<E> {
    /// Creates a buffer for `source` with its own pre-subscription queue.
    pub(crate) fn new(
        source: impl Into<String>,
        early_capacity: usize,
        retention: Option<usize>,
        registry: &Arc<EarlyBuffers>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source: source.into(),
            inner: Mutex::new(Inner::new()),
            early: EarlyQueue::new(early_capacity, registry),
            notify: Notify::new(),
            delivery: RwLock::new(()),
            retention,
        })
    }

    /// Name of the source feeding this buffer.
    pub fn source_name(&self) -> &str {
        &self.source
    }

    /// Publishes an event. Never blocks on readers.
    ///
    /// - With no attached handler the event goes to the pre-subscription queue
    ///   (dropped if that is disabled).
    /// - Otherwise it is appended for every cursor, and every synchronous
    ///   handler receives it on the calling thread.
    /// - After the buffer was discarded the event is dropped.
    pub fn add(&self, event: E) {
        let event = Arc::new(event);
        let _delivery = read(&self.delivery);
        let sync = {
            let mut inner = lock(&self.inner);
            if inner.closed {
                tracing::debug!(source = %self.source, "add on a discarded buffer; event dropped");
                return;
            }
            if inner.is_unattached() {
                self.early.offer(event);
                return;
            }
            if !inner.cursors.is_empty() {
                inner.push(Arc::clone(&event), self.retention, &self.source);
                self.notify.notify_waiters();
            }
            inner.live_sync(&event)
        };
        deliver_sync(&self.source, &sync, std::slice::from_ref(&event));
    }

    /// Waits for the next event of `handler` and advances its cursor by one.
    pub async fn next_event(
        &self,
        handler: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<E>, CollectorError> {
        let batch = self.wait_take(handler, 1, cancel).await?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| self.not_attached(handler))
    }

    /// Waits until at least one event is available for `handler`, then returns
    /// at most `max` of them without waiting to fill the batch.
    ///
    /// `max == 0` returns an empty batch at once (or `NotAttached`).
    pub async fn events(
        &self,
        handler: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<E>>, CollectorError> {
        if max == 0 {
            return self.try_events(handler, 0);
        }
        self.wait_take(handler, max, cancel).await
    }

    /// Thread-blocking variant of [`next_event`](Self::next_event).
    ///
    /// Intended for plain OS threads; do not call from inside an async runtime.
    pub fn blocking_next_event(
        &self,
        handler: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<E>, CollectorError> {
        futures::executor::block_on(self.next_event(handler, cancel))
    }

    /// Thread-blocking variant of [`events`](Self::events).
    pub fn blocking_events(
        &self,
        handler: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<E>>, CollectorError> {
        futures::executor::block_on(self.events(handler, max, cancel))
    }

    /// Returns whatever is available right now (possibly nothing), at most `max`.
    pub fn try_events(&self, handler: &str, max: usize) -> Result<Vec<Arc<E>>, CollectorError> {
        lock(&self.inner)
            .take(handler, max)
            .ok_or_else(|| self.not_attached(handler))
    }

    /// Number of unread events for `handler`, or `None` if it has no cursor.
    pub fn pending(&self, handler: &str) -> Option<usize> {
        let inner = lock(&self.inner);
        let cursor = *inner.cursors.get(handler)?;
        usize::try_from(inner.tail().saturating_sub(cursor)).ok()
    }

    /// Number of attached handlers (cursors plus synchronous handlers).
    pub fn handler_count(&self) -> usize {
        let inner = lock(&self.inner);
        inner.cursors.len() + inner.sync.len()
    }

    /// Returns `true` if `handler` has a cursor or is attached synchronously.
    pub fn is_attached(&self, handler: &str) -> bool {
        let inner = lock(&self.inner);
        inner.cursors.contains_key(handler) || inner.sync.iter().any(|s| s.handler.name() == handler)
    }

    /// Number of events currently retained in the main sequence.
    pub fn retained(&self) -> usize {
        lock(&self.inner).events.len()
    }

    /// Number of events waiting in the pre-subscription queue.
    pub fn early_len(&self) -> usize {
        self.early.len()
    }

    /// Returns `true` once the collector discarded this buffer.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    /// Creates a cursor for `handler`; returns `false` if it already had one.
    ///
    /// The first attachment of any kind replays the pre-subscription queue.
    pub(crate) fn attach_cursor(&self, handler: &str) -> bool {
        let mut inner = lock(&self.inner);
        if inner.closed || inner.cursors.contains_key(handler) {
            return false;
        }
        let start = inner.tail();
        if inner.is_unattached() {
            let replay = self.early.drain();
            if !replay.is_empty() {
                tracing::debug!(source = %self.source, handler, replayed = replay.len(), "replaying early events");
            }
            for event in replay {
                inner.push(event, self.retention, &self.source);
            }
        }
        let start = start.max(inner.head);
        inner.cursors.insert(handler.to_string(), start);
        self.notify.notify_waiters();
        true
    }

    /// Removes the cursor of `handler`, waking a reader suspended on it.
    pub(crate) fn detach_cursor(&self, handler: &str) -> bool {
        let mut inner = lock(&self.inner);
        let removed = inner.cursors.remove(handler).is_some();
        if removed {
            inner.trim();
            self.notify.notify_waiters();
        }
        removed
    }

    /// Attaches a synchronous handler in replay mode and returns its slot id,
    /// or `None` if it is already attached.
    ///
    /// On first attachment the early events become its backlog. Nothing is
    /// written here: the caller must run [`flush_sync`](Self::flush_sync) once no
    /// collector lock is held.
    pub(crate) fn attach_sync(&self, handler: Arc<dyn SyncHandler<E>>) -> Option<u64> {
        let mut inner = lock(&self.inner);
        if inner.closed || inner.sync.iter().any(|s| s.handler.name() == handler.name()) {
            return None;
        }
        let replay = if inner.is_unattached() {
            self.early.drain()
        } else {
            Vec::new()
        };
        if !replay.is_empty() {
            tracing::debug!(source = %self.source, handler = handler.name(), replayed = replay.len(), "replaying early events");
        }
        let id = inner.next_sync_id;
        inner.next_sync_id += 1;
        inner.sync.push(SyncSlot {
            id,
            handler,
            backlog: Some(replay),
        });
        Some(id)
    }

    /// Writes the backlog of slot `id` until it is empty, then switches the
    /// handler to inline delivery. Returns at once if the slot is gone.
    pub(crate) fn flush_sync(&self, id: u64) {
        loop {
            let _delivery = read(&self.delivery);
            let (handler, batch) = {
                let mut inner = lock(&self.inner);
                let Some(slot) = inner.sync.iter_mut().find(|s| s.id == id) else {
                    return;
                };
                let batch = slot.backlog.take().unwrap_or_default();
                if batch.is_empty() {
                    return;
                }
                slot.backlog = Some(Vec::new());
                (Arc::clone(&slot.handler), batch)
            };
            deliver_sync(&self.source, std::slice::from_ref(&handler), &batch);
        }
    }

    /// Detaches a synchronous handler by name.
    ///
    /// A write already in progress may still complete; call
    /// [`quiesce`](Self::quiesce) (without the collector lock) to wait for it.
    pub(crate) fn detach_sync(&self, handler: &str) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.sync.len();
        inner.sync.retain(|s| s.handler.name() != handler);
        inner.sync.len() != before
    }

    /// Waits until no synchronous write on this buffer is in progress.
    pub(crate) fn quiesce(&self) {
        drop(write(&self.delivery));
    }

    /// Discards the buffer: drops all state and wakes every suspended reader.
    pub(crate) fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        inner.cursors.clear();
        inner.sync.clear();
        inner.events.clear();
        drop(inner);
        self.early.drain();
        self.notify.notify_waiters();
    }

    async fn wait_take(
        &self,
        handler: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<E>>, CollectorError> {
        loop {
            if cancel.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }

            // registered before the check so a concurrent add cannot be missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.try_events(handler, max)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    fn not_attached(&self, handler: &str) -> CollectorError {
        CollectorError::NotAttached {
            handler: handler.to_string(),
            source_name: self.source.clone(),
        }
    }
}

impl<E> std::fmt::Debug for BufferManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("BufferManager")
            .field("source", &self.source)
            .field("retained", &inner.events.len())
            .field("cursors", &inner.cursors.len())
            .field("sync", &inner.sync.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Writes each event to each handler; a panicking handler does not stop the others.
fn deliver_sync<E: 'static>(source: &str, handlers: &[Arc<dyn SyncHandler<E>>], events: &[Arc<E>]) {
    for event in events {
        for h in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| h.synchronous_write(event))) {
                tracing::warn!(
                    source,
                    handler = h.name(),
                    info = %panic_message(panic.as_ref()),
                    "synchronous handler panicked"
                );
            }
        }
    }
}
