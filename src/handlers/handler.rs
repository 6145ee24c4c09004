//! # Producer and consumer contracts
//!
//! Three capabilities, each implemented by distinct types:
//! - [`Source`] produces events into a [`BufferManager`] handed to it by the collector;
//! - [`Handler`] consumes asynchronously, pulling from per-source buffers at its own pace;
//! - [`SyncHandler`] consumes synchronously, called inline on the producer's thread.
//!
//! The collector binds consumers as a [`HandlerRef`], a closed enum over the two
//! consumer kinds.
//!
//! ## Per (handler, source) pair
//! ```text
//! Unattached ──set_buffer──► Attached ──unset_buffer──► Detached (terminal)
//!                         (cursor created)          (cursor discarded)
//! ```
//! Re-subscribing creates a fresh pair with a fresh cursor.
//!
//! ## Rules
//! - `set_buffer` / `unset_buffer` are called while the collector lock is held:
//!   implementations must return quickly and must not call back into the collector.
//! - `init` runs outside the lock and is the place to call
//!   [`CollectorManager::subscribe`].
//! - `synchronous_write` never runs under the collector lock, replay included.

use std::sync::Arc;

use crate::buffer::BufferManager;
use crate::core::CollectorManager;
use crate::error::CollectorError;

/// A producer of events, identified by name and location.
///
/// # Example
/// ```
/// use std::sync::{Arc, Mutex};
/// use eventmux::{BufferManager, Source};
///
/// struct Trace {
///     slot: Mutex<Option<Arc<BufferManager<String>>>>,
/// }
///
/// impl Source<String> for Trace {
///     fn source_name(&self) -> &str { "trace" }
///     fn location(&self) -> &str { "memory" }
///     fn set_buffer(&self, buffer: Arc<BufferManager<String>>) {
///         *self.slot.lock().unwrap() = Some(buffer);
///     }
///     fn unset_buffer(&self, _buffer: &Arc<BufferManager<String>>) {
///         *self.slot.lock().unwrap() = None;
///     }
/// }
/// ```
pub trait Source<E>: Send + Sync + 'static {
    /// Stable name; the subscription key handlers refer to.
    fn source_name(&self) -> &str;

    /// Informational location ("memory", a file path, ...). Not used for addressing.
    fn location(&self) -> &str;

    /// Start publishing into `buffer`.
    fn set_buffer(&self, buffer: Arc<BufferManager<E>>);

    /// Stop publishing and release every reference to `buffer`.
    fn unset_buffer(&self, buffer: &Arc<BufferManager<E>>);
}

/// An asynchronous consumer reading per-source buffers from its own tasks/threads.
pub trait Handler<E>: Send + Sync + 'static {
    /// Unique name; also the cursor key inside every buffer.
    fn name(&self) -> &str;

    /// Called once after binding. Perform subscriptions here.
    fn init(&self, _collector: &CollectorManager<E>) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Start reading `buffer` for `source` (a cursor already exists).
    fn set_buffer(&self, source: &str, buffer: Arc<BufferManager<E>>);

    /// Stop reading `buffer` for `source`; the cursor is already gone.
    fn unset_buffer(&self, source: &str, buffer: &Arc<BufferManager<E>>);
}

/// A synchronous consumer invoked on the producer's thread, bypassing buffering.
///
/// `synchronous_write` stalls the producer while it runs; keep it short.
/// A panic is caught and logged; delivery to other handlers continues.
///
/// Early events are replayed after the subscribing call has released the
/// collector lock, so a write may inspect the collector or its buffers
/// (`buffer`, `handler_count`, ...). It must not unsubscribe a synchronous
/// handler from the source it is being called for, nor publish into that
/// source: both wait for the write in progress to finish.
pub trait SyncHandler<E>: Send + Sync + 'static {
    /// Unique name.
    fn name(&self) -> &str;

    /// Called once after binding. Perform subscriptions here.
    fn init(&self, _collector: &CollectorManager<E>) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Receives one event inline.
    fn synchronous_write(&self, event: &E);
}

/// A consumer bound to the collector.
pub enum HandlerRef<E> {
    /// Pulls from buffers.
    Buffered(Arc<dyn Handler<E>>),
    /// Receives events inline on the producer's thread.
    Synchronous(Arc<dyn SyncHandler<E>>),
}

impl<E: 'static> HandlerRef<E> {
    /// Wraps an asynchronous handler.
    pub fn buffered(handler: Arc<dyn Handler<E>>) -> Self {
        HandlerRef::Buffered(handler)
    }

    /// Wraps a synchronous handler.
    pub fn synchronous(handler: Arc<dyn SyncHandler<E>>) -> Self {
        HandlerRef::Synchronous(handler)
    }

    /// Name of the wrapped handler.
    pub fn name(&self) -> &str {
        match self {
            HandlerRef::Buffered(h) => h.name(),
            HandlerRef::Synchronous(h) => h.name(),
        }
    }

    /// Returns `true` for synchronous handlers.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, HandlerRef::Synchronous(_))
    }

    pub(crate) fn init(&self, collector: &CollectorManager<E>) -> Result<(), CollectorError> {
        match self {
            HandlerRef::Buffered(h) => h.init(collector),
            HandlerRef::Synchronous(h) => h.init(collector),
        }
    }
}

impl<E> Clone for HandlerRef<E> {
    fn clone(&self) -> Self {
        match self {
            HandlerRef::Buffered(h) => HandlerRef::Buffered(Arc::clone(h)),
            HandlerRef::Synchronous(h) => HandlerRef::Synchronous(Arc::clone(h)),
        }
    }
}

impl<E: 'static> std::fmt::Debug for HandlerRef<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_synchronous() { "Synchronous" } else { "Buffered" };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}
