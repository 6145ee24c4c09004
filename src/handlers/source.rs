//! # BufferedSource: ready-made producer.
//!
//! Holds the buffer the collector assigned (if any) and publishes into it.
//! Useful for producers that only need "emit this event" without managing the
//! buffer slot themselves.
//!
//! ```text
//! publish(e) ──► slot: Some(buffer) ──► buffer.add(e)   → true
//!            └─► slot: None          ──► dropped          → false
//! ```

use std::sync::{Arc, RwLock};

use crate::buffer::{read, write, BufferManager};
use crate::handlers::Source;

/// Producer that publishes into whatever buffer the collector assigned.
pub struct BufferedSource<E> {
    name: String,
    location: String,
    slot: RwLock<Option<Arc<BufferManager<E>>>>,
}

impl<E: Send + Sync + 'static> BufferedSource<E> {
    /// Creates a source with the given identity and no buffer yet.
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            slot: RwLock::new(None),
        }
    }

    /// Creates an `Arc`'d source, ready for [`CollectorManager::register_source`](crate::CollectorManager::register_source).
    pub fn arc(name: impl Into<String>, location: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name, location))
    }

    /// Publishes an event; returns `false` if no buffer is assigned.
    pub fn publish(&self, event: E) -> bool {
        let guard = read(&self.slot);
        match guard.as_ref() {
            Some(buffer) => {
                buffer.add(event);
                true
            }
            None => false,
        }
    }

    /// Returns `true` while a buffer is assigned.
    pub fn is_publishing(&self) -> bool {
        read(&self.slot).is_some()
    }

    fn replace(&self, next: Option<Arc<BufferManager<E>>>) {
        *write(&self.slot) = next;
    }
}

impl<E: Send + Sync + 'static> Source<E> for BufferedSource<E> {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn set_buffer(&self, buffer: Arc<BufferManager<E>>) {
        self.replace(Some(buffer));
    }

    fn unset_buffer(&self, buffer: &Arc<BufferManager<E>>) {
        let mut slot = write(&self.slot);
        if slot.as_ref().is_some_and(|b| Arc::ptr_eq(b, buffer)) {
            *slot = None;
        }
    }
}
