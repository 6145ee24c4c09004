//! # EarlyBuffers: process-wide registry of pre-subscription queues.
//!
//! An explicit registry object (created at startup, shared through `Arc`) that owns the
//! one-way "stop early buffering" switch for every [`EarlyQueue`](crate::EarlyQueue)
//! created against it.
//!
//! ## Architecture
//! ```text
//! CollectorManager<A> ──┐                       ┌──► EarlyQueue (source "trace")
//! CollectorManager<B> ──┼──► EarlyBuffers ──────┼──► EarlyQueue (source "log")
//!                       │   (disabled flag +    └──► EarlyQueue (source "audit")
//!   expiry timer ───────┘    weak queue list)
//!
//! disable():
//!   ├─► disabled = true           (one-way, idempotent)
//!   └─► for each live queue: discard contents, refuse new entries
//! ```
//!
//! ## Rules
//! - The queue list is guarded by its own mutex, separate from every buffer lock.
//! - Queues are tracked weakly; a dropped buffer never keeps its queue alive.
//! - The transition never reverts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lock;

/// A queue whose contents can be dropped by the registry.
pub(crate) trait Discard: Send + Sync {
    /// Empties and retires the queue; returns the number of entries dropped.
    fn discard(&self) -> usize;
}

/// Process-wide switch and queue list for pre-subscription buffering.
pub struct EarlyBuffers {
    disabled: AtomicBool,
    queues: Mutex<Vec<Weak<dyn Discard>>>,
}

impl EarlyBuffers {
    /// Creates an enabled registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            disabled: AtomicBool::new(false),
            queues: Mutex::new(Vec::new()),
        })
    }

    /// Returns `true` once pre-subscription buffering has been disabled.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Disables pre-subscription buffering for every tracked queue.
    ///
    /// Returns `true` if this call performed the transition, `false` if it had
    /// already happened.
    pub fn disable(&self) -> bool {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let queues = std::mem::take(&mut *lock(&self.queues));
        let mut dropped = 0usize;
        for queue in queues.iter().filter_map(Weak::upgrade) {
            dropped += queue.discard();
        }
        tracing::info!(
            queues = queues.len(),
            dropped,
            "pre-subscription buffering disabled"
        );
        true
    }

    /// Number of queues still alive and tracked.
    pub fn tracked(&self) -> usize {
        lock(&self.queues)
            .iter()
            .filter(|q| q.strong_count() > 0)
            .count()
    }

    /// Spawns a task that calls [`disable`](Self::disable) once after `delay`.
    ///
    /// The timer is abandoned if `token` is cancelled first. Must be called
    /// from within a Tokio runtime.
    pub fn spawn_expiry(self: &Arc<Self>, delay: Duration, token: CancellationToken) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    me.disable();
                }
            }
        })
    }

    /// Adds a queue to the list, pruning entries whose queue was dropped.
    pub(crate) fn track(&self, queue: Weak<dyn Discard>) {
        let mut queues = lock(&self.queues);
        if self.is_disabled() {
            return;
        }
        queues.retain(|q| q.strong_count() > 0);
        queues.push(queue);
    }
}

impl std::fmt::Debug for EarlyBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EarlyBuffers")
            .field("disabled", &self.is_disabled())
            .field("tracked", &self.tracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EarlyQueue;

    #[test]
    fn test_disable_is_one_way_and_idempotent() {
        let reg = EarlyBuffers::new();
        assert!(!reg.is_disabled());
        assert!(reg.disable());
        assert!(reg.is_disabled());
        assert!(!reg.disable());
        assert!(reg.is_disabled());
    }

    #[test]
    fn test_tracks_only_live_queues() {
        let reg = EarlyBuffers::new();
        let a = EarlyQueue::<u8>::new(4, &reg);
        let b = EarlyQueue::<u8>::new(4, &reg);
        assert_eq!(reg.tracked(), 2);

        drop(b);
        assert_eq!(reg.tracked(), 1);
        drop(a);
        assert_eq!(reg.tracked(), 0);
    }

    #[test]
    fn test_disable_clears_every_queue() {
        let reg = EarlyBuffers::new();
        let a = EarlyQueue::new(4, &reg);
        let b = EarlyQueue::new(4, &reg);
        a.offer(Arc::new(1u8));
        b.offer(Arc::new(2u8));

        reg.disable();
        assert!(a.is_empty() && b.is_empty());
        assert_eq!(reg.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fires_after_delay() {
        let reg = EarlyBuffers::new();
        let q = EarlyQueue::new(4, &reg);
        q.offer(Arc::new(7u8));

        let handle = reg.spawn_expiry(Duration::from_secs(300), CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(!reg.is_disabled());
        assert_eq!(q.len(), 1);

        handle.await.unwrap();
        assert!(reg.is_disabled());
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_abandoned_on_cancel() {
        let reg = EarlyBuffers::new();
        let token = CancellationToken::new();
        let handle = reg.spawn_expiry(Duration::from_secs(1), token.clone());

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!reg.is_disabled());
    }
}
