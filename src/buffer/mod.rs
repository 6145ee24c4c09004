//! Per-source event buffers and the pre-subscription machinery.
//!
//! ## Contents
//! - [`BufferManager`] retained events of one source plus one read cursor per handler
//! - [`EarlyQueue`] bounded ring used while a buffer has no attached handler
//! - [`EarlyBuffers`] process-wide registry owning the one-way disable switch
//!
//! ## Lock order
//! ```text
//! BufferManager.delivery ──► BufferManager.inner ──► EarlyQueue.ring
//! EarlyBuffers.queues ──► EarlyQueue.ring
//! ```
//! No path acquires a buffer lock while holding the registry list lock.

mod early;
mod early_buffers;
mod manager;

pub use early::EarlyQueue;
pub use early_buffers::EarlyBuffers;
pub use manager::BufferManager;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks a std mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before any
/// call that could unwind, so the inner value is always safe to reuse.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-locks a std rwlock, recovering from poisoning like [`lock`].
pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-locks a std rwlock, recovering from poisoning like [`lock`].
pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
