//! # Collector configuration.
//!
//! Provides [`Config`], the centralized sizing and timing knobs of the collector core.
//! Values come from the embedding system as plain values; the crate does not load files.
//!
//! ## Sentinel values
//! - `early_capacity = 0` → no pre-subscription buffering at all
//! - `early_expiry = 0s` → the one-way disable never fires automatically
//! - `max_retained = 0` → unbounded retention, trimmed as cursors advance

use std::time::Duration;

/// Sizing and timing configuration for [`CollectorManager`](crate::CollectorManager).
///
/// ## Field semantics
/// - `early_capacity`: ring size of each pre-subscription queue
/// - `early_expiry`: delay before pre-subscription buffering is disabled process-wide
/// - `max_retained`: cap on events retained per buffer for lagging cursors
/// - `poll_batch`: default batch size used by [`Poller`](crate::Poller)
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of each pre-subscription queue.
    ///
    /// When full, the oldest queued event is overwritten.
    pub early_capacity: usize,

    /// Delay after which [`EarlyBuffers::disable`](crate::EarlyBuffers::disable)
    /// fires once the expiry timer is spawned.
    pub early_expiry: Duration,

    /// Maximum number of retained events per buffer.
    ///
    /// - `0` = unbounded; events are dropped once every cursor passed them
    /// - `n > 0` = the oldest event is dropped when `n` is reached, and cursors
    ///   still pointing at it skip forward
    pub max_retained: usize,

    /// Maximum batch size requested by each poller worker.
    pub poll_batch: usize,
}

impl Config {
    /// Returns the automatic disable delay as an `Option`.
    #[inline]
    pub fn early_expiry_delay(&self) -> Option<Duration> {
        if self.early_expiry == Duration::ZERO {
            None
        } else {
            Some(self.early_expiry)
        }
    }

    /// Returns the retention cap as an `Option` (`None` = unbounded).
    #[inline]
    pub fn retention_limit(&self) -> Option<usize> {
        if self.max_retained == 0 {
            None
        } else {
            Some(self.max_retained)
        }
    }

    /// Returns the poll batch size clamped to a minimum of 1.
    #[inline]
    pub fn poll_batch_clamped(&self) -> usize {
        self.poll_batch.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `early_capacity = 400`
    /// - `early_expiry = 5min`
    /// - `max_retained = 0` (unbounded)
    /// - `poll_batch = 100`
    fn default() -> Self {
        Self {
            early_capacity: 400,
            early_expiry: Duration::from_secs(5 * 60),
            max_retained: 0,
            poll_batch: 100,
        }
    }
}
