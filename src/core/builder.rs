use std::marker::PhantomData;
use std::sync::Arc;

use super::{collector::CollectorManager, config::Config};
use crate::buffer::EarlyBuffers;

/// Builder for constructing a [`CollectorManager`].
pub struct CollectorBuilder<E> {
    cfg: Config,
    early: Option<Arc<EarlyBuffers>>,
    _events: PhantomData<fn() -> E>,
}

impl<E: Send + Sync + 'static> CollectorBuilder<E> {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            early: None,
            _events: PhantomData,
        }
    }

    /// Shares a pre-subscription registry with other collectors.
    ///
    /// Without it the collector creates its own. Sharing one registry makes a
    /// single disable (manual or timed) stop early buffering for all of them.
    pub fn with_early_buffers(mut self, early: Arc<EarlyBuffers>) -> Self {
        self.early = Some(early);
        self
    }

    /// Builds the collector.
    ///
    /// The expiry timer is not started here; call
    /// [`CollectorManager::spawn_early_expiry`] from within a runtime.
    pub fn build(self) -> Arc<CollectorManager<E>> {
        let early = self.early.unwrap_or_else(EarlyBuffers::new);
        Arc::new(CollectorManager::new_internal(self.cfg, early))
    }
}
