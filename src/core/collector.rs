//! # CollectorManager: the subscription authority.
//!
//! Binds handlers to sources by name, creates and discards [`BufferManager`]s as
//! producers and consumers come and go, and tells a source to stop publishing when its
//! last handler leaves.
//!
//! ## Architecture
//! ```text
//! register_source(src) ──┐                 ┌── bind_handler(h) ──► h.init(collector)
//!                        ▼                 ▼                           │
//!                 ┌──────────────────────────────┐                     │
//!                 │ State (one mutex)            │◄── subscribe(h, [names]) ─┘
//!                 │  sources:  name → (src, buf) │
//!                 │  handlers: name → HandlerRef │
//!                 │  interest: handler → {names} │
//!                 └──────────────────────────────┘
//!                        │ first attach               │ last detach
//!                        ▼                            ▼
//!               src.set_buffer(buf)           src.unset_buffer(buf), buf discarded
//!               h.set_buffer(name, buf)
//! ```
//!
//! ## Rules
//! - **Deferred binding**: subscribing to a source that is not live records the interest;
//!   registration of the source completes the attachment. Start order does not matter.
//! - **Early buffer**: a source registered with nobody waiting gets a buffer immediately
//!   (while pre-subscription buffering is enabled) so early events are kept.
//! - **Idempotent**: subscribing twice to the same pair creates one cursor.
//! - **Unbound rejection**: subscribe/unsubscribe from an unknown handler fails with
//!   [`CollectorError::UnboundHandler`] and changes nothing.
//! - **Serialized**: every mutation (and every `set_buffer`/`unset_buffer` callback it
//!   triggers) runs under the state mutex, which is separate from every buffer lock.
//! - **Outside the lock**: `init`, the early-event replay to a synchronous handler, and the
//!   wait for a detached synchronous handler's write in progress all run after the state
//!   mutex is released.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::builder::CollectorBuilder;
use super::config::Config;
use crate::buffer::{lock, BufferManager, EarlyBuffers};
use crate::error::CollectorError;
use crate::handlers::{HandlerRef, Source};

/// A live source and the buffer currently assigned to it.
struct SourceEntry<E> {
    source: Arc<dyn Source<E>>,
    buffer: Option<Arc<BufferManager<E>>>,
}

/// Subscription state guarded by the collector mutex.
struct State<E> {
    sources: HashMap<String, SourceEntry<E>>,
    handlers: HashMap<String, HandlerRef<E>>,
    /// Handler name → source names it asked for (live or not).
    interest: HashMap<String, BTreeSet<String>>,
}

/// Subscription authority binding handlers to sources.
pub struct CollectorManager<E> {
    cfg: Config,
    state: Mutex<State<E>>,
    early: Arc<EarlyBuffers>,
    runtime_token: CancellationToken,
}

/// Work on synchronous handlers that must run after the state lock is released.
struct Deferred<E> {
    /// Freshly attached synchronous handlers whose backlog must be written.
    replays: Vec<(Arc<BufferManager<E>>, u64)>,
    /// Buffers that lost a synchronous handler; wait out writes in progress.
    drains: Vec<Arc<BufferManager<E>>>,
}

impl<E: Send + Sync + 'static> Deferred<E> {
    fn new() -> Self {
        Self {
            replays: Vec::new(),
            drains: Vec::new(),
        }
    }

    fn run(self) {
        for (buffer, id) in self.replays {
            buffer.flush_sync(id);
        }
        for buffer in self.drains {
            buffer.quiesce();
        }
    }
}

impl<E: Send + Sync + 'static> CollectorManager<E> {
    /// Returns a builder for a collector with the given configuration.
    pub fn builder(cfg: Config) -> CollectorBuilder<E> {
        CollectorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(cfg: Config, early: Arc<EarlyBuffers>) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                sources: HashMap::new(),
                handlers: HashMap::new(),
                interest: HashMap::new(),
            }),
            early,
            runtime_token: CancellationToken::new(),
        }
    }

    /// Makes a source live and completes any deferred subscriptions to it.
    pub fn register_source(&self, source: Arc<dyn Source<E>>) -> Result<(), CollectorError> {
        let name = source.source_name().to_string();
        let mut deferred = Deferred::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            if state.sources.contains_key(&name) {
                return Err(CollectorError::DuplicateSource { source_name: name });
            }

            let mut entry = SourceEntry {
                source,
                buffer: None,
            };

            let mut waiting: Vec<HandlerRef<E>> = state
                .interest
                .iter()
                .filter(|(_, wanted)| wanted.contains(&name))
                .filter_map(|(handler, _)| state.handlers.get(handler).cloned())
                .collect();
            waiting.sort_by(|a, b| a.name().cmp(b.name()));

            if waiting.is_empty() {
                if !self.early.is_disabled() && self.cfg.early_capacity > 0 {
                    self.assign_buffer(&mut entry, &name);
                    tracing::debug!(source = %name, "early buffer assigned");
                }
            } else {
                for handler in &waiting {
                    self.attach(&mut entry, &name, handler, &mut deferred);
                }
            }

            tracing::info!(
                source = %name,
                location = entry.source.location(),
                waiting = waiting.len(),
                "source registered"
            );
            state.sources.insert(name, entry);
        }
        deferred.run();
        Ok(())
    }

    /// Removes a live source, revoking its buffer from every attached handler.
    ///
    /// Handlers keep their interest: if a source with the same name registers
    /// again they are reattached with fresh cursors. Returns `false` if the
    /// source was not registered.
    pub fn unregister_source(&self, name: &str) -> bool {
        let mut deferred = Deferred::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            let Some(mut entry) = state.sources.remove(name) else {
                return false;
            };

            if let Some(buffer) = entry.buffer.clone() {
                for handler in state.handlers.values() {
                    if buffer.is_attached(handler.name()) {
                        self.detach_handler(&buffer, name, handler, &mut deferred);
                    }
                }
            }
            self.release(&mut entry, name);
            tracing::info!(source = %name, "source unregistered");
        }
        deferred.run();
        true
    }

    /// Binds a handler, then calls its `init` (outside the collector lock).
    ///
    /// If `init` fails the handler is unbound again, dropping any subscription
    /// it made, and the error is returned.
    pub fn bind_handler(&self, handler: HandlerRef<E>) -> Result<(), CollectorError> {
        {
            let mut state = lock(&self.state);
            let name = handler.name().to_string();
            if state.handlers.contains_key(&name) {
                return Err(CollectorError::DuplicateHandler { handler: name });
            }
            state.handlers.insert(name, handler.clone());
        }
        tracing::info!(
            handler = handler.name(),
            synchronous = handler.is_synchronous(),
            "handler bound"
        );
        if let Err(e) = handler.init(self) {
            tracing::warn!(handler = handler.name(), reason = e.as_label(), "handler init failed; unbinding");
            // only fails if a concurrent caller already unbound it
            let _ = self.unbind_handler(handler.name());
            return Err(e);
        }
        Ok(())
    }

    /// Unsubscribes a handler from everything and forgets it.
    pub fn unbind_handler(&self, name: &str) -> Result<(), CollectorError> {
        let mut deferred = Deferred::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            let Some(handler) = state.handlers.remove(name) else {
                return Err(unbound(name));
            };
            let wanted = state.interest.remove(name).unwrap_or_default();
            for source in &wanted {
                if let Some(entry) = state.sources.get_mut(source) {
                    self.detach(entry, source, &handler, &mut deferred);
                }
            }
            tracing::info!(handler = name, "handler unbound");
        }
        deferred.run();
        Ok(())
    }

    /// Subscribes a bound handler to the named sources.
    ///
    /// Live sources are attached immediately; others are attached when they register.
    /// A synchronous handler receives the source's early events before this returns.
    pub fn subscribe<S: AsRef<str>>(&self, handler: &str, sources: &[S]) -> Result<(), CollectorError> {
        let mut deferred = Deferred::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            let Some(h) = state.handlers.get(handler).cloned() else {
                return Err(unbound(handler));
            };

            for source in sources {
                let source = source.as_ref();
                state
                    .interest
                    .entry(handler.to_string())
                    .or_default()
                    .insert(source.to_string());

                match state.sources.get_mut(source) {
                    Some(entry) => self.attach(entry, source, &h, &mut deferred),
                    None => tracing::debug!(handler, source, "source not live; subscription deferred"),
                }
            }
        }
        deferred.run();
        Ok(())
    }

    /// Detaches a bound handler from the named sources.
    ///
    /// When a buffer loses its last handler the source is told to stop publishing
    /// and the buffer is discarded. Once this returns, a synchronous handler gets
    /// no further write from these sources.
    pub fn unsubscribe<S: AsRef<str>>(&self, handler: &str, sources: &[S]) -> Result<(), CollectorError> {
        let mut deferred = Deferred::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            let Some(h) = state.handlers.get(handler).cloned() else {
                return Err(unbound(handler));
            };

            for source in sources {
                let source = source.as_ref();
                if let Some(wanted) = state.interest.get_mut(handler) {
                    wanted.remove(source);
                }
                if let Some(entry) = state.sources.get_mut(source) {
                    self.detach(entry, source, &h, &mut deferred);
                }
            }
        }
        deferred.run();
        Ok(())
    }

    /// Disables pre-subscription buffering process-wide (one-way, idempotent).
    pub fn disable_early_buffering(&self) -> bool {
        self.early.disable()
    }

    /// Spawns the timer that disables pre-subscription buffering after
    /// [`Config::early_expiry`]. Returns `None` when the delay is zero.
    ///
    /// Must be called from within a Tokio runtime. The timer is abandoned on
    /// [`shutdown`](Self::shutdown).
    pub fn spawn_early_expiry(&self) -> Option<JoinHandle<()>> {
        self.cfg
            .early_expiry_delay()
            .map(|delay| self.early.spawn_expiry(delay, self.runtime_token.child_token()))
    }

    /// Cancels background work started by this collector.
    pub fn shutdown(&self) {
        self.runtime_token.cancel();
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The pre-subscription registry this collector reports to.
    pub fn early_buffers(&self) -> &Arc<EarlyBuffers> {
        &self.early
    }

    /// Sorted names of live sources.
    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).sources.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Sorted names of bound handlers.
    pub fn handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).handlers.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Sources a handler asked for (live or deferred), or `None` if unbound.
    pub fn subscriptions(&self, handler: &str) -> Option<Vec<String>> {
        let state = lock(&self.state);
        state.handlers.get(handler)?;
        Some(
            state
                .interest
                .get(handler)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Buffer currently assigned to a live source.
    pub fn buffer(&self, source: &str) -> Option<Arc<BufferManager<E>>> {
        lock(&self.state)
            .sources
            .get(source)
            .and_then(|e| e.buffer.clone())
    }

    fn new_buffer(&self, source: &str) -> Arc<BufferManager<E>> {
        BufferManager::new(
            source,
            self.cfg.early_capacity,
            self.cfg.retention_limit(),
            &self.early,
        )
    }

    /// Returns the entry's buffer, creating it and handing it to the source if absent.
    fn assign_buffer(&self, entry: &mut SourceEntry<E>, name: &str) -> Arc<BufferManager<E>> {
        if let Some(buffer) = &entry.buffer {
            return Arc::clone(buffer);
        }
        let buffer = self.new_buffer(name);
        entry.source.set_buffer(Arc::clone(&buffer));
        entry.buffer = Some(Arc::clone(&buffer));
        buffer
    }

    fn attach(&self, entry: &mut SourceEntry<E>, source: &str, handler: &HandlerRef<E>, deferred: &mut Deferred<E>) {
        let buffer = self.assign_buffer(entry, source);
        let attached = match handler {
            HandlerRef::Buffered(h) => {
                let fresh = buffer.attach_cursor(h.name());
                if fresh {
                    h.set_buffer(source, Arc::clone(&buffer));
                }
                fresh
            }
            HandlerRef::Synchronous(h) => match buffer.attach_sync(Arc::clone(h)) {
                Some(id) => {
                    deferred.replays.push((Arc::clone(&buffer), id));
                    true
                }
                None => false,
            },
        };
        if attached {
            tracing::debug!(handler = handler.name(), source, "handler attached");
        }
    }

    fn detach(&self, entry: &mut SourceEntry<E>, source: &str, handler: &HandlerRef<E>, deferred: &mut Deferred<E>) {
        let Some(buffer) = entry.buffer.clone() else {
            return;
        };
        if self.detach_handler(&buffer, source, handler, deferred) && buffer.handler_count() == 0 {
            self.release(entry, source);
        }
    }

    /// Removes one handler from `buffer`; returns `true` if it was attached.
    fn detach_handler(
        &self,
        buffer: &Arc<BufferManager<E>>,
        source: &str,
        handler: &HandlerRef<E>,
        deferred: &mut Deferred<E>,
    ) -> bool {
        let detached = match handler {
            HandlerRef::Buffered(h) => {
                let removed = buffer.detach_cursor(h.name());
                if removed {
                    h.unset_buffer(source, buffer);
                }
                removed
            }
            HandlerRef::Synchronous(h) => {
                let removed = buffer.detach_sync(h.name());
                if removed {
                    deferred.drains.push(Arc::clone(buffer));
                }
                removed
            }
        };
        if detached {
            tracing::debug!(handler = handler.name(), source, "handler detached");
        }
        detached
    }

    /// Stops the source from publishing and discards its buffer.
    fn release(&self, entry: &mut SourceEntry<E>, source: &str) {
        if let Some(buffer) = entry.buffer.take() {
            entry.source.unset_buffer(&buffer);
            buffer.close();
            tracing::info!(source, "buffer released; source stops publishing");
        }
    }
}

impl<E> std::fmt::Debug for CollectorManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("CollectorManager")
            .field("sources", &state.sources.len())
            .field("handlers", &state.handlers.len())
            .field("early", &self.early)
            .finish()
    }
}

fn unbound(handler: &str) -> CollectorError {
    CollectorError::UnboundHandler {
        handler: handler.to_string(),
    }
}
