//! # Poller: ready-made asynchronous handler.
//!
//! Turns a [`Process`] implementation into a [`Handler`] that pulls batches from every
//! buffer it is given, one Tokio worker per source.
//!
//! ## Architecture
//! ```text
//! set_buffer("trace", buf) ──► spawn worker ──┐
//! set_buffer("log", buf)   ──► spawn worker ──┤   loop {
//!                                             │     batch = buf.events(name, max).await
//!                                             │     processor.process(source, batch).await
//!                                             │   }
//! unset_buffer("trace", _) ──► cancel worker ─┘
//! ```
//!
//! ## Rules
//! - **Isolation**: a slow source never delays another source's worker.
//! - **Panic safety**: a panic in `process` is caught and logged; the worker keeps going.
//! - **Exit**: a worker stops when its token is cancelled or its cursor is gone.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use eventmux::{CollectorManager, Config, HandlerRef, Poller, Process};
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl Process<String> for Stdout {
//!     async fn process(&self, source: &str, events: Vec<Arc<String>>) {
//!         for ev in events {
//!             println!("[{source}] {ev}");
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), eventmux::CollectorError> {
//!     let collector = CollectorManager::<String>::builder(Config::default()).build();
//!     let poller = Arc::new(Poller::<String, _>::new(
//!         "stdout",
//!         ["trace", "log"],
//!         Arc::new(Stdout),
//!         tokio::runtime::Handle::current(),
//!     ));
//!     collector.bind_handler(HandlerRef::buffered(poller))?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{lock, BufferManager};
use crate::core::CollectorManager;
use crate::error::CollectorError;
use crate::handlers::{panic_message, Handler};

/// Batch processing logic driven by a [`Poller`].
#[async_trait]
pub trait Process<E>: Send + Sync + 'static {
    /// Handles one batch (at least one event) read from `source`, in order.
    async fn process(&self, source: &str, events: Vec<Arc<E>>);
}

/// Running worker for one source.
struct Worker {
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// Asynchronous handler spawning one polling worker per attached source.
pub struct Poller<E, P> {
    name: String,
    sources: Vec<String>,
    processor: Arc<P>,
    /// 0 until set by `with_batch` or taken from the collector config on init.
    batch: AtomicUsize,
    runtime: Handle,
    workers: Mutex<HashMap<String, Worker>>,
    _events: PhantomData<fn() -> E>,
}

impl<E, P> Poller<E, P>
where
    E: Send + Sync + 'static,
    P: Process<E>,
{
    /// Creates a poller that subscribes to `sources` on init.
    ///
    /// Workers are spawned on `runtime`, so buffers may be assigned from any thread.
    pub fn new<I, S>(name: impl Into<String>, sources: I, processor: Arc<P>, runtime: Handle) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            processor,
            batch: AtomicUsize::new(0),
            runtime,
            workers: Mutex::new(HashMap::new()),
            _events: PhantomData,
        }
    }

    /// Sets the maximum batch size per read (min 1), overriding
    /// [`Config::poll_batch`](crate::Config::poll_batch).
    #[must_use]
    pub fn with_batch(self, batch: usize) -> Self {
        self.batch.store(batch.max(1), Ordering::Relaxed);
        self
    }

    /// Maximum batch size per read; 100 before init when not set explicitly.
    pub fn batch(&self) -> usize {
        match self.batch.load(Ordering::Relaxed) {
            0 => 100,
            n => n,
        }
    }

    /// Sources with a running worker, sorted.
    pub fn active_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.workers).keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Cancels every worker and waits for them to exit.
    ///
    /// Returns the number of workers that did not exit cleanly (aborted, or lost
    /// with their runtime); each one is logged at `warn`.
    pub async fn shutdown(&self) -> usize {
        let workers: Vec<(String, Worker)> = lock(&self.workers).drain().collect();
        for (_, w) in &workers {
            w.token.cancel();
        }
        let mut failed = 0;
        for (source, w) in workers {
            if let Err(e) = w.join.await {
                failed += 1;
                tracing::warn!(
                    handler = %self.name,
                    source = %source,
                    error = %e,
                    "poller worker did not exit cleanly"
                );
            }
        }
        failed
    }

    fn spawn_worker(&self, source: &str, buffer: Arc<BufferManager<E>>) -> Worker {
        let token = CancellationToken::new();
        let join = self.runtime.spawn(run_worker(
            self.name.clone(),
            source.to_string(),
            buffer,
            Arc::clone(&self.processor),
            self.batch(),
            token.clone(),
        ));
        Worker { token, join }
    }
}

impl<E, P> Handler<E> for Poller<E, P>
where
    E: Send + Sync + 'static,
    P: Process<E>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, collector: &CollectorManager<E>) -> Result<(), CollectorError> {
        let _ = self.batch.compare_exchange(
            0,
            collector.config().poll_batch_clamped(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        collector.subscribe(&self.name, self.sources.as_slice())
    }

    fn set_buffer(&self, source: &str, buffer: Arc<BufferManager<E>>) {
        let worker = self.spawn_worker(source, buffer);
        if let Some(old) = lock(&self.workers).insert(source.to_string(), worker) {
            old.token.cancel();
        }
    }

    fn unset_buffer(&self, source: &str, _buffer: &Arc<BufferManager<E>>) {
        if let Some(worker) = lock(&self.workers).remove(source) {
            worker.token.cancel();
        }
    }
}

async fn run_worker<E, P>(
    name: String,
    source: String,
    buffer: Arc<BufferManager<E>>,
    processor: Arc<P>,
    batch: usize,
    token: CancellationToken,
) where
    E: Send + Sync + 'static,
    P: Process<E>,
{
    loop {
        match buffer.events(&name, batch, &token).await {
            Ok(events) => {
                let fut = processor.process(&source, events);
                if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    tracing::warn!(
                        handler = %name,
                        source = %source,
                        info = %panic_message(panic.as_ref()),
                        "handler panicked while processing a batch"
                    );
                }
            }
            Err(CollectorError::Cancelled) => break,
            Err(e) => {
                tracing::debug!(handler = %name, source = %source, reason = e.as_label(), "poller worker exiting");
                break;
            }
        }
    }
}
