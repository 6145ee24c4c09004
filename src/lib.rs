//! # eventmux
//!
//! **eventmux** is an in-process event collection and distribution core.
//!
//! Sources publish events into per-source buffers; any number of handlers
//! consume each buffer independently through their own cursor. Handlers
//! subscribe by source name and may do so before the source exists. Events
//! published before anyone subscribed are kept in a small ring and replayed
//! to the first subscriber.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐  ┌──────────────┐             ┌───────────────┐  ┌───────────────┐
//!   │ Source "log" │  │Source "trace"│             │Handler (async)│  │ SyncHandler   │
//!   └──────┬───────┘  └──────┬───────┘             └───────┬───────┘  └───────┬───────┘
//!          │ register_source │                      bind_handler + subscribe  │
//!          ▼                 ▼                             ▼                  ▼
//! ┌──────────────────────────────────────────────────────────────────────────────────┐
//! │ CollectorManager (subscription authority, deferred binding)                      │
//! │  - creates one BufferManager per source on first interest                        │
//! │  - source.set_buffer / handler.set_buffer on attach                              │
//! │  - source.unset_buffer when the last handler leaves                              │
//! └──────────────┬───────────────────────────────────────────────────────────────────┘
//!                ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ BufferManager (one per source)               │
//!   │  events: [e0 e1 e2 e3 ...]                   │◄── add(ev) from any thread
//!   │  cursors: {"metrics": 2, "audit": 4}         │
//!   │  early:   EarlyQueue (ring, 400 by default)  │──► replayed to the first handler
//!   └───────┬────────────────────────┬─────────────┘
//!           ▼                        ▼
//!   events("metrics", 100).await   synchronous_write(&ev) inline
//! ```
//!
//! ### Pre-subscription lifecycle
//! ```text
//! source registers, no subscriber ──► adds go to EarlyQueue (oldest dropped when full)
//!   ├─ first handler attaches    ──► queue replayed, then live events
//!   └─ EarlyBuffers::disable()   ──► all queues discarded, never buffered again
//!         (manual, or timer after Config::early_expiry)
//! ```
//!
//! ## Features
//! | Area            | Description                                                   | Key types / traits                               |
//! |-----------------|---------------------------------------------------------------|--------------------------------------------------|
//! | **Collector**   | Bind handlers to sources by name, in any start order.         | [`CollectorManager`], [`CollectorBuilder`]       |
//! | **Buffers**     | Ordered multicast with independent cursors and blocking reads.| [`BufferManager`]                                |
//! | **Early events**| Bounded replay of events published before any subscription.   | [`EarlyQueue`], [`EarlyBuffers`]                 |
//! | **Contracts**   | Producer and consumer traits.                                 | [`Source`], [`Handler`], [`SyncHandler`]         |
//! | **Helpers**     | Ready-made source and batch-polling handler.                  | [`BufferedSource`], [`Poller`], [`Process`]      |
//! | **Errors**      | Typed errors for subscription and read failures.              | [`CollectorError`]                               |
//! | **Configuration** | Capacity, expiry and retention knobs.                       | [`Config`]                                       |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use eventmux::{BufferedSource, CollectorManager, Config, Handler, HandlerRef, BufferManager};
//! use std::sync::Mutex;
//!
//! struct Keep(Mutex<Option<Arc<BufferManager<String>>>>);
//!
//! impl Handler<String> for Keep {
//!     fn name(&self) -> &str { "keep" }
//!     fn set_buffer(&self, _source: &str, buffer: Arc<BufferManager<String>>) {
//!         *self.0.lock().unwrap() = Some(buffer);
//!     }
//!     fn unset_buffer(&self, _source: &str, _buffer: &Arc<BufferManager<String>>) {
//!         *self.0.lock().unwrap() = None;
//!     }
//! }
//!
//! fn main() -> Result<(), eventmux::CollectorError> {
//!     let collector = CollectorManager::<String>::builder(Config::default()).build();
//!
//!     // Subscribe first; the source does not exist yet.
//!     let keep = Arc::new(Keep(Mutex::new(None)));
//!     collector.bind_handler(HandlerRef::buffered(keep.clone()))?;
//!     collector.subscribe("keep", &["trace"])?;
//!
//!     let trace = BufferedSource::<String>::arc("trace", "memory");
//!     collector.register_source(trace.clone())?;
//!     trace.publish("hello".to_string());
//!
//!     let buffer = keep.0.lock().unwrap().clone().expect("attached");
//!     let events = buffer.try_events("keep", 10)?;
//!     assert_eq!(events.len(), 1);
//!     assert_eq!(*events[0], "hello");
//!     Ok(())
//! }
//! ```
mod buffer;
mod core;
mod error;
mod handlers;

// ---- Public re-exports ----

pub use buffer::{BufferManager, EarlyBuffers, EarlyQueue};
pub use core::{CollectorBuilder, CollectorManager, Config};
pub use error::CollectorError;
pub use handlers::{BufferedSource, Handler, HandlerRef, Poller, Process, Source, SyncHandler};

// Optional: expose a simple built-in logging handler (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use handlers::LogWriter;
