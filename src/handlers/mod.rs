//! # Producer and consumer contracts.
//!
//! This module provides the capability traits external collaborators implement,
//! plus ready-made implementations.
//!
//! ## Architecture
//! ```text
//!   Source ──set_buffer──► BufferManager ◄──set_buffer── Handler (pulls)
//!     │                        │
//!     └── add(e) ──────────────┴──► SyncHandler::synchronous_write(&e) (inline)
//! ```
//!
//! ## Contents
//! - [`Source`], [`Handler`], [`SyncHandler`], [`HandlerRef`] contracts
//! - [`BufferedSource`] producer holding its assigned buffer
//! - [`Poller`] + [`Process`] asynchronous handler with one worker per source
//! - `LogWriter` (feature `logging`) synchronous handler writing through `tracing`

mod handler;
#[cfg(feature = "logging")]
mod log;
mod poller;
mod source;

pub use handler::{Handler, HandlerRef, Source, SyncHandler};
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use poller::{Poller, Process};
pub use source::BufferedSource;

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
