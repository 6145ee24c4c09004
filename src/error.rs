//! Error types used by the collector core.
//!
//! A single enum, [`CollectorError`], covers both dispatcher-level failures
//! (unknown or duplicate handler/source names) and buffer-level failures
//! (cancelled or detached reads).
//!
//! Like the rest of the crate's public surface it provides helper methods
//! (`as_label`, `as_message`) for logging/metrics.

use thiserror::Error;

/// # Errors produced by the collector core.
///
/// Dispatcher errors are contract violations by the embedding system and are
/// always returned synchronously. Buffer errors surface to the blocked reader.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// Subscribe/unsubscribe by a handler that was never bound to the collector.
    #[error("handler '{handler}' is not bound to the collector")]
    UnboundHandler {
        /// Name passed by the caller.
        handler: String,
    },

    /// A handler with the same name is already bound.
    #[error("handler '{handler}' is already bound")]
    DuplicateHandler {
        /// Conflicting handler name.
        handler: String,
    },

    /// A source with the same name is already registered.
    #[error("source '{source_name}' is already registered")]
    DuplicateSource {
        /// Conflicting source name.
        source_name: String,
    },

    /// The handler has no cursor on this buffer (never attached, or detached).
    #[error("handler '{handler}' is not attached to source '{source_name}'")]
    NotAttached {
        /// Handler that attempted the read.
        handler: String,
        /// Source owning the buffer.
        source_name: String,
    },

    /// A blocking read was cancelled through its token.
    #[error("read cancelled")]
    Cancelled,
}

impl CollectorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use eventmux::CollectorError;
    ///
    /// let err = CollectorError::UnboundHandler { handler: "audit".into() };
    /// assert_eq!(err.as_label(), "handler_unbound");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CollectorError::UnboundHandler { .. } => "handler_unbound",
            CollectorError::DuplicateHandler { .. } => "handler_duplicate",
            CollectorError::DuplicateSource { .. } => "source_duplicate",
            CollectorError::NotAttached { .. } => "handler_not_attached",
            CollectorError::Cancelled => "read_cancelled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            CollectorError::UnboundHandler { handler } => format!("unbound: {handler}"),
            CollectorError::DuplicateHandler { handler } => format!("duplicate handler: {handler}"),
            CollectorError::DuplicateSource { source_name } => {
                format!("duplicate source: {source_name}")
            }
            CollectorError::NotAttached {
                handler,
                source_name,
            } => format!("not attached: {handler} -> {source_name}"),
            CollectorError::Cancelled => "read cancelled".to_string(),
        }
    }

    /// Indicates whether the error is the expected shutdown outcome of a read.
    ///
    /// # Example
    /// ```
    /// use eventmux::CollectorError;
    ///
    /// assert!(CollectorError::Cancelled.is_cancelled());
    /// assert!(!CollectorError::UnboundHandler { handler: "x".into() }.is_cancelled());
    /// ```
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CollectorError::Cancelled)
    }
}
