//! # LogWriter: synchronous event printer
//!
//! A minimal [`SyncHandler`] that writes every received event through `tracing`
//! at `info` level. Use it for tests or demos.
//!
//! ## Example output (with a fmt subscriber)
//! ```text
//! INFO eventmux::handlers::log: event handler="log-writer" event=Trace("starting")
//! ```

use crate::core::CollectorManager;
use crate::error::CollectorError;
use crate::handlers::SyncHandler;

/// Synchronous handler logging each event with its `Debug` form.
pub struct LogWriter {
    name: String,
    sources: Vec<String>,
}

impl LogWriter {
    /// Creates a writer that subscribes to `sources` on init.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }
}

impl<E> SyncHandler<E> for LogWriter
where
    E: std::fmt::Debug + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, collector: &CollectorManager<E>) -> Result<(), CollectorError> {
        collector.subscribe(&self.name, self.sources.as_slice())
    }

    fn synchronous_write(&self, event: &E) {
        tracing::info!(handler = %self.name, event = ?event, "event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::handlers::{BufferedSource, HandlerRef};
    use std::sync::Arc;

    #[test]
    fn test_subscribes_on_bind() {
        let collector = CollectorManager::<String>::builder(Config::default()).build();
        let writer = Arc::new(LogWriter::new("log-writer", ["trace"]));
        collector.bind_handler(HandlerRef::<String>::synchronous(writer)).unwrap();
        assert_eq!(collector.subscriptions("log-writer"), Some(vec!["trace".to_string()]));

        let source = BufferedSource::<String>::arc("trace", "memory");
        collector.register_source(source.clone()).unwrap();
        assert!(source.publish("starting".to_string()));
        assert_eq!(collector.buffer("trace").unwrap().handler_count(), 1);
    }
}
