//! Collector core: subscription authority and its configuration.
//!
//! The public API from this module is [`CollectorManager`] (built through
//! [`CollectorBuilder`]) and [`Config`].
//!
//! Internal modules:
//! - [`collector`]: binds handlers to sources and manages buffer lifecycle;
//! - [`builder`]: wires configuration and the pre-subscription registry;
//! - [`config`]: sizing and timing knobs.

mod builder;
mod collector;
mod config;

pub use builder::CollectorBuilder;
pub use collector::CollectorManager;
pub use config::Config;
