//! cloudtap core - event record, sink traits, and configuration
//!
//! This crate provides the types shared by the stream client and the sinks:
//!
//! - **Event**: the record assembled from `event:`/`data:` fragments
//! - **Sink**: the trait every event destination implements
//! - **Config**: TOML/env configuration loading and validation

pub mod config;
pub mod event;
pub mod sink;

// Re-export commonly used types
pub use config::{CloudtapConfig, ConfigError, ConfigLoader, ConfigResult, StreamSettings};
pub use event::EventRecord;
pub use sink::{sink_fn, EventSink, FanoutSink, FnSink, SinkError, SinkResult};

/// cloudtap version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
