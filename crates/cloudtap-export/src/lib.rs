//! Event sinks for cloudtap

pub mod channel;
pub mod jsonl;

#[cfg(feature = "webhook")]
pub mod webhook;

pub use channel::ChannelSink;
pub use jsonl::JsonlSink;

#[cfg(feature = "webhook")]
pub use webhook::WebhookSink;
