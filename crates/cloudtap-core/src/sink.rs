//! Sink traits
//!
//! A sink is the destination for validated events. The consumption loop
//! calls [`EventSink::enqueue`] once per record and waits for it to return,
//! so sinks are expected to be fast or to buffer internally.

use crate::event::EventRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Sink error type
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Sink operation failed: {0}")]
    OperationFailed(String),

    #[error("Sink is closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for validated events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Sink name, used in diagnostics
    fn name(&self) -> &str;

    /// Receive one validated event
    async fn enqueue(&self, event: EventRecord) -> SinkResult<()>;

    /// Flush anything buffered
    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        (**self).enqueue(event).await
    }

    async fn flush(&self) -> SinkResult<()> {
        (**self).flush().await
    }
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        (**self).enqueue(event).await
    }

    async fn flush(&self) -> SinkResult<()> {
        (**self).flush().await
    }
}

/// Sink backed by a synchronous closure
pub struct FnSink<F> {
    name: String,
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(EventRecord) -> SinkResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

/// Wrap a closure as a sink
pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(EventRecord) -> SinkResult<()> + Send + Sync,
{
    FnSink::new("fn-sink", f)
}

#[async_trait]
impl<F> EventSink for FnSink<F>
where
    F: Fn(EventRecord) -> SinkResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        (self.f)(event)
    }
}

/// Dispatches every event to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Box<dyn EventSink>) -> Self {
        self.add(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    /// Every inner sink sees the event even if an earlier one failed.
    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        let mut failures = Vec::new();

        for sink in &self.sinks {
            if let Err(e) = sink.enqueue(event.clone()).await {
                failures.push(format!("{}: {}", sink.name(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::OperationFailed(failures.join("; ")))
        }
    }

    async fn flush(&self) -> SinkResult<()> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }
}
