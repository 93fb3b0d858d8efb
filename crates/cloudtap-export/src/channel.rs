//! Channel sink: hands events to another task over a bounded mpsc channel

use async_trait::async_trait;
use cloudtap_core::{EventRecord, EventSink, SinkError, SinkResult};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Forwards events into a bounded channel.
///
/// A full channel is an error rather than a wait, so a slow receiver cannot
/// stall the consumption loop.
pub struct ChannelSink {
    tx: mpsc::Sender<EventRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<EventRecord>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => SinkError::OperationFailed(format!(
                "channel full, dropping event '{}'",
                event.name
            )),
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
