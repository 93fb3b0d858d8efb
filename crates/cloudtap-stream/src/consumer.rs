//! The consumption loop
//!
//! Keeps a stream connected, reads protocol lines with a bounded wait,
//! reconnects when the stream goes idle and hands every completed record to
//! the sink, in wire order, one at a time.

use crate::assembler::EventAssembler;
use crate::connection::{ReadEvent, StreamConnection};
use crate::error::StreamResult;
use crate::reconnect::{Control, ReconnectPolicy};
use crate::stats::{ConsumerMetrics, ConsumerStats};
use crate::transport::{default_connector, Connector};
use chrono::Utc;
use cloudtap_core::{EventRecord, EventSink, StreamSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Remote control for a running [`Consumer`]
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    control: Arc<Control>,
    metrics: Arc<ConsumerMetrics>,
}

impl ConsumerHandle {
    /// Ask the consumer to stop.
    ///
    /// Clears the reconnection flag and wakes the loop; `consume` returns
    /// after closing the stream. Has no effect on a sink call in progress.
    pub fn stop(&self) {
        info!("Stop requested");
        self.control.disable();
    }

    /// Whether `consume` is currently running
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.metrics.snapshot()
    }
}

/// Streams events from the cloud into a sink
pub struct Consumer<S> {
    policy: ReconnectPolicy,
    sink: S,
    assembler: EventAssembler,
    control: Arc<Control>,
    metrics: Arc<ConsumerMetrics>,
    read_timeout: Duration,
    idle_reconnect_timeout: Duration,
}

impl<S: EventSink> Consumer<S> {
    /// Create a consumer using the connector picked by `settings.tls`
    pub fn new(settings: StreamSettings, sink: S) -> StreamResult<Self> {
        let connector = default_connector(settings.tls)?;
        Self::with_connector(settings, connector, sink)
    }

    /// Create a consumer over a custom connector
    pub fn with_connector(
        settings: StreamSettings,
        connector: Arc<dyn Connector>,
        sink: S,
    ) -> StreamResult<Self> {
        let read_timeout = settings.read_timeout();
        let idle_reconnect_timeout = settings.idle_reconnect_timeout();

        let metrics = Arc::new(ConsumerMetrics::default());
        let control = Arc::new(Control::default());
        let conn = StreamConnection::new(settings, connector, Arc::clone(&metrics))?;
        let policy = ReconnectPolicy::new(conn, Arc::clone(&control), Arc::clone(&metrics));

        Ok(Self {
            policy,
            sink,
            assembler: EventAssembler::new(),
            control,
            metrics,
            read_timeout,
            idle_reconnect_timeout,
        })
    }

    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            control: Arc::clone(&self.control),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.metrics.snapshot()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn connection(&self) -> &StreamConnection {
        self.policy.connection()
    }

    /// Consume the stream until stopped or a fatal error.
    ///
    /// Fatal errors are returned after the stream is closed. Everything else
    /// is logged and absorbed by reconnecting. Once this returns the
    /// reconnection flag is cleared, so calling it again returns immediately.
    pub async fn consume(&mut self) -> StreamResult<()> {
        self.control.set_running(true);
        info!(
            remote = %self.policy.connection().settings().remote(),
            path = %self.policy.connection().settings().request_path(),
            "Starting event stream consumer"
        );

        let result = self.run().await;

        self.policy.disconnect().await;
        if let Err(e) = self.sink.flush().await {
            warn!(sink = self.sink.name(), "Failed to flush sink: {}", e);
        }
        self.control.set_running(false);

        match &result {
            Ok(()) => info!(stats = ?self.metrics.snapshot(), "Event stream consumer stopped"),
            Err(e) => error!("Event stream consumer failed: {}", e),
        }
        result
    }

    async fn run(&mut self) -> StreamResult<()> {
        let control = Arc::clone(&self.control);

        while control.is_enabled() {
            if !self.policy.reconnect().await? {
                break;
            }
            let mut last_activity = Instant::now();

            while self.policy.connection().is_readable() {
                let read = tokio::select! {
                    biased;
                    _ = control.disabled() => return Ok(()),
                    read = self.policy.connection_mut().read_line(self.read_timeout) => read,
                };

                let line = match read {
                    Ok(ReadEvent::Line(line)) => line,
                    Ok(ReadEvent::Timeout) => {
                        // Only an empty wait can trip the idle check; a line in
                        // hand is processed even when it arrived late.
                        if last_activity.elapsed() > self.idle_reconnect_timeout {
                            warn!(
                                idle_reconnect_timeout = ?self.idle_reconnect_timeout,
                                "Idle timeout: no stream activity for > {:?}. Reconnecting...",
                                self.idle_reconnect_timeout
                            );
                            ConsumerMetrics::incr(&self.metrics.idle_reconnects);
                            if !self.policy.reconnect().await? {
                                return Ok(());
                            }
                            last_activity = Instant::now();
                        }
                        continue;
                    }
                    Ok(ReadEvent::Eof) => {
                        info!("Stream closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("Stream read failed: {}", e);
                        break;
                    }
                };

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                last_activity = Instant::now();
                ConsumerMetrics::incr(&self.metrics.lines_read);

                if let Some(record) = self.assembler.feed(line) {
                    dispatch(&self.sink, &self.metrics, record).await;
                }
            }

            debug!("Stream no longer readable");
        }

        Ok(())
    }
}

async fn dispatch<S: EventSink>(sink: &S, metrics: &ConsumerMetrics, mut record: EventRecord) {
    record.set_created_at(Utc::now());
    info!(
        event = %record.name,
        source_id = %record.source_id,
        "Enqueuing event"
    );

    let start = std::time::Instant::now();
    let result = sink.enqueue(record).await;
    let elapsed = start.elapsed();

    match result {
        Ok(()) => metrics.record_dispatch(elapsed, true),
        Err(e) => {
            error!(sink = sink.name(), "Failed to enqueue event: {}", e);
            metrics.record_dispatch(elapsed, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use cloudtap_core::{sink_fn, SinkResult};

    fn noop(_: EventRecord) -> SinkResult<()> {
        Ok(())
    }

    #[test]
    fn test_new_rejects_missing_token() {
        let settings = StreamSettings {
            tls: false,
            ..Default::default()
        };
        let result = Consumer::new(settings, sink_fn(noop));
        assert!(matches!(result, Err(StreamError::Config(_))));
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let settings = StreamSettings {
            access_token: Some("tok".to_string()),
            tls: false,
            read_timeout_ms: 10_000,
            idle_reconnect_timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(Consumer::new(settings, sink_fn(noop)).is_err());
    }

    #[tokio::test]
    async fn test_consume_after_stop_returns_immediately() {
        let settings = StreamSettings {
            access_token: Some("tok".to_string()),
            tls: false,
            ..Default::default()
        };
        let mut consumer = Consumer::new(settings, sink_fn(noop)).unwrap();
        let handle = consumer.handle();
        assert!(!handle.is_running());

        handle.stop();
        consumer.consume().await.unwrap();

        assert!(!handle.is_running());
        assert_eq!(handle.stats().connects, 0);
    }
}
