//! The streaming connection
//!
//! Owns exactly one byte stream at a time. `connect` runs the handshake,
//! retrying rejected attempts until one succeeds or the failure limit is
//! passed; `read_line` then yields protocol lines from the de-chunked body.

use crate::chunked::ChunkedDecoder;
use crate::error::{LastError, StreamError, StreamResult};
use crate::handshake::{self, ResponseHead};
use crate::lines::LineBuffer;
use crate::stats::ConsumerMetrics;
use crate::transport::{BoxedStream, Connector};
use cloudtap_core::StreamSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

const READ_BUF_SIZE: usize = 8 * 1024;

/// What a bounded read produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// One protocol line, terminator removed
    Line(String),
    /// Nothing arrived before the wait elapsed
    Timeout,
    /// The server ended the stream
    Eof,
}

/// Outcome of one handshake attempt
enum Handshake {
    Streaming {
        stream: BoxedStream,
        leftover: Vec<u8>,
    },
    Rejected(LastError),
}

/// One streaming connection to the event endpoint
pub struct StreamConnection {
    settings: StreamSettings,
    token: String,
    connector: Arc<dyn Connector>,
    metrics: Arc<ConsumerMetrics>,

    stream: Option<BoxedStream>,
    decoder: ChunkedDecoder,
    lines: LineBuffer,
    body: Vec<u8>,
    eof: bool,
    last_error: Option<LastError>,
}

impl StreamConnection {
    pub fn new(
        settings: StreamSettings,
        connector: Arc<dyn Connector>,
        metrics: Arc<ConsumerMetrics>,
    ) -> StreamResult<Self> {
        settings.validate()?;
        settings.require_credentials()?;
        let token = settings
            .access_token
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            lines: LineBuffer::new(settings.max_line_bytes),
            settings,
            token,
            connector,
            metrics,
            stream: None,
            decoder: ChunkedDecoder::new(),
            body: Vec::new(),
            eof: false,
            last_error: None,
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Whether a stream handle is held
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the stream can still produce lines
    pub fn is_readable(&self) -> bool {
        self.stream.is_some() && (!self.eof || self.lines.has_line())
    }

    /// Most recent rejected attempt, cleared by a successful handshake
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Establish the stream.
    ///
    /// Returns once a handshake answered 200 with chunked framing. Rejected
    /// attempts are retried until more than `connect_failures_max` have
    /// failed, which raises [`StreamError::ConnectionLimitExceeded`]. A 200
    /// without chunked framing raises [`StreamError::ProtocolViolation`]
    /// without retrying.
    pub async fn connect(&mut self) -> StreamResult<()> {
        self.close().await;

        let mut failures: u32 = 0;
        loop {
            let last_error = match self.handshake().await? {
                Handshake::Streaming { stream, leftover } => {
                    match self.start_streaming(stream, &leftover) {
                        Ok(()) => {
                            ConsumerMetrics::incr(&self.metrics.connects);
                            return Ok(());
                        }
                        // Body bytes that came in with the head failed to de-chunk
                        Err(e) => {
                            self.close().await;
                            LastError::transport(format!(
                                "stream from {} failed: {}",
                                self.settings.remote(),
                                e
                            ))
                        }
                    }
                }
                Handshake::Rejected(last_error) => last_error,
            };

            failures += 1;
            ConsumerMetrics::incr(&self.metrics.connect_failures);
            warn!(
                remote = %self.settings.remote(),
                failures,
                "Connection attempt failed: {}",
                last_error
            );
            self.last_error = Some(last_error.clone());

            if failures > self.settings.connect_failures_max {
                error!(
                    failures,
                    "Connection failure limit exceeded with {} failures. Last error: {}",
                    failures,
                    last_error
                );
                return Err(StreamError::ConnectionLimitExceeded {
                    failures,
                    last_error,
                });
            }

            let delay = self.settings.connect_retry_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Close the stream if one is open. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!(remote = %self.settings.remote(), "Closing stream connection");
            if let Err(e) = stream.shutdown().await {
                debug!("Error shutting down stream: {}", e);
            }
        }
        self.eof = false;
    }

    /// Wait up to `wait` for the next line.
    ///
    /// Cancel safe: dropping the future loses no buffered bytes.
    pub async fn read_line(&mut self, wait: Duration) -> StreamResult<ReadEvent> {
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            if let Some(line) = self.next_buffered_line() {
                return Ok(ReadEvent::Line(line));
            }
            if self.eof {
                return Ok(ReadEvent::Eof);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(ReadEvent::Eof);
            };

            let n = match timeout_at(deadline, stream.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => return Ok(ReadEvent::Timeout),
            };
            if n == 0 {
                debug!("Stream reached end of file");
                self.eof = true;
                continue;
            }
            self.feed(&buf[..n])?;
        }
    }

    async fn handshake(&mut self) -> StreamResult<Handshake> {
        let remote = self.settings.remote();
        let wait = self.settings.connect_timeout();

        let mut stream = match timeout(
            wait,
            self.connector.connect(&self.settings.host, self.settings.port),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!(remote = %remote, "Can't connect to '{}': {}", remote, e);
                return Ok(Handshake::Rejected(LastError::transport(format!(
                    "connect to {} failed: {}",
                    remote, e
                ))));
            }
            Err(_) => {
                error!(remote = %remote, "Can't connect to '{}': timed out", remote);
                return Ok(Handshake::Rejected(LastError::transport(format!(
                    "connect to {} timed out after {:?}",
                    remote, wait
                ))));
            }
        };
        info!(remote = %remote, "Connection established to '{}'", remote);

        let request = handshake::build_request(&self.settings, &self.token);
        debug!(path = %self.settings.request_path(), "Sending stream request");

        let exchange = async {
            stream.write_all(request.as_bytes()).await?;
            stream.flush().await?;
            handshake::read_response_head(&mut stream).await
        };
        let (head, leftover) = match timeout(wait, exchange).await {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                return Ok(Handshake::Rejected(LastError::transport(format!(
                    "handshake with {} failed: {}",
                    remote, e
                ))))
            }
            Err(_) => {
                return Ok(Handshake::Rejected(LastError::transport(format!(
                    "handshake with {} timed out after {:?}",
                    remote, wait
                ))))
            }
        };
        info!(status = head.status, "{}", head.status_line());

        if head.status != 200 {
            let body = handshake::drain_body(&mut stream, &head, leftover, wait).await;
            return Ok(Handshake::Rejected(LastError::http(
                head.status,
                head.reason.clone(),
                body,
            )));
        }

        if !head.is_chunked() {
            return Err(protocol_violation(&head));
        }

        Ok(Handshake::Streaming { stream, leftover })
    }

    fn start_streaming(&mut self, stream: BoxedStream, leftover: &[u8]) -> StreamResult<()> {
        self.last_error = None;
        self.decoder = ChunkedDecoder::new();
        self.lines.clear();
        self.eof = false;
        self.stream = Some(stream);
        self.feed(leftover)
    }

    fn feed(&mut self, data: &[u8]) -> StreamResult<()> {
        self.body.clear();
        self.decoder.decode(data, &mut self.body)?;
        self.lines.extend(&self.body);
        if self.decoder.is_done() {
            debug!("Terminating chunk received");
            self.eof = true;
        }
        Ok(())
    }

    fn next_buffered_line(&mut self) -> Option<String> {
        let dropped_before = self.lines.dropped();
        let line = self.lines.next_line();
        let dropped = self.lines.dropped() - dropped_before;
        if dropped > 0 {
            self.metrics
                .lines_dropped
                .fetch_add(dropped, std::sync::atomic::Ordering::Relaxed);
            warn!(
                max_line_bytes = self.settings.max_line_bytes,
                "Dropped {} oversized line(s)",
                dropped
            );
        }
        line
    }
}

fn protocol_violation(head: &ResponseHead) -> StreamError {
    let headers = head.header_block();
    error!(
        status = head.status,
        "Server did not send a chunked transfer-encoding header"
    );
    StreamError::ProtocolViolation {
        status: head.status,
        headers,
    }
}
