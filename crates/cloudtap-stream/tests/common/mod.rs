//! Scripted in-memory server for connection and consumer tests

#![allow(dead_code)]

use async_trait::async_trait;
use cloudtap_core::{EventRecord, EventSink, SinkError, SinkResult, StreamSettings};
use cloudtap_stream::{BoxedStream, Connector, ConsumerHandle};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const TOKEN: &str = "test-token";
pub const HOST: &str = "stream.test";

pub const EVENT_LINE: &str = "event: temperature\n";
pub const DATA_LINE: &str = "data: {\"published_at\":\"2024-01-01T00:00:00Z\",\"ttl\":60,\"coreid\":\"dev1\",\"data\":\"{\\\"v\\\":21.5}\"}\n";

pub fn settings() -> StreamSettings {
    StreamSettings {
        access_token: Some(TOKEN.to_string()),
        host: HOST.to_string(),
        tls: false,
        user_agent: "cloudtap-test".to_string(),
        connect_failures_max: 3,
        ..Default::default()
    }
}

/// Head of a successful streaming response
pub fn ok_head() -> String {
    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n"
        .to_string()
}

/// One chunk carrying `data`
pub fn chunk(data: &str) -> String {
    format!("{:x}\r\n{}\r\n", data.len(), data)
}

/// The terminating chunk
pub fn last_chunk() -> String {
    "0\r\n\r\n".to_string()
}

/// A full event as one chunk per line
pub fn event_chunks(name: &str, coreid: &str) -> String {
    let data = DATA_LINE.replace("dev1", coreid);
    chunk(&format!("event: {}\n", name)) + &chunk(&data)
}

pub fn error_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

/// What the server does on one accepted connection
#[derive(Debug, Clone)]
pub enum Script {
    /// Write `bytes` after the request, then hold the stream open
    Respond(String),
    /// Write `bytes` after the request, then close
    RespondAndClose(String),
    /// Write `head`, wait `delay`, write `body`, then hold the stream open
    Delayed {
        head: String,
        delay: Duration,
        body: String,
    },
    /// Refuse the connection
    Refuse,
}

/// Connector answering each connection with the next script.
///
/// Connections beyond the script are refused.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<String>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().pop_front();
        let (bytes, later, close) = match script {
            Some(Script::Respond(bytes)) => (bytes, None, false),
            Some(Script::RespondAndClose(bytes)) => (bytes, None, true),
            Some(Script::Delayed { head, delay, body }) => (head, Some((delay, body)), false),
            Some(Script::Refuse) | None => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))
            }
        };

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let requests = Arc::clone(&self.requests);

        tokio::spawn(async move {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"\r\n\r\n") {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            requests
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&request).into_owned());

            if server.write_all(bytes.as_bytes()).await.is_err() {
                return;
            }
            if let Some((delay, body)) = later {
                tokio::time::sleep(delay).await;
                if server.write_all(body.as_bytes()).await.is_err() {
                    return;
                }
            }
            if close {
                let _ = server.shutdown().await;
                return;
            }
            // Hold the stream open until the client goes away
            while let Ok(n) = server.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        Ok(Box::new(client))
    }
}

/// Sink recording every event, optionally stopping the consumer after N
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<EventRecord>>>,
    stop: Arc<Mutex<Option<(usize, ConsumerHandle)>>>,
    fail_first: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` enqueue calls
    pub fn failing_first(n: usize) -> Self {
        let sink = Self::default();
        sink.fail_first.store(n, Ordering::SeqCst);
        sink
    }

    /// Stop `handle` once `count` events were recorded
    pub fn stop_after(&self, count: usize, handle: ConsumerHandle) {
        *self.stop.lock().unwrap() = Some((count, handle));
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        let failing = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::OperationFailed("queue unavailable".to_string()));
        }

        let count = {
            let mut events = self.events.lock().unwrap();
            events.push(event);
            events.len()
        };

        if let Some((stop_at, handle)) = self.stop.lock().unwrap().as_ref() {
            if count >= *stop_at {
                handle.stop();
            }
        }
        Ok(())
    }
}
