//! Reconnect sequencing
//!
//! [`ReconnectPolicy`] closes the old stream before opening a new one and
//! keeps retrying until the fresh stream is actually readable. The shared
//! [`Control`] carries the reconnection-enabled flag that ends consumption.

use crate::connection::StreamConnection;
use crate::error::{StreamError, StreamResult};
use crate::stats::ConsumerMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Reconnection flag shared between the consumer and its handles
#[derive(Debug)]
pub struct Control {
    enabled: AtomicBool,
    running: AtomicBool,
    notify: Notify,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            running: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
}

impl Control {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Clear the flag and wake whoever is waiting on it
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        // notify_one stores a permit when nobody is waiting yet
        self.notify.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Resolves once the flag is cleared
    pub async fn disabled(&self) {
        loop {
            if !self.is_enabled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Drives disconnect/connect cycles for a [`StreamConnection`]
pub struct ReconnectPolicy {
    conn: StreamConnection,
    control: Arc<Control>,
    metrics: Arc<ConsumerMetrics>,
    empty_pool_delay: Duration,
    empty_pool_retries_max: Option<u32>,
    connected_once: bool,
}

impl ReconnectPolicy {
    pub fn new(conn: StreamConnection, control: Arc<Control>, metrics: Arc<ConsumerMetrics>) -> Self {
        let settings = conn.settings();
        Self {
            empty_pool_delay: settings.empty_pool_delay(),
            empty_pool_retries_max: settings.empty_pool_retries_max,
            conn,
            control,
            metrics,
            connected_once: false,
        }
    }

    pub fn connection(&self) -> &StreamConnection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut StreamConnection {
        &mut self.conn
    }

    /// Replace the current stream with a fresh, readable one.
    ///
    /// The old stream is always closed before a new one is opened. The
    /// reconnection flag is left untouched. When the new stream has nothing
    /// to read, waits `empty_pool_delay` and tries again, up to
    /// `empty_pool_retries_max` times when a ceiling is set.
    ///
    /// Returns `Ok(false)` if the flag was cleared while waiting.
    pub async fn reconnect(&mut self) -> StreamResult<bool> {
        if self.connected_once {
            ConsumerMetrics::incr(&self.metrics.reconnects);
        }

        let mut empty_attempts: u32 = 0;
        loop {
            self.conn.close().await;

            let control = Arc::clone(&self.control);
            tokio::select! {
                result = self.conn.connect() => result?,
                _ = control.disabled() => {
                    debug!("Reconnect interrupted by stop request");
                    return Ok(false);
                }
            }
            self.connected_once = true;

            if self.conn.is_readable() {
                return Ok(true);
            }

            empty_attempts += 1;
            ConsumerMetrics::incr(&self.metrics.empty_pool_waits);
            if let Some(max) = self.empty_pool_retries_max {
                if empty_attempts > max {
                    return Err(StreamError::StreamUnavailable {
                        attempts: empty_attempts,
                    });
                }
            }

            warn!(
                attempts = empty_attempts,
                "No stream available, sleeping for {:?}...",
                self.empty_pool_delay
            );
            tokio::select! {
                _ = tokio::time::sleep(self.empty_pool_delay) => {}
                _ = control.disabled() => {
                    debug!("Empty stream wait interrupted by stop request");
                    return Ok(false);
                }
            }
        }
    }

    /// Close the stream and clear the reconnection flag
    pub async fn disconnect(&mut self) {
        if self.conn.is_open() {
            info!("Disconnecting from event stream");
        }
        self.conn.close().await;
        self.control.disable();
    }
}
