//! Consumer runtime statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, shared between the consumer and its handles
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub reconnects: AtomicU64,
    pub idle_reconnects: AtomicU64,
    pub empty_pool_waits: AtomicU64,
    pub lines_read: AtomicU64,
    pub lines_dropped: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub dispatch_failures: AtomicU64,
    /// Total time spent inside the sink, in microseconds
    pub dispatch_time_us: AtomicU64,
}

impl ConsumerMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, elapsed: Duration, ok: bool) {
        self.dispatch_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if ok {
            Self::incr(&self.events_dispatched);
        } else {
            Self::incr(&self.dispatch_failures);
        }
    }

    pub fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            idle_reconnects: self.idle_reconnects.load(Ordering::Relaxed),
            empty_pool_waits: self.empty_pool_waits.load(Ordering::Relaxed),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            dispatch_time: Duration::from_micros(self.dispatch_time_us.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`ConsumerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub connects: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
    pub idle_reconnects: u64,
    pub empty_pool_waits: u64,
    pub lines_read: u64,
    pub lines_dropped: u64,
    pub events_dispatched: u64,
    pub dispatch_failures: u64,
    pub dispatch_time: Duration,
}

impl ConsumerStats {
    /// Mean time per dispatch call
    pub fn mean_dispatch_time(&self) -> Option<Duration> {
        let calls = self.events_dispatched + self.dispatch_failures;
        if calls == 0 {
            return None;
        }
        let nanos = self.dispatch_time.as_nanos() / u128::from(calls);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}
