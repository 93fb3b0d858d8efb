//! Periodic stats reporting

use cloudtap_stream::{ConsumerHandle, ConsumerStats};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Log consumer stats every `interval` until the task is aborted
pub fn spawn_reporter(handle: ConsumerHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let stats = handle.stats();
            info!(
                connects = stats.connects,
                connect_failures = stats.connect_failures,
                reconnects = stats.reconnects,
                idle_reconnects = stats.idle_reconnects,
                events_dispatched = stats.events_dispatched,
                dispatch_failures = stats.dispatch_failures,
                "Consumer stats"
            );
        }
    })
}

/// One-line human summary
pub fn format_stats(stats: &ConsumerStats) -> String {
    let mean = stats
        .mean_dispatch_time()
        .map(|d| format!("{:.2}ms", d.as_secs_f64() * 1000.0))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "events={} dispatch_failures={} connects={} connect_failures={} reconnects={} idle_reconnects={} empty_waits={} lines={} dropped_lines={} mean_dispatch={}",
        stats.events_dispatched,
        stats.dispatch_failures,
        stats.connects,
        stats.connect_failures,
        stats.reconnects,
        stats.idle_reconnects,
        stats.empty_pool_waits,
        stats.lines_read,
        stats.lines_dropped,
        mean
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stats() {
        let stats = ConsumerStats {
            events_dispatched: 3,
            dispatch_failures: 1,
            connects: 2,
            dispatch_time: Duration::from_millis(8),
            ..Default::default()
        };
        let line = format_stats(&stats);
        assert!(line.starts_with("events=3 dispatch_failures=1 connects=2 "));
        assert!(line.ends_with("mean_dispatch=2.00ms"));
    }

    #[test]
    fn test_format_stats_without_dispatches() {
        let line = format_stats(&ConsumerStats::default());
        assert!(line.ends_with("mean_dispatch=-"));
    }
}
