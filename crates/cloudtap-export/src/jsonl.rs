//! JSONL sink

use async_trait::async_trait;
use cloudtap_core::config::JsonlSinkConfig;
use cloudtap_core::{EventRecord, EventSink, SinkError, SinkResult};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// Path value selecting stdout
pub const STDOUT_PATH: &str = "-";

enum Output {
    Stdout(io::Stdout),
    File(BufWriter<File>),
    #[cfg(test)]
    Memory(Vec<u8>),
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Stdout(w) => w.write(buf),
            Output::File(w) => w.write(buf),
            #[cfg(test)]
            Output::Memory(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Stdout(w) => w.flush(),
            Output::File(w) => w.flush(),
            #[cfg(test)]
            Output::Memory(w) => w.flush(),
        }
    }
}

/// Writes one JSON object per line to a file or stdout
pub struct JsonlSink {
    target: String,
    flush_each: bool,
    writer: Mutex<Output>,
    events_written: AtomicU64,
}

impl JsonlSink {
    /// Open the output described by `config`
    pub fn open(config: &JsonlSinkConfig) -> SinkResult<Self> {
        let output = if config.path == STDOUT_PATH {
            Output::Stdout(io::stdout())
        } else {
            let path = PathBuf::from(&config.path);
            let file = if config.append {
                OpenOptions::new().create(true).append(true).open(&path)?
            } else {
                File::create(&path)?
            };
            Output::File(BufWriter::new(file))
        };

        let target = if config.path == STDOUT_PATH {
            "stdout".to_string()
        } else {
            config.path.clone()
        };
        info!("JSONL sink writing to: {}", target);

        Ok(Self {
            target,
            flush_each: config.flush_each,
            writer: Mutex::new(output),
            events_written: AtomicU64::new(0),
        })
    }

    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }

    fn lock(&self) -> SinkResult<std::sync::MutexGuard<'_, Output>> {
        self.writer
            .lock()
            .map_err(|e| SinkError::OperationFailed(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        let json = serde_json::to_string(&event)?;

        let mut w = self.lock()?;
        writeln!(w, "{}", json)?;
        if self.flush_each {
            w.flush()?;
        }

        self.events_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> SinkResult<()> {
        self.lock()?.flush()?;
        info!(
            target_path = %self.target,
            "JSONL sink flushed after {} events",
            self.events_written()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn record(name: &str) -> EventRecord {
        EventRecord {
            name: name.to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            source_id: "dev1".to_string(),
            ttl: Some(60),
            payload: Some(json!({"v": 21.5})),
            ..Default::default()
        }
    }

    fn config(path: &std::path::Path, append: bool) -> JsonlSinkConfig {
        JsonlSinkConfig {
            enabled: true,
            path: path.to_string_lossy().into_owned(),
            append,
            flush_each: true,
        }
    }

    #[tokio::test]
    async fn test_writes_one_line_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlSink::open(&config(&path, false)).unwrap();

        sink.enqueue(record("a")).await.unwrap();
        sink.enqueue(record("b")).await.unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: EventRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, record("a"));
        assert_eq!(sink.events_written(), 2);
    }

    #[tokio::test]
    async fn test_append_keeps_existing_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{\"name\":\"old\",\"source_id\":\"x\"}\n").unwrap();

        let sink = JsonlSink::open(&config(&path, true)).unwrap();
        sink.enqueue(record("new")).await.unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_truncate_replaces_existing_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "stale\n").unwrap();

        let sink = JsonlSink::open(&config(&path, false)).unwrap();
        sink.enqueue(record("new")).await.unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
    }

    #[tokio::test]
    async fn test_memory_output_without_flush_each() {
        let sink = JsonlSink {
            target: "memory".to_string(),
            flush_each: false,
            writer: Mutex::new(Output::Memory(Vec::new())),
            events_written: AtomicU64::new(0),
        };
        sink.enqueue(record("a")).await.unwrap();

        let guard = sink.writer.lock().unwrap();
        let Output::Memory(buf) = &*guard else {
            panic!("expected memory output");
        };
        let line = String::from_utf8(buf.clone()).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"name\":\"a\""));
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let config = JsonlSinkConfig {
            enabled: true,
            path: "/nonexistent/dir/events.jsonl".to_string(),
            append: true,
            flush_each: true,
        };
        assert!(matches!(
            JsonlSink::open(&config),
            Err(SinkError::IoError(_))
        ));
    }
}
