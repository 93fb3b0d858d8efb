//! Event assembly from protocol lines

use cloudtap_core::EventRecord;
use std::mem;
use tracing::{debug, info};

const EVENT_MARKER: &str = "event:";
const DATA_MARKER: &str = "data:";

/// Kind of a trimmed protocol line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment<'a> {
    /// `event: <name>`
    Name(&'a str),
    /// `data: <json>`
    Data(&'a str),
    /// `:<anything>`, e.g. the `:ok` keepalive
    Comment,
    Other,
}

/// Classify one trimmed line
pub fn classify(line: &str) -> Fragment<'_> {
    if line.starts_with(':') {
        Fragment::Comment
    } else if let Some(rest) = strip_marker(line, EVENT_MARKER) {
        Fragment::Name(rest)
    } else if let Some(rest) = strip_marker(line, DATA_MARKER) {
        Fragment::Data(rest)
    } else {
        Fragment::Other
    }
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

/// Accumulates fragments into the record being assembled
#[derive(Debug, Default)]
pub struct EventAssembler {
    current: EventRecord,
}

impl EventAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record being assembled
    pub fn current(&self) -> &EventRecord {
        &self.current
    }

    /// Feed one line.
    ///
    /// Returns the record the moment it becomes valid; a fresh empty record
    /// takes its place.
    pub fn feed(&mut self, line: &str) -> Option<EventRecord> {
        match classify(line) {
            Fragment::Name(name) => {
                self.current.set_name(name);
                info!(event = %self.current.name, "Event '{}' received", self.current.name);
            }
            Fragment::Data(raw) => {
                if !self.current.parse_data_fragment(raw) {
                    debug!("Data fragment is not a JSON object, ignoring");
                }
                info!(
                    event = %self.current.name,
                    "Data for event '{}' received",
                    self.current.name
                );
                debug!(data = ?self.current.payload, "Event data");
            }
            Fragment::Comment | Fragment::Other => return None,
        }

        if self.current.is_valid() {
            Some(mem::take(&mut self.current))
        } else {
            None
        }
    }
}
