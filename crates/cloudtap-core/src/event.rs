//! Event record assembled from the cloud event stream
//!
//! A record starts empty and accumulates fields as `event:` and `data:`
//! fragments arrive. It becomes dispatchable once [`EventRecord::is_valid`]
//! holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event received from the stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name, from the `event:` fragment
    pub name: String,

    /// Local receipt time, stamped right before dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Server publish time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    /// Advisory time-to-live in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,

    /// Originating device identifier
    pub source_id: String,

    /// Decoded event payload, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// A record is valid once it carries a name, a publish time and a source.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.published_at.is_some() && !self.source_id.is_empty()
    }

    /// Whether no fragment has touched this record yet
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }

    /// Apply a decoded `data:` fragment.
    ///
    /// Only JSON objects are considered; anything else is ignored. Each known
    /// field is applied only when it is present and well-formed, so a partial
    /// or malformed fragment never clears what an earlier fragment set.
    /// Returns `true` when at least one field was applied.
    pub fn apply_data_fragment(&mut self, fragment: &Value) -> bool {
        let Some(obj) = fragment.as_object() else {
            return false;
        };

        let mut applied = false;

        if let Some(published_at) = obj.get("published_at").and_then(parse_timestamp) {
            self.published_at = Some(published_at);
            applied = true;
        }

        if let Some(ttl) = obj.get("ttl").and_then(parse_ttl) {
            self.ttl = Some(ttl);
            applied = true;
        }

        if let Some(coreid) = obj.get("coreid").and_then(Value::as_str) {
            self.source_id = coreid.to_string();
            applied = true;
        }

        if let Some(data) = obj.get("data") {
            self.payload = Some(decode_payload(data));
            applied = true;
        }

        applied
    }

    /// Decode the text after a `data:` marker and apply it.
    ///
    /// Text that is not JSON is ignored, same as a non-object fragment.
    pub fn parse_data_fragment(&mut self, raw: &str) -> bool {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.apply_data_fragment(&value),
            Err(_) => false,
        }
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// The cloud sends ttl as a number or as a numeric string depending on the
// API version.
fn parse_ttl(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_payload(data: &Value) -> Value {
    match data {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| data.clone()),
        other => other.clone(),
    }
}
