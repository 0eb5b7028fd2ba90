//! Envelope builder: wraps one record into the transport payload the
//! sender POSTs to the listener.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Record, Source};

/// A single unit of transmission. Immutable once built. `source` is typed
/// as the closed `Source` enum rather than a bare string, so the type system
/// (not just `build`'s current body) enforces that every envelope's source
/// is one of the five recognized tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation_id: String,
    pub project: String,
    pub timestamp: f64,
    pub source: Source,
    pub data: Map<String, Value>,
}

/// Wrap `record` for `project`. `correlation_id` defaults to the record's
/// own if present, else an empty string. The timestamp is captured here,
/// never at record acquisition time.
pub fn build(record: Record, project: &str) -> Envelope {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    Envelope {
        correlation_id: record.correlation_id.unwrap_or_default(),
        project: project.to_string(),
        timestamp,
        source: record.source,
        data: record.data,
    }
}
