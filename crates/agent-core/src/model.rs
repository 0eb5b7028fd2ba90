//! Wire-facing data shapes shared across collectors, the buffer, and the sender.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The five record sources this agent ever produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    PgStatActivity,
    PgStatStatements,
    PgLocks,
    PgLog,
    SystemMetrics,
}

impl Source {
    /// The wire tag, as sent in the envelope's `source` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::PgStatActivity => "pg_stat_activity",
            Source::PgStatStatements => "pg_stat_statements",
            Source::PgLocks => "pg_locks",
            Source::PgLog => "pg_log",
            Source::SystemMetrics => "system_metrics",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single collected unit of data, prior to envelope wrapping.
///
/// `correlation_id` is the envelope-level identifier: `log::build_log_record`
/// sets it from the first batched log entry that carried one. The per-session
/// correlation ids the activity sampler extracts live inside that record's
/// own `data` instead, since one activity record aggregates many sessions
/// and cannot carry a single top-level id.
#[derive(Debug, Clone)]
pub struct Record {
    pub source: Source,
    pub data: Map<String, Value>,
    pub correlation_id: Option<String>,
}

impl Record {
    pub fn new(source: Source, data: Map<String, Value>) -> Self {
        Self { source, data, correlation_id: None }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
