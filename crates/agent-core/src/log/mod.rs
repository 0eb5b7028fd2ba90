//! Log tailer state machine and the batching log pump built on top of it,
//! driven by the scheduler's log-pump task.

mod assembler;
pub mod parser;
pub mod tailer;

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::model::{Record, Source};

use assembler::LineAssembler;
pub use parser::ParsedLogLine;
use tailer::FileTailer;

/// Default poll interval between reads when no new data is available.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Batch size at which the log pump force-flushes even without a
/// correlation id or shutdown.
const MAX_BATCH_ENTRIES: usize = 500;

/// Drives the file tailer, assembles multi-line records, and batches them
/// for the scheduler to hand to the HTTP sender as `pg_log` envelopes.
pub struct LogPump {
    path: PathBuf,
    poll_interval: Duration,
    tailer: Option<FileTailer>,
    assembler: LineAssembler,
    batch: Vec<ParsedLogLine>,
}

/// Why the pump is asking the caller to flush the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    BatchFull,
    CorrelatedEntry,
    Shutdown,
}

impl LogPump {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tailer: None,
            assembler: LineAssembler::new(),
            batch: Vec::new(),
        }
    }

    /// Run until `should_stop` returns true, calling `on_flush` whenever the
    /// batch should be sent. This occupies the calling thread — the
    /// scheduler runs it on its dedicated log-pump thread.
    pub fn run(&mut self, should_stop: impl Fn() -> bool, mut on_flush: impl FnMut(Vec<ParsedLogLine>, FlushReason)) {
        info!(path = %self.path.display(), "starting_log_tail");

        loop {
            if should_stop() {
                break;
            }

            if self.tailer.is_none() {
                match FileTailer::open_when_ready(self.path.clone(), self.poll_interval, &should_stop) {
                    None => break,
                    Some(Ok(t)) => self.tailer = Some(t),
                    Some(Err(e)) => {
                        warn!(error = %e, "log_tail_error");
                        std::thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                }
            }

            let tailer = self.tailer.as_mut().unwrap();
            match tailer.read_new_lines() {
                Ok(outcome) => {
                    if outcome.gone {
                        self.tailer = None;
                        std::thread::sleep(Duration::from_secs(1));
                        continue;
                    }

                    if outcome.rotated {
                        info!(path = %self.path.display(), "log_rotation_detected");
                        if let Some(entry) = self.assembler.flush() {
                            self.push_and_maybe_flush(entry, &mut on_flush);
                        }
                    }

                    if outcome.lines.is_empty() {
                        std::thread::sleep(self.poll_interval);
                        continue;
                    }

                    for line in outcome.lines {
                        if let Some(entry) = self.assembler.push(line) {
                            self.push_and_maybe_flush(entry, &mut on_flush);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "log_tail_error");
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }

        if let Some(entry) = self.assembler.flush() {
            self.batch.push(entry);
        }
        if !self.batch.is_empty() {
            let batch = std::mem::take(&mut self.batch);
            on_flush(batch, FlushReason::Shutdown);
        }
    }

    fn push_and_maybe_flush(
        &mut self,
        entry: ParsedLogLine,
        on_flush: &mut impl FnMut(Vec<ParsedLogLine>, FlushReason),
    ) {
        let has_correlation = entry.correlation_id.is_some();
        self.batch.push(entry);

        if has_correlation {
            let batch = std::mem::take(&mut self.batch);
            on_flush(batch, FlushReason::CorrelatedEntry);
        } else if self.batch.len() >= MAX_BATCH_ENTRIES {
            let batch = std::mem::take(&mut self.batch);
            on_flush(batch, FlushReason::BatchFull);
        }
    }
}

/// Build the aggregate `pg_log` record the scheduler sends for one flushed
/// batch: the raw entries plus a total count and a per-level breakdown.
pub fn build_log_record(entries: Vec<ParsedLogLine>) -> Record {
    let mut levels: Map<String, Value> = Map::new();
    let mut entry_values = Vec::with_capacity(entries.len());
    let correlation_id = entries.iter().find_map(|e| e.correlation_id.clone());

    for entry in &entries {
        let counter = levels.entry(entry.level.clone()).or_insert(json!(0));
        if let Value::Number(n) = counter {
            *counter = json!(n.as_i64().unwrap_or(0) + 1);
        }

        let mut obj = Map::new();
        obj.insert("timestamp".to_string(), json!(entry.timestamp));
        obj.insert("pid".to_string(), json!(entry.pid));
        obj.insert("level".to_string(), json!(entry.level));
        obj.insert("message".to_string(), json!(entry.message));
        obj.insert("user".to_string(), json!(entry.user));
        obj.insert("database".to_string(), json!(entry.database));
        obj.insert("duration_ms".to_string(), json!(entry.duration_ms));
        obj.insert("statement".to_string(), json!(entry.statement));
        obj.insert("correlation_id".to_string(), json!(entry.correlation_id));
        entry_values.push(Value::Object(obj));
    }

    let mut data = Map::new();
    data.insert("count".to_string(), json!(entry_values.len()));
    data.insert("levels".to_string(), Value::Object(levels));
    data.insert("entries".to_string(), Value::Array(entry_values));

    let record = Record::new(Source::PgLog, data);
    match correlation_id {
        Some(id) => record.with_correlation_id(id),
        None => record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_log_record_counts_levels() {
        let entries = vec![
            ParsedLogLine {
                timestamp: "2026-01-15 10:00:00".to_string(),
                pid: 1,
                level: "LOG".to_string(),
                message: "a".to_string(),
                user: None,
                database: None,
                duration_ms: None,
                statement: None,
                correlation_id: None,
            },
            ParsedLogLine {
                timestamp: "2026-01-15 10:00:01".to_string(),
                pid: 2,
                level: "ERROR".to_string(),
                message: "b".to_string(),
                user: None,
                database: None,
                duration_ms: None,
                statement: None,
                correlation_id: None,
            },
            ParsedLogLine {
                timestamp: "2026-01-15 10:00:02".to_string(),
                pid: 3,
                level: "LOG".to_string(),
                message: "c".to_string(),
                user: None,
                database: None,
                duration_ms: None,
                statement: None,
                correlation_id: None,
            },
        ];

        let record = build_log_record(entries);
        assert_eq!(record.data["count"], json!(3));
        assert_eq!(record.data["levels"]["LOG"], json!(2));
        assert_eq!(record.data["levels"]["ERROR"], json!(1));
        assert_eq!(record.correlation_id, None);
    }

    #[test]
    fn build_log_record_carries_correlation_id_from_entry() {
        let entries = vec![
            ParsedLogLine {
                timestamp: "2026-01-15 10:00:00".to_string(),
                pid: 1,
                level: "LOG".to_string(),
                message: "a".to_string(),
                user: None,
                database: None,
                duration_ms: None,
                statement: None,
                correlation_id: None,
            },
            ParsedLogLine {
                timestamp: "2026-01-15 10:00:01".to_string(),
                pid: 2,
                level: "ERROR".to_string(),
                message: "b".to_string(),
                user: None,
                database: None,
                duration_ms: None,
                statement: None,
                correlation_id: Some("0196d2b0-27ad-7b1e-9b7f-6f1a2b3c4d5e".to_string()),
            },
        ];

        let record = build_log_record(entries);
        assert_eq!(record.correlation_id.as_deref(), Some("0196d2b0-27ad-7b1e-9b7f-6f1a2b3c4d5e"));
    }
}
