//! Multi-line log record assembly.
//!
//! PostgreSQL log records can span several physical lines (a `LOG:` line
//! followed by continuation lines like the offending statement). A record is
//! only complete once the next timestamp-prefixed line appears, or the file
//! rotates, or the process is shutting down.

use super::parser::{self, ParsedLogLine, TIMESTAMP_PREFIX_RE};

#[derive(Default)]
pub struct LineAssembler {
    pending: Vec<String>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one physical line. Returns the previously buffered record if
    /// this line starts a new one (only after the buffer already held
    /// something).
    pub fn push(&mut self, line: String) -> Option<ParsedLogLine> {
        let starts_new_record = TIMESTAMP_PREFIX_RE.is_match(&line);
        let flushed = if starts_new_record && !self.pending.is_empty() {
            self.flush()
        } else {
            None
        };
        self.pending.push(line);
        flushed
    }

    /// Flush whatever is currently buffered, parsing it as one record.
    /// Called on rotation and on shutdown in addition to the natural
    /// next-timestamp trigger inside `push`.
    pub fn flush(&mut self) -> Option<ParsedLogLine> {
        if self.pending.is_empty() {
            return None;
        }
        let joined = self.pending.join("\n");
        self.pending.clear();
        parser::parse_log_line(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_previous_record_on_new_timestamp() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push("2026-01-15 10:00:00.000 UTC [1] LOG:  statement: SELECT 1".to_string()).is_none());
        assert!(assembler.push("    continuation of statement".to_string()).is_none());

        let flushed = assembler
            .push("2026-01-15 10:00:01.000 UTC [1] LOG:  next record".to_string())
            .expect("first record should flush");
        assert_eq!(flushed.pid, 1);
        assert!(flushed.message.contains("SELECT 1"));
    }

    #[test]
    fn explicit_flush_on_shutdown_drains_pending() {
        let mut assembler = LineAssembler::new();
        assembler.push("2026-01-15 10:00:00.000 UTC [1] LOG:  final line".to_string());
        let flushed = assembler.flush().expect("pending record should flush");
        assert_eq!(flushed.message, "final line");
        assert!(assembler.flush().is_none());
    }
}
