//! Persistent buffer: a crash-safe FIFO backed by a single SQLite file,
//! with size-bounded eviction of the oldest entries.
//!
//! Requeue is head-ordered: a failed send goes back to the front of the
//! queue rather than the back, so a single stuck entry cannot let newer
//! entries overtake it and be delivered out of order.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use crate::error::AgentError;

/// One dequeued entry: its sequence number (needed for `requeue`) and the
/// opaque payload bytes.
pub struct BufferEntry {
    pub seq: i64,
    pub payload: Vec<u8>,
}

/// `(count, bytes_on_disk)` as reported by [`PersistentBuffer::size`].
pub struct BufferSize {
    pub count: u64,
    pub bytes_on_disk: u64,
}

pub struct PersistentBuffer {
    conn: Mutex<Connection>,
    max_bytes: u64,
}

impl PersistentBuffer {
    /// Open (creating if absent) the buffer database at `path`.
    pub fn open(path: &Path, max_size_mb: u64) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::BufferStore(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS entries (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 payload BLOB NOT NULL,
                 enqueued_at INTEGER NOT NULL
             );",
        )?;

        Ok(Self { conn: Mutex::new(conn), max_bytes: max_size_mb * 1024 * 1024 })
    }

    /// Append `payload`, evicting the oldest entries first if this would
    /// push disk usage over the configured maximum.
    pub fn put(&self, payload: &[u8]) -> Result<(), AgentError> {
        let conn = self.conn.lock().expect("buffer mutex poisoned");
        self.evict_if_needed(&conn)?;

        let now = now_unix(&conn)?;
        conn.execute(
            "INSERT INTO entries (payload, enqueued_at) VALUES (?1, ?2)",
            params![payload, now],
        )?;
        Ok(())
    }

    /// Remove and return the oldest entry, if any.
    pub fn get(&self) -> Result<Option<BufferEntry>, AgentError> {
        let conn = self.conn.lock().expect("buffer mutex poisoned");
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT seq, payload FROM entries ORDER BY seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seq, payload)) = row else {
            return Ok(None);
        };
        conn.execute("DELETE FROM entries WHERE seq = ?1", params![seq])?;
        Ok(Some(BufferEntry { seq, payload }))
    }

    /// Re-enqueue a payload at the head of the queue (lower sequence
    /// number than anything currently present), used when a send attempt
    /// fails after dequeue, so a stuck entry can't be starved behind
    /// newer ones.
    pub fn requeue(&self, payload: &[u8]) -> Result<(), AgentError> {
        let conn = self.conn.lock().expect("buffer mutex poisoned");
        let min_seq: Option<i64> = conn.query_row("SELECT MIN(seq) FROM entries", [], |row| row.get(0)).ok();
        let new_seq = min_seq.unwrap_or(1) - 1;

        let now = now_unix(&conn)?;
        conn.execute(
            "INSERT INTO entries (seq, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![new_seq, payload, now],
        )?;
        Ok(())
    }

    /// Current `(count, bytes_on_disk)`.
    pub fn size(&self) -> Result<BufferSize, AgentError> {
        let conn = self.conn.lock().expect("buffer mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        let bytes: i64 =
            conn.query_row("SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM entries", [], |row| row.get(0))?;
        Ok(BufferSize { count: count as u64, bytes_on_disk: bytes as u64 })
    }

    fn evict_if_needed(&self, conn: &Connection) -> Result<(), AgentError> {
        let mut bytes: i64 =
            conn.query_row("SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM entries", [], |row| row.get(0))?;
        if (bytes as u64) <= self.max_bytes {
            return Ok(());
        }

        let target = (self.max_bytes as f64 * 0.8) as i64;
        let mut evicted = 0u64;
        while bytes > target {
            let oldest: Option<(i64, i64)> = conn
                .query_row("SELECT seq, LENGTH(payload) FROM entries ORDER BY seq ASC LIMIT 1", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;
            let Some((seq, len)) = oldest else { break };
            conn.execute("DELETE FROM entries WHERE seq = ?1", params![seq])?;
            bytes -= len;
            evicted += 1;
        }

        if evicted > 0 {
            warn!(evicted_count = evicted, bytes_on_disk = bytes, max_bytes = self.max_bytes, "buffer_eviction_complete");
        }
        Ok(())
    }
}

fn now_unix(conn: &Connection) -> Result<i64, AgentError> {
    Ok(conn.query_row("SELECT strftime('%s','now')", [], |row| row.get::<_, String>(0))?.parse().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_buffer(max_size_mb: u64) -> (PersistentBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.sqlite");
        let buffer = PersistentBuffer::open(&path, max_size_mb).unwrap();
        (buffer, dir)
    }

    #[test]
    fn put_then_get_returns_fifo_order() {
        let (buffer, _dir) = open_test_buffer(10);
        buffer.put(b"first").unwrap();
        buffer.put(b"second").unwrap();

        assert_eq!(buffer.get().unwrap().unwrap().payload, b"first");
        assert_eq!(buffer.get().unwrap().unwrap().payload, b"second");
        assert!(buffer.get().unwrap().is_none());
    }

    #[test]
    fn requeue_reinserts_at_head() {
        let (buffer, _dir) = open_test_buffer(10);
        buffer.put(b"a").unwrap();
        buffer.put(b"b").unwrap();

        let entry = buffer.get().unwrap().unwrap();
        assert_eq!(entry.payload, b"a");
        buffer.requeue(&entry.payload).unwrap();

        let next = buffer.get().unwrap().unwrap();
        assert_eq!(next.payload, b"a");
    }

    #[test]
    fn size_reports_count_and_bytes() {
        let (buffer, _dir) = open_test_buffer(10);
        buffer.put(b"hello").unwrap();
        buffer.put(b"world!").unwrap();

        let size = buffer.size().unwrap();
        assert_eq!(size.count, 2);
        assert_eq!(size.bytes_on_disk, 11);
    }

    #[test]
    fn put_evicts_oldest_when_over_max_size() {
        let (buffer, _dir) = open_test_buffer(0);
        for i in 0..5 {
            buffer.put(format!("entry-{i}").as_bytes()).unwrap();
        }
        // each put evicts everything already present before inserting its
        // own entry, since the 0 MB cap means any nonzero backlog is over
        // the limit — only the most recently inserted entry survives.
        let size = buffer.size().unwrap();
        assert_eq!(size.count, 1);
        assert_eq!(buffer.get().unwrap().unwrap().payload, b"entry-4");
    }
}
