//! Rotation-aware file tailer.
//!
//! Adds an explicit *waiting* state: the log file may not exist yet when
//! the agent starts, and must not error out while waiting for PostgreSQL
//! to create it.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of lines read in a single `read_new_lines()` call, to
/// bound memory if a huge backlog has accumulated.
const MAX_LINES_PER_READ: usize = 10_000;

/// Follows a single file across rotations (inode change or truncation).
pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    inode: u64,
}

impl FileTailer {
    /// Block (sleeping `poll_interval` between checks) until `path` exists,
    /// then open it starting from the current end — old content is not
    /// replayed. Returns immediately if `stop` is observed true; callers
    /// should check the return value for that case.
    pub fn open_when_ready(
        path: PathBuf,
        poll_interval: Duration,
        mut should_stop: impl FnMut() -> bool,
    ) -> Option<io::Result<Self>> {
        loop {
            if should_stop() {
                return None;
            }
            match fs::metadata(&path) {
                Ok(metadata) => {
                    let inode = get_inode(&metadata);
                    let offset = metadata.len();
                    return Some(Ok(Self { path, offset, inode }));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    std::thread::sleep(poll_interval.max(Duration::from_millis(1)));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Open immediately, seeking to the current end of the file. Returns
    /// `Err` if the file does not exist.
    pub fn new(path: PathBuf) -> io::Result<Self> {
        let metadata = fs::metadata(&path)?;
        let inode = get_inode(&metadata);
        let offset = metadata.len();
        Ok(Self { path, offset, inode })
    }

    /// Read new lines appended since the last call.
    ///
    /// Returns `Rotated` as part of the result when the file was rotated
    /// (inode changed or size shrank) since the previous read, so the caller
    /// can flush any pending multi-line accumulator before continuing.
    pub fn read_new_lines(&mut self) -> io::Result<ReadOutcome> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ReadOutcome { lines: Vec::new(), rotated: false, gone: true });
            }
            Err(e) => return Err(e),
        };

        let current_inode = get_inode(&metadata);
        let current_size = metadata.len();
        let rotated = current_inode != self.inode || current_size < self.offset;
        if rotated {
            self.inode = current_inode;
            self.offset = 0;
        }

        if current_size <= self.offset {
            return Ok(ReadOutcome { lines: Vec::new(), rotated, gone: false });
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;

        let reader = BufReader::new(&file);
        let mut lines = Vec::new();
        for line_result in reader.lines() {
            let line = line_result?;
            lines.push(line);
            if lines.len() >= MAX_LINES_PER_READ {
                break;
            }
        }
        self.offset = file.stream_position()?;

        Ok(ReadOutcome { lines, rotated, gone: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of one `read_new_lines()` call.
pub struct ReadOutcome {
    pub lines: Vec<String>,
    /// True if rotation was detected on this call (pending lines from before
    /// the rotation should be flushed as their own record).
    pub rotated: bool,
    /// True if the path vanished (mid-rotation race); caller should retry
    /// later rather than treat this as an error.
    pub gone: bool,
}

#[cfg(unix)]
fn get_inode(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(_metadata: &std::fs::Metadata) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn new_starts_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, "old line 1\nold line 2\n").unwrap();

        let mut tailer = FileTailer::new(path).unwrap();
        let outcome = tailer.read_new_lines().unwrap();
        assert!(outcome.lines.is_empty());
    }

    #[test]
    fn reads_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, "old\n").unwrap();
        let mut tailer = FileTailer::new(path.clone()).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "new line 1").unwrap();
        writeln!(f, "new line 2").unwrap();
        drop(f);

        let outcome = tailer.read_new_lines().unwrap();
        assert_eq!(outcome.lines, vec!["new line 1", "new line 2"]);
        assert!(!outcome.rotated);

        let outcome = tailer.read_new_lines().unwrap();
        assert!(outcome.lines.is_empty());
    }

    #[test]
    fn detects_truncation_as_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, "a".repeat(1000)).unwrap();
        let mut tailer = FileTailer::new(path.clone()).unwrap();

        std::fs::write(&path, "after rotation\n").unwrap();

        let outcome = tailer.read_new_lines().unwrap();
        assert_eq!(outcome.lines, vec!["after rotation"]);
        assert!(outcome.rotated);
    }

    #[test]
    fn missing_file_reports_gone_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, "content\n").unwrap();
        let mut tailer = FileTailer::new(path.clone()).unwrap();
        std::fs::remove_file(&path).unwrap();

        let outcome = tailer.read_new_lines().unwrap();
        assert!(outcome.lines.is_empty());
        assert!(outcome.gone);
    }

    #[test]
    fn open_when_ready_waits_for_file_to_appear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appears-later.log");
        let path2 = path.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::write(&path2, "first\n").unwrap();
        });

        let tailer = FileTailer::open_when_ready(path, Duration::from_millis(10), || false)
            .expect("should return once file appears")
            .unwrap();
        handle.join().unwrap();
        assert_eq!(tailer.offset, "first\n".len() as u64);
    }
}
