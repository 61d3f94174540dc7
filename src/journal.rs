//! Append-only JSON-lines journal with retry of failed writes.
//!
//! A failed append never loses the record: the serialized line stays in a
//! pending buffer and is written ahead of the next append (or on `flush`).
//! The buffer holds at most [`MAX_PENDING`] lines; past that the oldest are
//! dropped with a warning.
//! Single-writer: two journals must not point at the same file.

use crate::error::{MyceliaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MAX_PENDING: usize = 10_000;

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    pending: VecDeque<String>,
    capacity: usize,
    /// A write failed after the file was opened, so the last line on disk
    /// may be unterminated.
    torn: bool,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, MAX_PENDING)
    }

    /// Journal that keeps at most `capacity` unwritten lines.
    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            torn: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines waiting to be retried.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue `record` and try to write everything pending.
    ///
    /// Serialization errors are returned; I/O errors are logged and the
    /// line is kept for the next attempt.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        if self.pending.len() >= self.capacity {
            let dropped = self.pending.len() + 1 - self.capacity;
            for _ in 0..dropped {
                self.pending.pop_front();
            }
            warn!(
                path = %self.path.display(),
                dropped,
                "Journal retry buffer full, dropping oldest lines"
            );
        }
        self.pending.push_back(line);
        self.flush();
        Ok(())
    }

    /// Write pending lines. Returns true when nothing is left pending.
    pub fn flush(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        match self.write_pending() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    pending = self.pending.len(),
                    error = %e,
                    "Journal append failed, will retry"
                );
                false
            }
        }
    }

    fn write_pending(&mut self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let written = self.write_lines(&mut file);
        self.torn = written.is_err();
        written
    }

    fn write_lines(&mut self, file: &mut fs::File) -> std::io::Result<()> {
        if self.torn {
            // Terminate whatever fragment the failed write left behind.
            file.write_all(b"\n")?;
        }
        while let Some(line) = self.pending.front() {
            writeln!(file, "{line}")?;
            self.pending.pop_front();
        }
        file.flush()
    }
}

/// Read every well-formed record from a JSON-lines file.
///
/// A missing file yields an empty list. Malformed lines, including ones
/// cut inside a multi-byte character, are skipped with a warning so one
/// torn write does not hide the rest of the log.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MyceliaError::io(path, e)),
    };
    let mut records = Vec::new();
    for (lineno, bytes) in BufReader::new(file).split(b'\n').enumerate() {
        let bytes = bytes.map_err(|e| MyceliaError::io(path, e))?;
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping malformed journal line"
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = lineno + 1,
                error = %e,
                "Skipping malformed journal line"
            ),
        }
    }
    Ok(records)
}

/// Overwrite `path` with `value` as pretty JSON, via a temp file + rename.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MyceliaError::io(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| MyceliaError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| MyceliaError::io(path, e))
}

/// Read a whole-file JSON snapshot. A missing file yields `None`.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MyceliaError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Line {
        timestamp: i64,
        event_type: String,
    }

    #[test]
    fn test_append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/log.jsonl");
        let mut journal = Journal::new(&path);
        for i in 0..3 {
            journal
                .append(&Line {
                    timestamp: i,
                    event_type: "tick".into(),
                })
                .unwrap();
        }
        let lines: Vec<Line> = read_records(&path).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].timestamp, 2);
    }

    #[test]
    fn test_failed_write_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the open fail.
        let path = dir.path().join("log.jsonl");
        fs::create_dir(&path).unwrap();
        let mut journal = Journal::new(&path);
        journal
            .append(&Line {
                timestamp: 1,
                event_type: "a".into(),
            })
            .unwrap();
        assert_eq!(journal.pending(), 1);

        fs::remove_dir(&path).unwrap();
        assert!(journal.flush());
        assert_eq!(journal.pending(), 0);
        let lines: Vec<Line> = read_records(&path).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(
            &path,
            "{\"timestamp\":1,\"event_type\":\"a\"}\nnot json\n\n{\"timestamp\":2,\"event_type\":\"b\"}\n",
        )
        .unwrap();
        let lines: Vec<Line> = read_records(&path).unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut bytes = b"{\"timestamp\":1,\"event_type\":\"a\"}\n".to_vec();
        bytes.extend_from_slice(b"{\"timestamp\":2,\"event_type\":\"caf\xc3\n");
        bytes.extend_from_slice(b"{\"timestamp\":3,\"event_type\":\"c\"}\n");
        fs::write(&path, bytes).unwrap();
        let lines: Vec<Line> = read_records(&path).unwrap();
        let stamps: Vec<i64> = lines.iter().map(|l| l.timestamp).collect();
        assert_eq!(stamps, vec![1, 3]);
    }

    #[test]
    fn test_retry_after_torn_write_starts_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        // What a write cut off mid-line leaves on disk.
        fs::write(&path, "{\"timestamp\":0,\"event_ty").unwrap();
        let mut journal = Journal::new(&path);
        journal.torn = true;
        journal
            .append(&Line {
                timestamp: 1,
                event_type: "a".into(),
            })
            .unwrap();
        assert!(!journal.torn);
        let lines: Vec<Line> = read_records(&path).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].timestamp, 1);
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::create_dir(&path).unwrap();
        let mut journal = Journal::with_capacity(&path, 3);
        for i in 0..5 {
            journal
                .append(&Line {
                    timestamp: i,
                    event_type: "a".into(),
                })
                .unwrap();
        }
        assert_eq!(journal.pending(), 3);

        fs::remove_dir(&path).unwrap();
        assert!(journal.flush());
        let stamps: Vec<i64> = read_records::<Line>(&path)
            .unwrap()
            .iter()
            .map(|l| l.timestamp)
            .collect();
        assert_eq!(stamps, vec![2, 3, 4]);
    }

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<Line> = read_records(&dir.path().join("nope")).unwrap();
        assert!(lines.is_empty());
        let snap: Option<Vec<Line>> = read_snapshot(&dir.path().join("nope.json")).unwrap();
        assert!(snap.is_none());
    }
}
