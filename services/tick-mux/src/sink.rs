//! Output sink capabilities
//!
//! The emitter appends one formatted line per record and calls `finish`
//! once at the end. `FileSink` buffers writes to a truncated file;
//! `MemorySink` keeps the lines in shared storage and can simulate an
//! unavailable or failing sink.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SinkError;

/// Appendable destination for emitted lines.
pub trait RecordSink {
    /// Append one line; the sink adds the line terminator.
    fn append(&mut self, line: &str) -> io::Result<()>;

    /// Flush everything appended so far.
    fn finish(&mut self) -> io::Result<()>;
}

/// Opens the run's sink.
pub trait SinkOpener {
    fn open_sink(&self) -> Result<Box<dyn RecordSink>, SinkError>;
}

// ── Filesystem ──────────────────────────────────────────────────────

pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|cause| SinkError::Open {
            path: path.to_path_buf(),
            cause,
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl RecordSink for FileSink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

#[derive(Debug, Clone)]
pub struct FileSinkOpener {
    path: PathBuf,
}

impl FileSinkOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SinkOpener for FileSinkOpener {
    fn open_sink(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        Ok(Box::new(FileSink::create(&self.path)?))
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Collects emitted lines; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
    fail_after: Option<usize>,
    unavailable: bool,
    finished: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` lines, then fail every append.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    /// Refuse to open.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        let mut lines = self.lines.lock();
        if self.fail_after.is_some_and(|n| lines.len() >= n) {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink full"));
        }
        lines.push(line.to_string());
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }
}

impl SinkOpener for MemorySink {
    fn open_sink(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        if self.unavailable {
            return Err(SinkError::Unavailable {
                reason: "memory sink configured unavailable".to_string(),
            });
        }
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_sink_writes_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.txt");
        let opener = FileSinkOpener::new(&path);

        let mut sink = opener.open_sink().unwrap();
        sink.append("AAA,09:30:00.000,1,2,NYSE,TRADE").unwrap();
        sink.append("BBB,09:30:00.000,1,2,NYSE,TRADE").unwrap();
        sink.finish().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "AAA,09:30:00.000,1,2,NYSE,TRADE\nBBB,09:30:00.000,1,2,NYSE,TRADE\n"
        );
    }

    #[test]
    fn test_file_sink_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.txt");
        fs::write(&path, "stale\n").unwrap();

        let mut sink = FileSinkOpener::new(&path).open_sink().unwrap();
        sink.finish().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_file_sink_open_failure() {
        let dir = TempDir::new().unwrap();
        let opener = FileSinkOpener::new(dir.path().join("missing").join("result.txt"));
        assert!(matches!(opener.open_sink(), Err(SinkError::Open { .. })));
    }

    #[test]
    fn test_memory_sink_shares_storage() {
        let sink = MemorySink::new();
        let mut opened = sink.open_sink().unwrap();
        opened.append("one").unwrap();
        opened.finish().unwrap();

        assert_eq!(sink.lines(), vec!["one"]);
        assert!(sink.is_finished());
    }

    #[test]
    fn test_memory_sink_failures() {
        assert!(MemorySink::unavailable().open_sink().is_err());

        let mut sink = MemorySink::failing_after(1);
        sink.append("one").unwrap();
        assert!(sink.append("two").is_err());
        assert_eq!(sink.lines(), vec!["one"]);
    }
}
