//! Incremental file tailing for the log streaming service.
//!
//! The tailer keeps one open handle per client and a byte offset, so a frame
//! never re-reads the file from the top. Rotation (inode change or the file
//! shrinking under the offset) re-opens from the start; idle periods are
//! reported in-band so the caller can emit the idle frame and wait for the
//! client's next cursor.

use std::{
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    time::Instant,
};

use crate::JinadResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Pause between polls for appended data.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One step of tailing.
#[derive(Debug, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete log line, 1-based.
    Line {
        /// The line number.
        number: u64,

        /// The raw line, without its trailing newline.
        line: String,
    },

    /// No new data arrived within the timeout window.
    Idle,

    /// The log file disappeared.
    FileGone,
}

/// Tails one log file for one client.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    inode: u64,
    offset: u64,
    next_line: u64,
    pending: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LogTailer {
    /// Creates a tailer over `path`. Nothing is opened until the first seek.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            inode: 0,
            offset: 0,
            next_line: 1,
            pending: String::new(),
        }
    }

    /// Whether the tailed file currently exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Positions the cursor so the next emitted line is `from` (1-based; zero
    /// behaves like one). Re-reads from the top, counting lines, so a client
    /// can move its cursor backwards as well as forwards.
    pub async fn seek_to_line(&mut self, from: u64) -> JinadResult<()> {
        let target = from.max(1);
        self.open_fresh().await?;

        while self.next_line < target {
            let mut line = String::new();
            let reader = self.reader.as_mut().expect("reader opened above");
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                // Fewer lines than the cursor asks for; emitting resumes once
                // the file grows past it.
                break;
            }
            self.offset += n as u64;
            if line.ends_with('\n') {
                self.next_line += 1;
            }
        }

        Ok(())
    }

    /// Waits for the next complete line, up to `timeout` since the last
    /// emitted frame. The idle window is tracked from an explicit timestamp,
    /// not inferred from poll counts.
    pub async fn next_event(&mut self, timeout: Duration) -> JinadResult<TailEvent> {
        let last_emit = Instant::now();

        loop {
            if !self.exists() {
                return Ok(TailEvent::FileGone);
            }
            self.reopen_if_rotated().await?;

            if self.reader.is_none() {
                self.open_fresh().await?;
            }

            let reader = self.reader.as_mut().expect("reader opened above");
            let mut chunk = String::new();
            let n = reader.read_line(&mut chunk).await?;

            if n > 0 {
                self.offset += n as u64;
                self.pending.push_str(&chunk);
                if self.pending.ends_with('\n') {
                    let line = std::mem::take(&mut self.pending);
                    let number = self.next_line;
                    self.next_line += 1;
                    return Ok(TailEvent::Line {
                        number,
                        line: line.trim_end_matches('\n').to_string(),
                    });
                }
                // Partial line; keep accumulating.
                continue;
            }

            if last_emit.elapsed() >= timeout {
                return Ok(TailEvent::Idle);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Helpers
    //----------------------------------------------------------------------------------------------

    async fn open_fresh(&mut self) -> JinadResult<()> {
        let file = File::open(&self.path).await?;
        self.inode = file.metadata().await?.ino();
        self.reader = Some(BufReader::new(file));
        self.offset = 0;
        self.next_line = 1;
        self.pending.clear();
        Ok(())
    }

    /// Detects rotation by stat change: a different inode or a file shorter
    /// than what was already consumed means the handle points at stale data.
    async fn reopen_if_rotated(&mut self) -> JinadResult<()> {
        if self.reader.is_none() {
            return Ok(());
        }
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(_) => return Ok(()), // caught by the exists() check
        };
        if metadata.ino() != self.inode || metadata.len() < self.offset {
            tracing::debug!("log file {} rotated, reopening", self.path.display());
            self.open_fresh().await?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_framing_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logging.log");
        write_lines(&path, &["one", "two", "three", "four"]);

        let mut tailer = LogTailer::new(&path);
        tailer.seek_to_line(0).await.unwrap();

        let timeout = Duration::from_millis(300);
        for (expected_number, expected_line) in
            [(1, "one"), (2, "two"), (3, "three"), (4, "four")]
        {
            match tailer.next_event(timeout).await.unwrap() {
                TailEvent::Line { number, line } => {
                    assert_eq!(number, expected_number);
                    assert_eq!(line, expected_line);
                }
                other => panic!("expected line, got {:?}", other),
            }
        }

        // Silence now yields exactly one idle event per wait.
        assert_eq!(tailer.next_event(timeout).await.unwrap(), TailEvent::Idle);
    }

    #[tokio::test]
    async fn test_resume_from_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logging.log");
        write_lines(&path, &["one", "two", "three", "four"]);

        let mut tailer = LogTailer::new(&path);
        tailer.seek_to_line(5).await.unwrap();
        write_lines(&path, &["five"]);

        match tailer.next_event(Duration::from_secs(1)).await.unwrap() {
            TailEvent::Line { number, line } => {
                assert_eq!(number, 5);
                assert_eq!(line, "five");
            }
            other => panic!("expected line 5, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_line_numbers_are_contiguous_across_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logging.log");
        write_lines(&path, &["a"]);

        let mut tailer = LogTailer::new(&path);
        tailer.seek_to_line(1).await.unwrap();

        let mut numbers = Vec::new();
        match tailer.next_event(Duration::from_secs(1)).await.unwrap() {
            TailEvent::Line { number, .. } => numbers.push(number),
            other => panic!("expected line, got {:?}", other),
        }

        write_lines(&path, &["b", "c"]);
        for _ in 0..2 {
            match tailer.next_event(Duration::from_secs(1)).await.unwrap() {
                TailEvent::Line { number, .. } => numbers.push(number),
                other => panic!("expected line, got {:?}", other),
            }
        }

        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_missing_file_reports_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logging.log");
        write_lines(&path, &["a"]);

        let mut tailer = LogTailer::new(&path);
        tailer.seek_to_line(1).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            tailer.next_event(Duration::from_secs(1)).await.unwrap(),
            TailEvent::FileGone
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_rotation_reopens_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logging.log");
        write_lines(&path, &["old-1", "old-2"]);

        let mut tailer = LogTailer::new(&path);
        tailer.seek_to_line(1).await.unwrap();
        for _ in 0..2 {
            tailer.next_event(Duration::from_secs(1)).await.unwrap();
        }

        // Rotate: replace the file with a shorter one.
        std::fs::remove_file(&path).unwrap();
        write_lines(&path, &["new-1"]);

        match tailer.next_event(Duration::from_secs(1)).await.unwrap() {
            TailEvent::Line { number, line } => {
                assert_eq!(number, 1);
                assert_eq!(line, "new-1");
            }
            other => panic!("expected reopened line, got {:?}", other),
        }
    }
}
