use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::{io::Write, path::PathBuf};

use crate::error::ScopeError;

/// One saved acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub timestamp: DateTime<Utc>,
    pub resource: String,
    pub channel: u8,
    pub volts_per_div: Option<f64>,
    pub time_per_div: Option<f64>,
    pub sample_rate: Option<f64>,
    pub samples: usize,
    pub path: PathBuf,
}

/// Buffered JSONL writer for [`CaptureRecord`]s.
///
/// Records are appended one per line. Transient write failures are logged
/// and retried on the next flush; only after `max_flush_failures` in a row is
/// an error returned.
#[derive(Debug)]
pub struct CaptureLog {
    buffer: Vec<CaptureRecord>,
    buffer_size: usize,
    file_path: PathBuf,
    flush_failures: usize,
    max_flush_failures: usize,
}

impl CaptureLog {
    pub fn new<P: Into<PathBuf>>(file_path: P, buffer_size: usize) -> Self {
        let mut path = file_path.into();
        if path.extension() != Some(std::ffi::OsStr::new("jsonl")) {
            path.set_extension("jsonl");
        }

        Self {
            buffer: Vec::with_capacity(buffer_size.max(1)),
            buffer_size: buffer_size.max(1),
            file_path: path,
            flush_failures: 0,
            max_flush_failures: 10,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.file_path
    }

    pub fn add(&mut self, record: CaptureRecord) -> Result<(), ScopeError> {
        self.buffer.push(record);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ScopeError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.write_buffer() {
            Ok(()) => {
                self.flush_failures = 0;
                debug!(
                    "Capture log: wrote {} records to {}",
                    self.buffer.len(),
                    self.file_path.display()
                );
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                error!(
                    "Capture log flush failure {}/{}: {}",
                    self.flush_failures, self.max_flush_failures, e
                );

                if self.flush_failures % 3 == 0 {
                    warn!(
                        "Experiencing intermittent capture log failures ({}/{})",
                        self.flush_failures, self.max_flush_failures
                    );
                }

                if self.flush_failures >= self.max_flush_failures {
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    fn write_buffer(&self) -> Result<(), ScopeError> {
        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ScopeError::file(e, parent))?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|e| ScopeError::file(e, &self.file_path))?;

        let mut writer = std::io::BufWriter::new(file);
        for record in &self.buffer {
            let line = serde_json::to_string(record)?;
            writeln!(writer, "{line}").map_err(|e| ScopeError::file(e, &self.file_path))?;
        }
        writer.flush().map_err(|e| ScopeError::file(e, &self.file_path))
    }

    /// Read every record back from a log file.
    pub fn read_all(path: &std::path::Path) -> Result<Vec<CaptureRecord>, ScopeError> {
        let content = std::fs::read_to_string(path).map_err(|e| ScopeError::file(e, path))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(ScopeError::from))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Drop for CaptureLog {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(samples: usize) -> CaptureRecord {
        CaptureRecord {
            timestamp: Utc::now(),
            resource: "SIM::log".into(),
            channel: 1,
            volts_per_div: Some(1.0),
            time_per_div: Some(1e-3),
            sample_rate: Some(1e6),
            samples,
            path: PathBuf::from("data/x.csv"),
        }
    }

    #[test]
    fn test_buffer_flushes_when_full_and_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/captures");
        let mut log = CaptureLog::new(&path, 2);
        assert_eq!(log.path().extension().unwrap(), "jsonl");

        log.add(record(1)).unwrap();
        assert_eq!(log.len(), 1);
        log.add(record(2)).unwrap();
        assert!(log.is_empty());
        log.add(record(3)).unwrap();

        let file = log.path().to_path_buf();
        drop(log);
        let records = CaptureLog::read_all(&file).unwrap();
        assert_eq!(records.iter().map(|r| r.samples).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn test_unwritable_path_is_tolerated_at_first() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        // Parent is a regular file, so every flush fails
        let mut log = CaptureLog::new(blocker.join("captures.jsonl"), 1);
        for _ in 0..9 {
            log.add(record(1)).unwrap();
        }
        assert!(log.add(record(1)).is_err());
    }
}
