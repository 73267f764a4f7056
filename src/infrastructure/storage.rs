//! Sample persistence
//!
//! Samples are appended as text lines to a single CSV file that is never
//! truncated, so it keeps growing across sessions.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Destination for formatted sample records
pub trait SampleSink: Send {
    /// Append one record; the line is written before this returns
    fn append(&mut self, record: &str) -> io::Result<()>;
}

/// Appends records to a CSV file, creating it (and its folder) on first use
pub struct CsvSampleWriter {
    path: PathBuf,
    file: Option<File>,
}

impl CsvSampleWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        info!("Writing IMU data to {}", self.path.display());
        Ok(file)
    }
}

impl SampleSink for CsvSampleWriter {
    fn append(&mut self, record: &str) -> io::Result<()> {
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        // A handle that failed a write is dropped and reopened next time
        let mut file = match self.file.take() {
            Some(file) => file,
            None => self.open()?,
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            debug!("Append to {} failed: {}", self.path.display(), e);
            return Err(e);
        }
        self.file = Some(file);
        Ok(())
    }
}
